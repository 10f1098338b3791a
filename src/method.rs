use crate::error::EngineError;
use crate::stats::round2;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Molar mass of nitrogen, g/mol, used by the Kjeldahl protein formula.
pub const NITROGEN_MOLAR_MASS: f64 = 14.007;

/// Default nitrogen-to-protein conversion factor.
pub const DEFAULT_PROTEIN_FACTOR: f64 = 6.25;

/// Analytic method of a stored result. The first five are recorded from
/// triplicate measurements; `Carbohydrate` is derived by difference and
/// never submitted directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Method {
    Moisture,
    Ash,
    Protein,
    Lipid,
    Fiber,
    Carbohydrate,
}

impl Method {
    /// Display/storage order of every method.
    pub const ALL: [Method; 6] = [
        Method::Moisture,
        Method::Ash,
        Method::Protein,
        Method::Lipid,
        Method::Fiber,
        Method::Carbohydrate,
    ];

    /// The five analytes that must be present before carbohydrate can be
    /// derived for a sample.
    pub const MANDATORY: [Method; 5] = [
        Method::Moisture,
        Method::Ash,
        Method::Protein,
        Method::Lipid,
        Method::Fiber,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Method::Moisture => "Moisture",
            Method::Ash => "Ash",
            Method::Protein => "Protein",
            Method::Lipid => "Lipid",
            Method::Fiber => "Fiber",
            Method::Carbohydrate => "Carbohydrate",
        }
    }

    pub fn from_name(name: &str) -> Option<Method> {
        match name {
            "Moisture" => Some(Method::Moisture),
            "Ash" => Some(Method::Ash),
            "Protein" => Some(Method::Protein),
            "Lipid" => Some(Method::Lipid),
            "Fiber" => Some(Method::Fiber),
            "Carbohydrate" => Some(Method::Carbohydrate),
            _ => None,
        }
    }

    /// Names of the measurement fields a replicate form must carry for
    /// this method. Empty for `Carbohydrate`, which has no form.
    /// `Protein` additionally accepts an optional `conversion_factor`.
    pub fn required_fields(&self) -> &'static [&'static str] {
        match self {
            Method::Moisture => &["container", "wet_with_container", "dry_with_container"],
            Method::Ash => &["container", "container_plus_sample", "container_plus_ash"],
            Method::Protein => &["volume_acid", "blank_volume", "normality", "sample_mass"],
            Method::Lipid => &["sample_mass", "extracted_fat_mass"],
            Method::Fiber => &[
                "sample_mass",
                "residue_mass",
                "protein_correction",
                "ash_correction",
            ],
            Method::Carbohydrate => &[],
        }
    }

    pub fn is_derived(&self) -> bool {
        matches!(self, Method::Carbohydrate)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Raw measurements of a single replicate, one variant per recordable
/// method. All weights are grams, volumes millilitres.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplicateMeasurements {
    Moisture {
        container: f64,
        wet_with_container: f64,
        dry_with_container: f64,
    },
    Ash {
        container: f64,
        container_plus_sample: f64,
        container_plus_ash: f64,
    },
    Protein {
        volume_acid: f64,
        blank_volume: f64,
        normality: f64,
        sample_mass: f64,
        conversion_factor: f64,
    },
    Lipid {
        sample_mass: f64,
        extracted_fat_mass: f64,
    },
    Fiber {
        sample_mass: f64,
        residue_mass: f64,
        protein_correction: f64,
        ash_correction: f64,
    },
}

impl ReplicateMeasurements {
    pub fn method(&self) -> Method {
        match self {
            ReplicateMeasurements::Moisture { .. } => Method::Moisture,
            ReplicateMeasurements::Ash { .. } => Method::Ash,
            ReplicateMeasurements::Protein { .. } => Method::Protein,
            ReplicateMeasurements::Lipid { .. } => Method::Lipid,
            ReplicateMeasurements::Fiber { .. } => Method::Fiber,
        }
    }

    /// Parse the raw text fields of one replicate into a typed record.
    ///
    /// `replicate` is the 1-based replicate index, used only to name the
    /// offending field in errors (`container_r2`). Fields that are absent
    /// or not finite numbers fail with [`EngineError::Validation`]; an
    /// explicit zero is accepted, the formulas guard their denominators.
    pub fn from_fields(
        method: Method,
        replicate: usize,
        fields: &HashMap<String, String>,
    ) -> Result<Self, EngineError> {
        let get = |name: &str| -> Result<f64, EngineError> {
            fields
                .get(name)
                .and_then(|raw| parse_measurement(raw))
                .ok_or_else(|| EngineError::Validation {
                    field: field_id(name, replicate),
                })
        };

        match method {
            Method::Moisture => Ok(ReplicateMeasurements::Moisture {
                container: get("container")?,
                wet_with_container: get("wet_with_container")?,
                dry_with_container: get("dry_with_container")?,
            }),
            Method::Ash => Ok(ReplicateMeasurements::Ash {
                container: get("container")?,
                container_plus_sample: get("container_plus_sample")?,
                container_plus_ash: get("container_plus_ash")?,
            }),
            Method::Protein => Ok(ReplicateMeasurements::Protein {
                volume_acid: get("volume_acid")?,
                blank_volume: get("blank_volume")?,
                normality: get("normality")?,
                sample_mass: get("sample_mass")?,
                conversion_factor: optional_factor(fields, replicate)?,
            }),
            Method::Lipid => Ok(ReplicateMeasurements::Lipid {
                sample_mass: get("sample_mass")?,
                extracted_fat_mass: get("extracted_fat_mass")?,
            }),
            Method::Fiber => Ok(ReplicateMeasurements::Fiber {
                sample_mass: get("sample_mass")?,
                residue_mass: get("residue_mass")?,
                protein_correction: get("protein_correction")?,
                ash_correction: get("ash_correction")?,
            }),
            Method::Carbohydrate => Err(EngineError::Validation {
                field: "method".to_string(),
            }),
        }
    }

    /// Derived percentage for this replicate, rounded to 2 decimals.
    ///
    /// Non-positive denominators never raise: the result is defined as 0
    /// so that placeholder weights entered mid-workflow stay harmless.
    pub fn percent(&self) -> f64 {
        let value = match *self {
            ReplicateMeasurements::Moisture {
                container,
                wet_with_container,
                dry_with_container,
            } => {
                let wet_mass = wet_with_container - container;
                let dry_mass = dry_with_container - container;
                if wet_mass > 0.0 {
                    (wet_mass - dry_mass) / wet_mass * 100.0
                } else {
                    0.0
                }
            }
            ReplicateMeasurements::Ash {
                container,
                container_plus_sample,
                container_plus_ash,
            } => {
                let sample_mass = container_plus_sample - container;
                let ash_mass = container_plus_ash - container;
                if sample_mass > 0.0 {
                    ash_mass / sample_mass * 100.0
                } else {
                    0.0
                }
            }
            ReplicateMeasurements::Protein {
                volume_acid,
                blank_volume,
                normality,
                sample_mass,
                conversion_factor,
            } => {
                let nitrogen = if sample_mass > 0.0 {
                    (volume_acid - blank_volume) * normality * NITROGEN_MOLAR_MASS
                        / (sample_mass * 1000.0)
                } else {
                    0.0
                };
                nitrogen * conversion_factor
            }
            ReplicateMeasurements::Lipid {
                sample_mass,
                extracted_fat_mass,
            } => {
                if sample_mass > 0.0 {
                    extracted_fat_mass / sample_mass * 100.0
                } else {
                    0.0
                }
            }
            ReplicateMeasurements::Fiber {
                sample_mass,
                residue_mass,
                protein_correction,
                ash_correction,
            } => {
                let residue_net = residue_mass - protein_correction - ash_correction;
                if sample_mass > 0.0 {
                    residue_net / sample_mass * 100.0
                } else {
                    0.0
                }
            }
        };
        round2(value)
    }
}

/// Form identifier of a field within a replicate, e.g. `container_r2`.
pub fn field_id(name: &str, replicate: usize) -> String {
    format!("{name}_r{replicate}")
}

/// Parse one raw form value. Whitespace is trimmed; anything that is not
/// a finite number yields `None`.
pub fn parse_measurement(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

// The nitrogen-to-protein factor may be omitted or left at the form
// default of 0, in which case 6.25 applies. A present, non-numeric value
// is still a typo worth rejecting.
fn optional_factor(
    fields: &HashMap<String, String>,
    replicate: usize,
) -> Result<f64, EngineError> {
    match fields.get("conversion_factor") {
        None => Ok(DEFAULT_PROTEIN_FACTOR),
        Some(raw) if raw.trim().is_empty() => Ok(DEFAULT_PROTEIN_FACTOR),
        Some(raw) => match parse_measurement(raw) {
            Some(f) if f != 0.0 => Ok(f),
            Some(_) => Ok(DEFAULT_PROTEIN_FACTOR),
            None => Err(EngineError::Validation {
                field: field_id("conversion_factor", replicate),
            }),
        },
    }
}
