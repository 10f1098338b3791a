use crate::method::{Method, field_id, parse_measurement};
use std::collections::HashMap;

/// Replicates a triplicate submission must carry.
pub const REQUIRED_REPLICATES: usize = 3;

/// A triplicate entry form as it arrives from the recording surface:
/// the sample name plus up to three maps of raw text fields, one per
/// replicate in order.
#[derive(Debug, Clone, Default)]
pub struct TriplicateForm {
    pub sample_name: String,
    pub replicates: Vec<HashMap<String, String>>,
}

impl TriplicateForm {
    pub fn new(sample_name: impl Into<String>) -> Self {
        TriplicateForm {
            sample_name: sample_name.into(),
            replicates: Vec::new(),
        }
    }

    pub fn add_replicate(&mut self, fields: HashMap<String, String>) {
        self.replicates.push(fields);
    }
}

/// Verdict of a completeness check: the identifiers of every field still
/// unfilled, `sample_name` first, then replicate-major order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completeness {
    pub missing: Vec<String>,
}

impl Completeness {
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }
}

/// Check whether a form is ready for aggregation.
///
/// A field counts as unfilled when it is absent, blank, not a finite
/// number, or zero. Number inputs on the recording surface default to 0,
/// so a zero is indistinguishable from an untouched field and is treated
/// as such here and only here (the converter accepts explicit zeros).
/// The optional `conversion_factor` is never reported.
///
/// This only renders a verdict; nothing is aggregated or stored from
/// here.
pub fn check(method: Method, form: &TriplicateForm) -> Completeness {
    let mut missing = Vec::new();

    if form.sample_name.trim().is_empty() {
        missing.push("sample_name".to_string());
    }

    for replicate in 1..=REQUIRED_REPLICATES {
        let fields = form.replicates.get(replicate - 1);
        for name in method.required_fields() {
            let filled = fields
                .and_then(|f| f.get(*name))
                .and_then(|raw| parse_measurement(raw))
                .is_some_and(|v| v != 0.0);
            if !filled {
                missing.push(field_id(name, replicate));
            }
        }
    }

    Completeness { missing }
}
