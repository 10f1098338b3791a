use crate::method::Method;
use crate::stats::round2;
use std::collections::HashMap;

/// Caloric coefficient for protein, kcal per gram.
pub const PROTEIN_KCAL_PER_G: f64 = 4.0;
/// Caloric coefficient for carbohydrate, kcal per gram.
pub const CARBOHYDRATE_KCAL_PER_G: f64 = 4.0;
/// Caloric coefficient for lipid, kcal per gram.
pub const LIPID_KCAL_PER_G: f64 = 9.0;

/// Carbohydrate-by-difference from the stored means of a sample.
///
/// Defined only when all five mandatory analytes are present; `None`
/// means "not computable yet", which is an expected state while a sample
/// is still being worked, never an error. The value may be negative when
/// the means overshoot 100 and is surfaced as-is.
pub fn carbohydrate_by_difference(means: &HashMap<Method, f64>) -> Option<f64> {
    let mut sum = 0.0;
    for method in Method::MANDATORY {
        sum += means.get(&method)?;
    }
    Some(round2(100.0 - sum))
}

/// Total energy value (VET), kcal per 100 g.
///
/// Requires protein, lipid and carbohydrate means; `None` otherwise.
pub fn energy_value(means: &HashMap<Method, f64>) -> Option<f64> {
    let protein = means.get(&Method::Protein)?;
    let lipid = means.get(&Method::Lipid)?;
    let carbohydrate = means.get(&Method::Carbohydrate)?;
    Some(round2(
        protein * PROTEIN_KCAL_PER_G
            + carbohydrate * CARBOHYDRATE_KCAL_PER_G
            + lipid * LIPID_KCAL_PER_G,
    ))
}
