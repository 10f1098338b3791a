use crate::auth::UserContext;
use crate::composition;
use crate::error::EngineError;
use crate::method::{Method, ReplicateMeasurements};
use crate::stats;
use crate::store::{Analysis, Note, Store};
use crate::validator::{self, Completeness, REQUIRED_REPLICATES, TriplicateForm};
use log::debug;

/// Outcome of a carbohydrate derivation for one sample.
#[derive(Debug, Clone, PartialEq)]
pub enum CarbohydrateOutcome {
    /// The residual was computed and stored as a new row.
    Stored(Analysis),
    /// A derived row already existed; nothing was written.
    AlreadyStored,
    /// One or more mandatory fractions are still missing.
    NotComputable,
}

/// Mean of every fraction of one sample plus its energy value, in the
/// fixed method order.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleOverview {
    pub sample_name: String,
    /// One entry per [`Method::ALL`] member; `None` when not recorded.
    pub fractions: Vec<(Method, Option<f64>)>,
    /// Atwater energy value, kcal per 100 g, when computable.
    pub energy_kcal: Option<f64>,
}

impl SampleOverview {
    /// Multi-line display text for the overview.
    pub fn summary(&self) -> String {
        let mut text = format!("Sample '{}'\n", self.sample_name);
        for (method, mean) in &self.fractions {
            match mean {
                Some(value) => text.push_str(&format!("  {}: {:.2}%\n", method, value)),
                None => text.push_str(&format!("  {}: not recorded\n", method)),
            }
        }
        match self.energy_kcal {
            Some(kcal) => text.push_str(&format!("  Energy value: {:.2} kcal/100 g\n", kcal)),
            None => text.push_str("  Energy value: not computable\n"),
        }
        text
    }
}

/// Facade over the whole workflow: validate, convert, aggregate, store.
///
/// Holds the persistent [`Store`]; identity comes in as a [`UserContext`]
/// argument on every call, never from ambient state.
pub struct AnalysisEngine {
    store: Store,
}

impl AnalysisEngine {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Open the store at `path` and wrap it in an engine.
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self, EngineError> {
        Ok(Self::new(Store::open(path)?))
    }

    /// Direct access to the underlying store.
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Completeness check for a form, without touching the store.
    pub fn check_form(&self, method: Method, form: &TriplicateForm) -> Completeness {
        validator::check(method, form)
    }

    /// Record one triplicate analysis for `user`.
    ///
    /// The form must be complete (three replicates, every required field
    /// filled). Each replicate is converted to its percentage, the three
    /// percentages are aggregated, and the result is stored. Re-recording
    /// the same (sample, method) replaces the stored row and drops any
    /// derived carbohydrate row, which is now stale.
    pub fn record_triplicate(
        &self,
        user: &UserContext,
        method: Method,
        form: &TriplicateForm,
    ) -> Result<Analysis, EngineError> {
        if method.is_derived() {
            return Err(EngineError::Validation {
                field: "method".to_string(),
            });
        }

        let completeness = validator::check(method, form);
        if let Some(first_missing) = completeness.missing.first() {
            return Err(EngineError::Validation {
                field: first_missing.clone(),
            });
        }

        let mut values = [0.0; 3];
        for (idx, fields) in form.replicates.iter().take(REQUIRED_REPLICATES).enumerate() {
            let replicate = ReplicateMeasurements::from_fields(method, idx + 1, fields)?;
            values[idx] = replicate.percent();
        }

        let summary = stats::aggregate(&values)?;
        let sample_name = form.sample_name.trim();
        let row = self
            .store
            .upsert_analysis(user.user_id, sample_name, method, values, &summary)?;

        // Every recordable method feeds the residual, so any stored
        // carbohydrate row is stale now.
        if self.store.delete_derived(user.user_id, sample_name)? {
            debug!("dropped stale carbohydrate row for sample '{sample_name}'");
        }

        debug!(
            "recorded {} for sample '{}' (user {})",
            method, sample_name, user.user_id
        );
        Ok(row)
    }

    /// Compute and store carbohydrate-by-difference for one sample.
    ///
    /// Requires all five mandatory fractions. Storing is idempotent: a
    /// second call for the same sample reports
    /// [`CarbohydrateOutcome::AlreadyStored`] and writes nothing.
    pub fn derive_carbohydrate(
        &self,
        user: &UserContext,
        sample_name: &str,
    ) -> Result<CarbohydrateOutcome, EngineError> {
        let means = self.store.means_for_sample(user.user_id, sample_name)?;
        let Some(residual) = composition::carbohydrate_by_difference(&means) else {
            return Ok(CarbohydrateOutcome::NotComputable);
        };

        match self.store.insert_derived(user.user_id, sample_name, residual) {
            Ok(row) => {
                debug!(
                    "derived carbohydrate {:.2}% for sample '{}' (user {})",
                    residual, sample_name, user.user_id
                );
                Ok(CarbohydrateOutcome::Stored(row))
            }
            Err(EngineError::DuplicateDerivedResult { .. }) => {
                Ok(CarbohydrateOutcome::AlreadyStored)
            }
            Err(e) => Err(e),
        }
    }

    /// Atwater energy value for one sample, when protein, lipid and
    /// carbohydrate are all present.
    pub fn energy_value(
        &self,
        user: &UserContext,
        sample_name: &str,
    ) -> Result<Option<f64>, EngineError> {
        let means = self.store.means_for_sample(user.user_id, sample_name)?;
        Ok(composition::energy_value(&means))
    }

    /// Consolidated view of one sample: every fraction's mean in the
    /// fixed order plus the energy value. Derivation runs first, so the
    /// carbohydrate row appears as soon as it becomes computable.
    pub fn sample_overview(
        &self,
        user: &UserContext,
        sample_name: &str,
    ) -> Result<SampleOverview, EngineError> {
        self.derive_carbohydrate(user, sample_name)?;
        let means = self.store.means_for_sample(user.user_id, sample_name)?;
        let fractions = Method::ALL
            .iter()
            .map(|method| (*method, means.get(method).copied()))
            .collect();
        Ok(SampleOverview {
            sample_name: sample_name.to_string(),
            fractions,
            energy_kcal: composition::energy_value(&means),
        })
    }

    /// Every stored row of one sample, oldest first.
    pub fn sample_rows(
        &self,
        user: &UserContext,
        sample_name: &str,
    ) -> Result<Vec<Analysis>, EngineError> {
        self.store.analyses_for_sample(user.user_id, sample_name)
    }

    /// One [`SampleOverview`] per distinct sample of the user, sorted by
    /// sample name.
    pub fn panel(&self, user: &UserContext) -> Result<Vec<SampleOverview>, EngineError> {
        let mut overviews = Vec::new();
        for sample_name in self.store.sample_names(user.user_id)? {
            overviews.push(self.sample_overview(user, &sample_name)?);
        }
        Ok(overviews)
    }

    /// Every analysis of the user, newest first.
    pub fn list_analyses(&self, user: &UserContext) -> Result<Vec<Analysis>, EngineError> {
        self.store.analyses_for_user(user.user_id)
    }

    /// The user's analyses of one method, grouped by sample.
    pub fn list_analyses_for_method(
        &self,
        user: &UserContext,
        method: Method,
    ) -> Result<Vec<Analysis>, EngineError> {
        self.store.analyses_for_user_method(user.user_id, method)
    }

    /// Distinct sample names the user has recorded, sorted.
    pub fn sample_names(&self, user: &UserContext) -> Result<Vec<String>, EngineError> {
        self.store.sample_names(user.user_id)
    }

    /// Delete one (sample, method) row. Deleting a mandatory fraction
    /// also drops the derived carbohydrate row of that sample.
    pub fn delete_analysis(
        &self,
        user: &UserContext,
        sample_name: &str,
        method: Method,
    ) -> Result<bool, EngineError> {
        let deleted = self
            .store
            .delete_analysis(user.user_id, sample_name, method)?;
        if deleted && !method.is_derived() {
            self.store.delete_derived(user.user_id, sample_name)?;
        }
        Ok(deleted)
    }

    /// Attach a free-text note to the user's workspace.
    pub fn add_note(
        &self,
        user: &UserContext,
        title: &str,
        body: &str,
    ) -> Result<Note, EngineError> {
        let title = title.trim();
        if title.is_empty() {
            return Err(EngineError::Validation {
                field: "title".to_string(),
            });
        }
        self.store.add_note(user.user_id, title, body.trim())
    }

    pub fn list_notes(&self, user: &UserContext) -> Result<Vec<Note>, EngineError> {
        self.store.notes_for_user(user.user_id)
    }

    pub fn delete_note(&self, user: &UserContext, note_id: i64) -> Result<bool, EngineError> {
        self.store.delete_note(user.user_id, note_id)
    }

    /// Every row of every user. Administrator accounts only.
    pub fn all_analyses(&self, user: &UserContext) -> Result<Vec<Analysis>, EngineError> {
        if !user.is_admin() {
            return Err(EngineError::NotAuthorized);
        }
        self.store.all_analyses()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{ROLE_ADMIN, ROLE_STANDARD};
    use std::collections::HashMap;

    fn engine_with_user() -> (AnalysisEngine, UserContext) {
        let store = Store::open_in_memory().unwrap();
        let user_id = store
            .insert_user("Ana", "ana@lab.example", "hash", ROLE_STANDARD)
            .unwrap();
        let user = UserContext {
            user_id,
            name: "Ana".to_string(),
            role: ROLE_STANDARD.to_string(),
        };
        (AnalysisEngine::new(store), user)
    }

    fn moisture_form(sample: &str, triples: [[f64; 3]; 3]) -> TriplicateForm {
        let mut form = TriplicateForm::new(sample);
        for [container, wet, dry] in triples {
            let mut fields = HashMap::new();
            fields.insert("container".to_string(), container.to_string());
            fields.insert("wet_with_container".to_string(), wet.to_string());
            fields.insert("dry_with_container".to_string(), dry.to_string());
            form.add_replicate(fields);
        }
        form
    }

    // container 10, wet 30: dry 26.0/26.2/25.8 gives 20%, 19%, 21%
    fn standard_moisture(sample: &str) -> TriplicateForm {
        moisture_form(
            sample,
            [[10.0, 30.0, 26.0], [10.0, 30.0, 26.2], [10.0, 30.0, 25.8]],
        )
    }

    #[test]
    fn recording_the_derived_method_is_rejected() {
        let (engine, user) = engine_with_user();
        let form = TriplicateForm::new("flour");
        let err = engine
            .record_triplicate(&user, Method::Carbohydrate, &form)
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation { field } if field == "method"));
    }

    #[test]
    fn incomplete_form_names_the_first_missing_field() {
        let (engine, user) = engine_with_user();
        let form = TriplicateForm::new("flour");
        let err = engine
            .record_triplicate(&user, Method::Moisture, &form)
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation { field } if field == "container_r1"));
    }

    #[test]
    fn recording_aggregates_and_stores() {
        let (engine, user) = engine_with_user();
        let row = engine
            .record_triplicate(&user, Method::Moisture, &standard_moisture("flour"))
            .unwrap();
        assert_eq!(row.mean, 20.0);
        assert_eq!(row.std_dev, 1.0);
        assert_eq!(row.coef_var, 5.0);
        assert_eq!(row.value2, 19.0);
    }

    #[test]
    fn rerecording_drops_the_derived_row() {
        let (engine, user) = engine_with_user();
        engine
            .record_triplicate(&user, Method::Moisture, &standard_moisture("flour"))
            .unwrap();
        engine.store().insert_derived(user.user_id, "flour", 61.84).unwrap();
        assert!(engine.store().has_derived(user.user_id, "flour").unwrap());

        engine
            .record_triplicate(&user, Method::Moisture, &standard_moisture("flour"))
            .unwrap();
        assert!(!engine.store().has_derived(user.user_id, "flour").unwrap());
    }

    #[test]
    fn deleting_a_mandatory_fraction_drops_the_derived_row() {
        let (engine, user) = engine_with_user();
        engine
            .record_triplicate(&user, Method::Moisture, &standard_moisture("flour"))
            .unwrap();
        engine.store().insert_derived(user.user_id, "flour", 61.84).unwrap();

        assert!(engine.delete_analysis(&user, "flour", Method::Moisture).unwrap());
        assert!(!engine.store().has_derived(user.user_id, "flour").unwrap());
        assert!(!engine.delete_analysis(&user, "flour", Method::Moisture).unwrap());
    }

    #[test]
    fn derivation_without_all_fractions_is_not_computable() {
        let (engine, user) = engine_with_user();
        engine
            .record_triplicate(&user, Method::Moisture, &standard_moisture("flour"))
            .unwrap();
        assert_eq!(
            engine.derive_carbohydrate(&user, "flour").unwrap(),
            CarbohydrateOutcome::NotComputable
        );
    }

    #[test]
    fn overview_marks_missing_fractions() {
        let (engine, user) = engine_with_user();
        engine
            .record_triplicate(&user, Method::Moisture, &standard_moisture("flour"))
            .unwrap();
        let overview = engine.sample_overview(&user, "flour").unwrap();
        assert_eq!(overview.fractions[0], (Method::Moisture, Some(20.0)));
        assert_eq!(overview.fractions[1], (Method::Ash, None));
        assert_eq!(overview.energy_kcal, None);
        assert!(overview.summary().contains("Ash: not recorded"));
        assert!(overview.summary().contains("Energy value: not computable"));
    }

    #[test]
    fn blank_note_title_is_rejected() {
        let (engine, user) = engine_with_user();
        let err = engine.add_note(&user, "   ", "body").unwrap_err();
        assert!(matches!(err, EngineError::Validation { field } if field == "title"));
    }

    #[test]
    fn cross_user_listing_needs_the_admin_role() {
        let (engine, user) = engine_with_user();
        assert!(matches!(
            engine.all_analyses(&user),
            Err(EngineError::NotAuthorized)
        ));

        let admin_id = engine
            .store()
            .insert_user("Root", "root@lab.example", "hash", ROLE_ADMIN)
            .unwrap();
        let admin = UserContext {
            user_id: admin_id,
            name: "Root".to_string(),
            role: ROLE_ADMIN.to_string(),
        };
        engine
            .record_triplicate(&user, Method::Moisture, &standard_moisture("flour"))
            .unwrap();
        let rows = engine.all_analyses(&admin).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].user_id, user.user_id);
    }
}
