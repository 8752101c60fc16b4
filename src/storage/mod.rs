pub mod sqlite;

pub use sqlite::SqliteStore;

use crate::error::Result;
use crate::models::{ElementDefinition, ForecastPlace, RunMetadata};
use crate::utils::constants::VALIDITY_WINDOW_TOLERANCE_SECS;
use chrono::{DateTime, Duration, Utc};

/// Lifecycle state of a generation.
///
/// Exactly one generation is `Active` per dataset; `Staging` generations
/// are invisible to readers and `Retired` ones only exist transiently
/// between two activations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationState {
    Staging,
    Active,
    Retired,
}

impl GenerationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            GenerationState::Staging => "staging",
            GenerationState::Active => "active",
            GenerationState::Retired => "retired",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "staging" => Some(GenerationState::Staging),
            "active" => Some(GenerationState::Active),
            "retired" => Some(GenerationState::Retired),
            _ => None,
        }
    }
}

/// One run of the pipeline: a uniquely identified staging area that may
/// later become the active dataset.
#[derive(Debug, Clone)]
pub struct Generation {
    /// Sortable timestamp-derived identifier (`YYYYMMDDHHMMSS`, UTC), used
    /// both as table-name suffix and against the validity window. Unique
    /// per run; two runs started in the same second are a defined failure
    /// callers avoid by serializing runs.
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub state: GenerationState,
}

impl Generation {
    pub fn new(created_at: DateTime<Utc>) -> Self {
        Self {
            id: created_at.format("%Y%m%d%H%M%S").to_string(),
            created_at,
            state: GenerationState::Staging,
        }
    }

    /// Validity window: creation timestamp plus/minus a small tolerance.
    /// Every row of the generation must carry a timestamp inside it.
    pub fn validity_window(&self) -> (DateTime<Utc>, DateTime<Utc>) {
        let tolerance = Duration::seconds(VALIDITY_WINDOW_TOLERANCE_SECS);
        (self.created_at - tolerance, self.created_at + tolerance)
    }
}

/// The single polymorphic storage capability set: staging create/append/
/// activate/list/drop, with the all-or-nothing visibility guarantee living
/// behind `activate`.
pub trait GenerationStore {
    /// Allocate a fresh generation with isolated staging storage.
    fn begin_generation(&mut self) -> Result<Generation>;

    /// Write one place row plus its readings, grouped so a failure never
    /// leaves the place half-written.
    fn insert_place(&mut self, generation: &Generation, place: &ForecastPlace) -> Result<()>;

    fn insert_elements(
        &mut self,
        generation: &Generation,
        elements: &[ElementDefinition],
    ) -> Result<()>;

    fn insert_run_metadata(
        &mut self,
        generation: &Generation,
        metadata: &RunMetadata,
    ) -> Result<()>;

    /// Atomically make the generation the current dataset and retire every
    /// other one. Before this returns, readers see exactly the previous
    /// generation; after, exactly this one.
    fn activate(&mut self, generation: &Generation) -> Result<()>;

    /// Regenerate the pivoted wide view for the given variable set.
    /// Returns whether the view definition actually changed. Best-effort:
    /// callers must not treat failure as fatal to an activated generation.
    fn rebuild_wide_view(&mut self, variables: &[String]) -> Result<bool>;

    fn list_generations(&self) -> Result<Vec<Generation>>;

    /// Remove a staging generation after a failed run. Never touches the
    /// active generation.
    fn discard(&mut self, generation: &Generation) -> Result<()>;
}
