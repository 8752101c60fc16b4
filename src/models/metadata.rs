use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One upstream model run referenced by the bulletin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferencedModel {
    pub name: String,
    pub reference_time: DateTime<Utc>,
}

/// Run-global facts from the bulletin's ProductDefinition element.
///
/// The timestep calendar is positional: the n-th token of every variable's
/// raw value string belongs to `timesteps[n]`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProductInfo {
    pub issuer: String,
    pub product_id: String,
    pub generating_process: String,
    pub default_undef_sign: String,
    pub timesteps: Vec<DateTime<Utc>>,
    pub referenced_models: Vec<ReferencedModel>,
}

/// Everything persisted about one generation besides its rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMetadata {
    pub source_url: String,
    pub download_duration_ms: i64,
    pub parse_duration_ms: i64,
    pub parser: String,
    pub issuer: String,
    pub product_id: String,
    pub generating_process: String,
    pub available_variables: Vec<String>,
    pub timesteps: Vec<DateTime<Utc>>,
    pub referenced_models: Vec<ReferencedModel>,
}

impl RunMetadata {
    /// Identifies this implementation in the persisted metadata row.
    pub fn parser_name() -> String {
        format!("mosmix-processor/{}", env!("CARGO_PKG_VERSION"))
    }
}
