use serde::{Deserialize, Serialize};

/// Catalog entry describing a forecast variable, sourced from the
/// MetElementDefinition feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementDefinition {
    pub short_name: String,
    pub description: String,
    pub unit: String,
}

impl ElementDefinition {
    pub fn new(short_name: String, description: String, unit: String) -> Self {
        Self {
            short_name,
            description,
            unit,
        }
    }
}
