use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// 3-D WGS84 position as carried by a placemark's coordinate triple.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Validate)]
pub struct Position {
    #[validate(range(min = -180.0, max = 180.0))]
    pub longitude: f64,

    #[validate(range(min = -90.0, max = 90.0))]
    pub latitude: f64,

    pub altitude: f64,
}

/// One decoded value of a forecast variable at one timestep.
///
/// Undefined-sentinel slots from the source are never materialized as
/// readings, so every reading carries a real numeric value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableReading {
    pub variable: String,
    pub timestep: DateTime<Utc>,
    pub value: f64,
}

/// A fully decoded forecast location with all of its readings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastPlace {
    pub id: String,
    pub name: String,
    pub position: Position,
    pub readings: Vec<VariableReading>,
}

impl ForecastPlace {
    pub fn new(id: String, name: String, position: Position) -> Self {
        Self {
            id,
            name,
            position,
            readings: Vec::new(),
        }
    }
}
