pub mod element;
pub mod metadata;
pub mod place;

pub use element::ElementDefinition;
pub use metadata::{ProductInfo, ReferencedModel, RunMetadata};
pub use place::{ForecastPlace, Position, VariableReading};
