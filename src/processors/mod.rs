pub mod pipeline;

pub use pipeline::{IngestOptions, IngestReport, Pipeline};
