pub mod availability;
pub mod fetcher;
pub mod kmz;

pub use availability::{probe, watch, Availability};
pub use fetcher::Fetcher;
pub use kmz::extract_kml;
