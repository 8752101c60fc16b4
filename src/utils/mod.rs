pub mod constants;
pub mod progress;
pub mod urls;

pub use constants::*;
pub use progress::ProgressReporter;
pub use urls::{bulletin_url, catalog_url, BulletinVariant};
