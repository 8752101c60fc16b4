/// Open-data endpoints
pub const OPENDATA_BASE_URL: &str = "https://opendata.dwd.de/weather/local_forecasts/mos";
pub const CATALOG_URL: &str = "https://opendata.dwd.de/weather/lib/MetElementDefinition.xml";

/// Validity window half-width applied at activation. Every staged row's
/// insertion timestamp must land within this many seconds of the
/// generation's creation time.
pub const VALIDITY_WINDOW_TOLERANCE_SECS: i64 = 300;

/// Network defaults
pub const DOWNLOAD_MAX_RETRIES: u32 = 3;
pub const DOWNLOAD_RETRY_BASE_DELAY_MS: u64 = 500;
pub const DEFAULT_CHECK_INTERVAL_SECS: u64 = 20;

/// IO defaults
pub const DEFAULT_BUFFER_SIZE: usize = 8192 * 16; // 128KB
