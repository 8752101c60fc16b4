use crate::error::{ProcessingError, Result};
use crate::utils::constants::{DOWNLOAD_MAX_RETRIES, DOWNLOAD_RETRY_BASE_DELAY_MS};
use futures::StreamExt;
use reqwest::Client;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

/// Retrieves a bulletin or catalog document to a local file.
///
/// HTTP(S) sources are streamed to disk with exponential-backoff retries;
/// anything else is treated as a filesystem path and passed through, which
/// is how already-downloaded bulletins are reprocessed.
pub struct Fetcher {
    client: Client,
    max_retries: u32,
    base_delay: Duration,
}

impl Fetcher {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(600))
            .connect_timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            max_retries: DOWNLOAD_MAX_RETRIES,
            base_delay: Duration::from_millis(DOWNLOAD_RETRY_BASE_DELAY_MS),
        })
    }

    /// Fetch `source` into `work_dir`, returning the local path and how
    /// long the transfer took. Local paths are returned as-is with a zero
    /// duration.
    pub async fn fetch(&self, source: &str, work_dir: &Path) -> Result<(PathBuf, Duration)> {
        if !source.starts_with("http://") && !source.starts_with("https://") {
            let path = PathBuf::from(source);
            if !path.exists() {
                return Err(ProcessingError::Config(format!(
                    "local source '{}' does not exist",
                    source
                )));
            }
            return Ok((path, Duration::ZERO));
        }

        let filename = source
            .rsplit('/')
            .next()
            .filter(|name| !name.is_empty())
            .unwrap_or("download.bin");
        let target = work_dir.join(filename);

        let started = Instant::now();
        let mut attempt = 0;
        let mut delay = self.base_delay;

        loop {
            match self.stream_to_file(source, &target).await {
                Ok(bytes) => {
                    info!(
                        url = source,
                        bytes,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "download complete"
                    );
                    return Ok((target, started.elapsed()));
                }
                Err(e) => {
                    attempt += 1;
                    if attempt > self.max_retries {
                        return Err(e);
                    }
                    warn!(
                        url = source,
                        attempt,
                        max_retries = self.max_retries,
                        error = %e,
                        "download failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
            }
        }
    }

    async fn stream_to_file(&self, url: &str, target: &Path) -> Result<u64> {
        let response = self.client.get(url).send().await?.error_for_status()?;

        let mut file = File::create(target).await?;
        let mut stream = response.bytes_stream();
        let mut written = 0u64;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }

        file.flush().await?;
        Ok(written)
    }
}
