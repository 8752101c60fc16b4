use crate::error::Result;
use reqwest::{header, Client, StatusCode};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

/// Outcome of one HEAD probe against a bulletin URL.
#[derive(Debug, Clone)]
pub struct Availability {
    pub available: bool,
    pub last_modified: Option<String>,
    pub content_length: Option<u64>,
}

/// Probe whether a bulletin has been published.
///
/// A bulletin counts as available only when the server answers 200 AND
/// reports both Last-Modified and Content-Length; the feed briefly serves
/// placeholder responses without them while a run is being uploaded.
pub async fn probe(client: &Client, url: &str) -> Result<Availability> {
    let response = match client.head(url).send().await {
        Ok(response) => response,
        Err(e) => {
            debug!(url, error = %e, "probe request failed");
            return Ok(Availability {
                available: false,
                last_modified: None,
                content_length: None,
            });
        }
    };

    let last_modified = response
        .headers()
        .get(header::LAST_MODIFIED)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());
    let content_length = response
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse().ok());

    let available = response.status() == StatusCode::OK
        && last_modified.is_some()
        && content_length.is_some();

    Ok(Availability {
        available,
        last_modified,
        content_length,
    })
}

/// Poll `url` every `interval` until it becomes available or a message
/// arrives on `done`. Returns `None` when stopped externally.
pub async fn watch(
    client: &Client,
    url: &str,
    interval: Duration,
    done: &mut mpsc::Receiver<()>,
) -> Result<Option<Availability>> {
    let first = probe(client, url).await?;
    if first.available {
        return Ok(Some(first));
    }

    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await; // first tick fires immediately
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let result = probe(client, url).await?;
                if result.available {
                    return Ok(Some(result));
                }
                debug!(url, "bulletin not yet available");
            }
            _ = done.recv() => return Ok(None),
        }
    }
}
