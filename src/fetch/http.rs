//! Shared HTTP plumbing for fetchers: a preconfigured client and a
//! bounded file download helper.

use std::path::Path;
use std::time::Duration;

use reqwest::Client;

use crate::error::DownloadError;

/// User-Agent sent on all outbound requests.
pub const USER_AGENT: &str = "structforge/0.1";

/// Build a reqwest client with the given request timeout.
pub fn client(timeout: Duration) -> Client {
    Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()
        .unwrap_or_else(|_| Client::new())
}

/// Download `url` to `destination` with an overall timeout.
///
/// The destination's parent directory must already exist; downloads
/// never create directory structure on their own.
pub async fn download_file(
    client: &Client,
    url: &str,
    destination: &Path,
    timeout: Duration,
) -> Result<(), DownloadError> {
    if let Some(parent) = destination.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            return Err(DownloadError::MissingDestination(parent.to_path_buf()));
        }
    }

    let transfer = async {
        let response = client
            .get(url)
            .send()
            .await
            .map_err(|e| DownloadError::Http(e.to_string()))?;
        if !response.status().is_success() {
            return Err(DownloadError::Http(format!(
                "GET {url} returned HTTP {}",
                response.status()
            )));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| DownloadError::Http(e.to_string()))?;
        tokio::fs::write(destination, &bytes).await?;
        Ok(())
    };

    tokio::time::timeout(timeout, transfer)
        .await
        .map_err(|_| DownloadError::Timeout {
            seconds: timeout.as_secs(),
        })?
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[tokio::test]
    async fn missing_destination_directory_is_an_error() {
        let client = client(Duration::from_secs(1));
        let dest = PathBuf::from("/nonexistent-structforge-dir/file.bin");
        let err = download_file(&client, "http://127.0.0.1:9/never", &dest, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::MissingDestination(_)));
    }
}
