use std::{env, io, path::Path};

use reqwest::header::{HeaderMap, HeaderValue, InvalidHeaderValue, ACCEPT, AUTHORIZATION};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("model file {path} is missing and {var} is not set")]
    MissingSource { path: String, var: &'static str },
    #[error("invalid GITHUB_TOKEN format: {0}")]
    InvalidToken(#[from] InvalidHeaderValue),
    #[error("failed to download {url}: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("failed to download {url}: {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },
    #[error("failed to write {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: io::Error,
    },
}

async fn download_file(url: &str, path: &str) -> Result<(), DownloadError> {
    info!(%url, %path, "downloading model artifact");

    let mut header_map = HeaderMap::new();
    if let Ok(token) = env::var("GITHUB_TOKEN") {
        header_map.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", token))?,
        );
    }
    header_map.insert(ACCEPT, HeaderValue::from_static("application/octet-stream"));

    let request_error = |source| DownloadError::Request {
        url: url.to_string(),
        source,
    };
    let response = reqwest::Client::new()
        .get(url)
        .headers(header_map)
        .send()
        .await
        .map_err(request_error)?;

    if !response.status().is_success() {
        return Err(DownloadError::Status {
            url: url.to_string(),
            status: response.status(),
        });
    }

    let bytes = response.bytes().await.map_err(request_error)?;

    let write_error = |source| DownloadError::Write {
        path: path.to_string(),
        source,
    };
    if let Some(parent) = Path::new(path).parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(write_error)?;
    }
    tokio::fs::write(path, bytes).await.map_err(write_error)
}

/// Fetches a model artifact from `url` when it is not already on disk.
/// `var` names the variable the URL came from, for the error message.
pub async fn ensure_model_exists(
    path: &str,
    url: Option<&str>,
    var: &'static str,
) -> Result<(), DownloadError> {
    info!(%path, "checking model");
    if Path::new(path).exists() {
        return Ok(());
    }

    match url {
        Some(url) => download_file(url, path).await,
        None => Err(DownloadError::MissingSource {
            path: path.to_string(),
            var,
        }),
    }
}

/// Checks the filename suffix only; the content is not inspected.
pub fn is_allowed_file(filename: &str, allowed: &[String]) -> bool {
    match filename.rsplit_once('.') {
        Some((_, ext)) => {
            let ext = ext.to_lowercase();
            allowed.iter().any(|a| *a == ext)
        }
        None => false,
    }
}
