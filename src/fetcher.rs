use std::fs::{self, File};
use std::time::Duration;

use camino::Utf8Path;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};

use crate::domain::ItemId;
use crate::error::ArchiverError;

/// Retrieves the original binary content of a single item. No internal retry:
/// any transport failure is surfaced verbatim and is fatal for the run.
pub trait ItemFetcher: Send + Sync {
    fn fetch(&self, id: &ItemId, destination: &Utf8Path) -> Result<(), ArchiverError>;
}

#[derive(Clone)]
pub struct HttpItemFetcher {
    client: Client,
    base_url: String,
}

impl HttpItemFetcher {
    pub fn new(base_url: &str, api_key: &str) -> Result<Self, ArchiverError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("lumo-ma/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| ArchiverError::FetchHttp(err.to_string()))?,
        );
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(api_key.trim())
                .map_err(|err| ArchiverError::FetchHttp(err.to_string()))?,
        );
        // No overall timeout: a large video on a slow link may legitimately
        // take longer than any fixed deadline. Callers wrap the run if they
        // need one.
        let client = Client::builder()
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|err| ArchiverError::FetchHttp(err.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn original_url(&self, id: &ItemId) -> String {
        format!("{}/api/items/{}/original", self.base_url, id.as_str())
    }
}

impl ItemFetcher for HttpItemFetcher {
    fn fetch(&self, id: &ItemId, destination: &Utf8Path) -> Result<(), ArchiverError> {
        let url = self.original_url(id);
        let response = self
            .client
            .get(&url)
            .send()
            .map_err(|err| ArchiverError::FetchHttp(err.to_string()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "item transfer failed".to_string());
            return Err(ArchiverError::FetchStatus { status, message });
        }

        // Stream to a .part file and rename on success so a killed transfer
        // never leaves a plausible-looking final file behind.
        let part_path = destination.with_extension(match destination.extension() {
            Some(ext) => format!("{ext}.part"),
            None => "part".to_string(),
        });
        let mut response = response;
        let mut file = File::create(part_path.as_std_path())
            .map_err(|err| ArchiverError::Filesystem(err.to_string()))?;
        std::io::copy(&mut response, &mut file)
            .map_err(|err| ArchiverError::FetchHttp(err.to_string()))?;
        fs::rename(part_path.as_std_path(), destination.as_std_path())
            .map_err(|err| ArchiverError::Filesystem(err.to_string()))?;
        Ok(())
    }
}
