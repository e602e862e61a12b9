use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::Deserialize;

use crate::domain::MediaItem;
use crate::error::ArchiverError;

/// Ordered, paginated view of the remote catalog. Enumeration is ascending by
/// creation time, ties broken by the service; an empty page ends the
/// enumeration.
pub trait CatalogClient: Send + Sync {
    /// Reachability probe; fatal before any work begins.
    fn ping(&self) -> Result<(), ArchiverError>;

    /// Fetch one page of items, 1-based. Any transport or parse error is
    /// fatal to the run: resume state is unaffected by a failed fetch, so the
    /// whole pass can simply be re-invoked.
    fn fetch_page(&self, page: u32, page_size: u32) -> Result<Vec<MediaItem>, ArchiverError>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CatalogPage {
    #[serde(default)]
    items: Vec<CatalogItemDto>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CatalogItemDto {
    id: String,
    #[serde(default)]
    original_path: Option<String>,
    #[serde(default)]
    original_file_name: Option<String>,
    #[serde(default)]
    file_created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    file_size_in_byte: Option<u64>,
}

impl CatalogItemDto {
    /// Missing metadata is recovered with documented defaults rather than
    /// failing the item: 0 bytes, display name falling back to the id.
    fn into_item(self) -> Result<MediaItem, ArchiverError> {
        let id = self
            .id
            .parse()
            .map_err(|_| ArchiverError::CatalogHttp("catalog item has an empty id".to_string()))?;
        let display_name = self
            .original_file_name
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| self.id.trim().to_string());
        Ok(MediaItem {
            id,
            size_bytes: self.file_size_in_byte.unwrap_or(0),
            display_name,
            original_path: self.original_path.unwrap_or_default(),
            created_at: self.file_created_at.unwrap_or_else(|| {
                DateTime::<Utc>::from_timestamp(0, 0).unwrap_or_else(Utc::now)
            }),
        })
    }
}

#[derive(Clone)]
pub struct CatalogHttpClient {
    client: Client,
    base_url: String,
}

impl CatalogHttpClient {
    pub fn new(base_url: &str, api_key: &str) -> Result<Self, ArchiverError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("lumo-ma/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| ArchiverError::CatalogHttp(err.to_string()))?,
        );
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(api_key.trim())
                .map_err(|err| ArchiverError::CatalogHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|err| ArchiverError::CatalogHttp(err.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn ping_url(&self) -> String {
        format!("{}/api/server/ping", self.base_url)
    }

    fn page_url(&self, page: u32, page_size: u32) -> String {
        format!(
            "{}/api/items?order=asc&page={page}&pageSize={page_size}",
            self.base_url
        )
    }

    fn handle_status(
        response: reqwest::blocking::Response,
    ) -> Result<reqwest::blocking::Response, ArchiverError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| "catalog request failed".to_string());
        Err(ArchiverError::CatalogStatus { status, message })
    }

    fn send_with_retries<F>(
        &self,
        mut make_req: F,
    ) -> Result<reqwest::blocking::Response, ArchiverError>
    where
        F: FnMut() -> reqwest::blocking::RequestBuilder,
    {
        const MAX_RETRIES: usize = 3;
        const BASE_DELAY_MS: u64 = 200;
        let mut attempt = 0usize;
        loop {
            let response = make_req().send();
            match response {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < MAX_RETRIES && is_retryable_status(status) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < MAX_RETRIES && is_retryable_error(&err) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Err(ArchiverError::CatalogHttp(err.to_string()));
                }
            }
        }
    }
}

impl CatalogClient for CatalogHttpClient {
    fn ping(&self) -> Result<(), ArchiverError> {
        let url = self.ping_url();
        let response = self
            .send_with_retries(|| self.client.get(&url))
            .map_err(|err| ArchiverError::Probe(err.to_string()))?;
        if !response.status().is_success() {
            return Err(ArchiverError::Probe(format!(
                "catalog at {} returned status {}",
                self.base_url,
                response.status().as_u16()
            )));
        }
        Ok(())
    }

    fn fetch_page(&self, page: u32, page_size: u32) -> Result<Vec<MediaItem>, ArchiverError> {
        let url = self.page_url(page, page_size);
        let response = self.send_with_retries(|| self.client.get(&url))?;
        let response = Self::handle_status(response)?;
        let payload: CatalogPage = response
            .json()
            .map_err(|err| ArchiverError::CatalogHttp(err.to_string()))?;
        payload
            .items
            .into_iter()
            .map(CatalogItemDto::into_item)
            .collect()
    }
}

/// Lazy item stream over a paginated client: yields items one by one,
/// fetching the next page only when the buffered one runs out.
pub struct ItemPager<'a, C: CatalogClient + ?Sized> {
    client: &'a C,
    page_size: u32,
    next_page: u32,
    buffer: std::vec::IntoIter<MediaItem>,
    exhausted: bool,
}

impl<'a, C: CatalogClient + ?Sized> ItemPager<'a, C> {
    pub fn new(client: &'a C, page_size: u32) -> Self {
        Self {
            client,
            page_size,
            next_page: 1,
            buffer: Vec::new().into_iter(),
            exhausted: false,
        }
    }
}

impl<C: CatalogClient + ?Sized> Iterator for ItemPager<'_, C> {
    type Item = Result<MediaItem, ArchiverError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.buffer.next() {
                return Some(Ok(item));
            }
            if self.exhausted {
                return None;
            }
            match self.client.fetch_page(self.next_page, self.page_size) {
                Ok(items) => {
                    if items.is_empty() {
                        self.exhausted = true;
                        return None;
                    }
                    self.next_page += 1;
                    self.buffer = items.into_iter();
                }
                Err(err) => {
                    self.exhausted = true;
                    return Some(Err(err));
                }
            }
        }
    }
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_payload_deserializes_with_missing_fields() {
        let payload = r#"{
            "items": [
                {
                    "id": "a1",
                    "originalPath": "/upload/a1.jpg",
                    "originalFileName": "beach.jpg",
                    "fileCreatedAt": "2020-01-01T00:00:00Z",
                    "fileSizeInByte": 1234
                },
                { "id": "a2" }
            ]
        }"#;
        let page: CatalogPage = serde_json::from_str(payload).unwrap();
        let items: Vec<MediaItem> = page
            .items
            .into_iter()
            .map(|dto| dto.into_item().unwrap())
            .collect();

        assert_eq!(items[0].id.as_str(), "a1");
        assert_eq!(items[0].size_bytes, 1234);
        assert_eq!(items[0].display_name, "beach.jpg");

        // Missing metadata falls back to documented defaults.
        assert_eq!(items[1].size_bytes, 0);
        assert_eq!(items[1].display_name, "a2");
        assert_eq!(items[1].original_path, "");
    }

    #[test]
    fn empty_id_is_rejected() {
        let dto: CatalogItemDto = serde_json::from_str(r#"{ "id": " " }"#).unwrap();
        assert!(dto.into_item().is_err());
    }

    #[test]
    fn pager_walks_pages_lazily() {
        struct Fixed;

        impl CatalogClient for Fixed {
            fn ping(&self) -> Result<(), ArchiverError> {
                Ok(())
            }

            fn fetch_page(
                &self,
                page: u32,
                _page_size: u32,
            ) -> Result<Vec<MediaItem>, ArchiverError> {
                let ids: &[&str] = match page {
                    1 => &["a", "b"],
                    2 => &["c"],
                    _ => &[],
                };
                Ok(ids
                    .iter()
                    .map(|id| MediaItem {
                        id: id.parse().unwrap(),
                        size_bytes: 1,
                        display_name: id.to_string(),
                        original_path: format!("/{id}.jpg"),
                        created_at: chrono::Utc::now(),
                    })
                    .collect())
            }
        }

        let ids: Vec<String> = ItemPager::new(&Fixed, 2)
            .map(|item| item.unwrap().id.as_str().to_string())
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }
}
