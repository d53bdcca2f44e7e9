use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::Deserialize;
use tracing::{debug, info};

use crate::domain::{PageRange, Record, SourceFields};
use crate::error::FeedError;

pub trait CollectionClient: Send + Sync {
    fn fetch_page(&self, page: u32) -> Result<Vec<Record>, FeedError>;

    /// Fetches every page in `range` in ascending order. The first failing
    /// page fails the whole call and earlier pages are discarded.
    fn fetch(&self, range: PageRange) -> Result<Vec<Record>, FeedError> {
        let mut records = Vec::new();
        for page in range.pages() {
            let batch = self.fetch_page(page)?;
            debug!(page, received = batch.len(), "fetched collection page");
            records.extend(batch);
        }
        info!(pages = %range, total = records.len(), "fetched collection pages");
        Ok(records)
    }
}

#[derive(Debug, Clone)]
pub struct ApiSettings {
    pub base_url: String,
    pub page_size: u32,
    pub collections: Vec<String>,
    pub images_only: bool,
    pub timeout: Duration,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.vam.ac.uk/v2/objects/search".to_string(),
            page_size: 15,
            collections: vec!["prints".to_string(), "posters".to_string()],
            images_only: true,
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Clone)]
pub struct VamHttpClient {
    client: Client,
    settings: ApiSettings,
}

impl VamHttpClient {
    pub fn new(settings: ApiSettings) -> Result<Self, FeedError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("collection-feed/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| FeedError::Client(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(settings.timeout)
            .build()
            .map_err(|err| FeedError::Client(err.to_string()))?;
        Ok(Self { client, settings })
    }

    fn query(&self, page: u32) -> Vec<(&'static str, String)> {
        let mut query = vec![("limit", self.settings.page_size.to_string())];
        if self.settings.images_only {
            query.push(("images", "true".to_string()));
        }
        for collection in &self.settings.collections {
            query.push(("collection", collection.clone()));
        }
        query.push(("page", page.to_string()));
        query
    }
}

impl CollectionClient for VamHttpClient {
    fn fetch_page(&self, page: u32) -> Result<Vec<Record>, FeedError> {
        debug!(page, url = %self.settings.base_url, "requesting collection page");
        let response = self
            .client
            .get(&self.settings.base_url)
            .query(&self.query(page))
            .send()
            .map_err(|err| FeedError::FetchHttp {
                page,
                message: err.to_string(),
            })?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "collection request failed".to_string());
            return Err(FeedError::FetchStatus {
                page,
                status,
                message,
            });
        }
        let body = response.text().map_err(|err| FeedError::FetchHttp {
            page,
            message: err.to_string(),
        })?;
        parse_search_page(page, &body)
    }
}

#[derive(Debug, Deserialize)]
struct SearchPage {
    #[serde(default)]
    records: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    #[serde(rename = "systemNumber")]
    system_number: Option<String>,
    #[serde(rename = "objectType")]
    object_type: Option<String>,
    #[serde(rename = "_primaryTitle")]
    primary_title: Option<String>,
    #[serde(rename = "_primaryDate")]
    primary_date: Option<String>,
    #[serde(rename = "_primaryPlace")]
    primary_place: Option<String>,
    #[serde(rename = "_primaryMaker")]
    primary_maker: Option<Maker>,
    #[serde(rename = "_images")]
    images: Option<Images>,
}

#[derive(Debug, Deserialize)]
struct Maker {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Images {
    #[serde(rename = "_iiif_image_base_url")]
    iiif_image_base_url: Option<String>,
}

impl From<SearchItem> for Record {
    fn from(item: SearchItem) -> Self {
        Record::from_source(SourceFields {
            id: item.system_number,
            object_type: item.object_type,
            title: item.primary_title,
            date: item.primary_date,
            place: item.primary_place,
            artist: item.primary_maker.and_then(|maker| maker.name),
            image_url: item.images.and_then(|images| images.iiif_image_base_url),
        })
    }
}

/// Maps one search response body into records.
pub fn parse_search_page(page: u32, body: &str) -> Result<Vec<Record>, FeedError> {
    let parsed: SearchPage = serde_json::from_str(body).map_err(|err| FeedError::FetchParse {
        page,
        message: err.to_string(),
    })?;
    Ok(parsed.records.into_iter().map(Record::from).collect())
}
