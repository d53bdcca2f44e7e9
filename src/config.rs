use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::coordinator::{CoordinatorOptions, GetOptions};
use crate::error::FeedError;
use crate::fetch::ApiSettings;
use crate::store::FileStore;

pub const DEFAULT_CONFIG_FILE: &str = "collection-feed.json";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub api_base_url: Option<String>,
    #[serde(default)]
    pub page_size: Option<u32>,
    #[serde(default)]
    pub collections: Option<Vec<String>>,
    #[serde(default)]
    pub images_only: Option<bool>,
    #[serde(default)]
    pub cache_path: Option<String>,
    #[serde(default)]
    pub freshness_secs: Option<u64>,
    #[serde(default)]
    pub initial_pages: Option<u32>,
    #[serde(default)]
    pub total_pages: Option<u32>,
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
    #[serde(default)]
    pub bus_capacity: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub api: ApiSettings,
    pub cache_path: Utf8PathBuf,
    pub coordinator: CoordinatorOptions,
    pub pages: GetOptions,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Reads an explicit config path, or `collection-feed.json` when it exists.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, FeedError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Self::resolve_config(Config::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| FeedError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| FeedError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, FeedError> {
        let schema_version = config.schema_version.unwrap_or(1);
        let defaults = ApiSettings::default();
        let page_defaults = GetOptions::default();
        let coordinator_defaults = CoordinatorOptions::default();

        let page_size = config.page_size.unwrap_or(defaults.page_size);
        if page_size == 0 {
            return Err(FeedError::ConfigParse(
                "page_size must be at least 1".to_string(),
            ));
        }
        let initial_pages = config.initial_pages.unwrap_or(page_defaults.initial_pages);
        let total_pages = config.total_pages.unwrap_or(page_defaults.total_pages);
        if initial_pages == 0 {
            return Err(FeedError::ConfigParse(
                "initial_pages must be at least 1".to_string(),
            ));
        }
        if total_pages < initial_pages {
            return Err(FeedError::ConfigParse(format!(
                "total_pages ({total_pages}) must not be below initial_pages ({initial_pages})"
            )));
        }

        let cache_path = match config.cache_path {
            Some(path) => Utf8PathBuf::from(path),
            None => FileStore::default_path()?,
        };

        Ok(ResolvedConfig {
            schema_version,
            api: ApiSettings {
                base_url: config.api_base_url.unwrap_or(defaults.base_url),
                page_size,
                collections: config.collections.unwrap_or(defaults.collections),
                images_only: config.images_only.unwrap_or(defaults.images_only),
                timeout: config
                    .request_timeout_secs
                    .map(Duration::from_secs)
                    .unwrap_or(defaults.timeout),
            },
            cache_path,
            coordinator: CoordinatorOptions {
                freshness: config
                    .freshness_secs
                    .map(Duration::from_secs)
                    .unwrap_or(coordinator_defaults.freshness),
                bus_capacity: config
                    .bus_capacity
                    .unwrap_or(coordinator_defaults.bus_capacity),
            },
            pages: GetOptions {
                force_refresh: false,
                initial_pages,
                total_pages,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn resolve_defaults() {
        let config = Config {
            cache_path: Some("cache/vam_data.json".to_string()),
            ..Config::default()
        };

        let resolved = ConfigLoader::resolve_config(config).unwrap();
        assert_eq!(resolved.schema_version, 1);
        assert_eq!(resolved.api.page_size, 15);
        assert_eq!(resolved.api.collections, vec!["prints", "posters"]);
        assert_eq!(resolved.coordinator.freshness, Duration::from_secs(3600));
        assert_eq!(resolved.pages.initial_pages, 7);
        assert_eq!(resolved.pages.total_pages, 20);
        assert_eq!(resolved.cache_path, Utf8PathBuf::from("cache/vam_data.json"));
    }

    #[test]
    fn reject_inverted_page_counts() {
        let config = Config {
            initial_pages: Some(5),
            total_pages: Some(2),
            cache_path: Some("cache.json".to_string()),
            ..Config::default()
        };
        assert_matches!(
            ConfigLoader::resolve_config(config),
            Err(FeedError::ConfigParse(_))
        );
    }
}
