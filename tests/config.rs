use std::time::Duration;

use assert_matches::assert_matches;

use collection_feed::config::ConfigLoader;
use collection_feed::error::FeedError;

#[test]
fn resolve_config_file() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("collection-feed.json");
    std::fs::write(
        &path,
        r#"{
            "page_size": 30,
            "collections": ["posters"],
            "cache_path": "data/cache.json",
            "freshness_secs": 120,
            "initial_pages": 2,
            "total_pages": 10
        }"#,
    )
    .unwrap();

    let resolved = ConfigLoader::resolve(path.to_str()).unwrap();
    assert_eq!(resolved.api.page_size, 30);
    assert_eq!(resolved.api.collections, vec!["posters"]);
    assert!(resolved.api.images_only);
    assert_eq!(resolved.cache_path.as_str(), "data/cache.json");
    assert_eq!(resolved.coordinator.freshness, Duration::from_secs(120));
    assert_eq!(resolved.pages.initial_pages, 2);
    assert_eq!(resolved.pages.total_pages, 10);
    assert!(!resolved.pages.force_refresh);
}

#[test]
fn missing_explicit_config_is_an_error() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("absent.json");
    assert_matches!(
        ConfigLoader::resolve(path.to_str()),
        Err(FeedError::ConfigRead(_))
    );
}

#[test]
fn malformed_config_is_an_error() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("broken.json");
    std::fs::write(&path, "{ \"page_size\": \"many\" }").unwrap();
    assert_matches!(
        ConfigLoader::resolve(path.to_str()),
        Err(FeedError::ConfigParse(_))
    );
}
