use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use camino::Utf8PathBuf;

use collection_feed::bus::NotificationBus;
use collection_feed::domain::{Record, SourceFields};
use collection_feed::error::FeedError;
use collection_feed::fetch::CollectionClient;
use collection_feed::refill::{CancelToken, RefillPlan, run_refill, spawn_refiller};
use collection_feed::store::{FileStore, SnapshotStore};

#[derive(Default)]
struct ScriptedClient {
    pages: HashMap<u32, Vec<Record>>,
    failing: HashSet<u32>,
    cancel_on: Option<(u32, CancelToken)>,
    calls: Mutex<Vec<u32>>,
}

impl ScriptedClient {
    fn with_pages(pages: impl IntoIterator<Item = u32>, per_page: usize) -> Self {
        Self {
            pages: pages
                .into_iter()
                .map(|page| (page, page_records(page, per_page)))
                .collect(),
            ..Self::default()
        }
    }

    fn calls(&self) -> Vec<u32> {
        self.calls.lock().unwrap().clone()
    }
}

impl CollectionClient for ScriptedClient {
    fn fetch_page(&self, page: u32) -> Result<Vec<Record>, FeedError> {
        self.calls.lock().unwrap().push(page);
        if let Some((trigger, token)) = &self.cancel_on {
            if *trigger == page {
                token.cancel();
            }
        }
        if self.failing.contains(&page) {
            return Err(FeedError::FetchHttp {
                page,
                message: "connection reset".to_string(),
            });
        }
        Ok(self.pages.get(&page).cloned().unwrap_or_default())
    }
}

fn page_records(page: u32, count: usize) -> Vec<Record> {
    (0..count)
        .map(|i| {
            Record::from_source(SourceFields {
                id: Some(format!("p{page}-{i}")),
                date: Some(format!("{}", 1800 + page)),
                ..SourceFields::default()
            })
        })
        .collect()
}

fn seeded_store(temp: &tempfile::TempDir, seed: usize) -> Arc<FileStore> {
    let path = Utf8PathBuf::from_path_buf(temp.path().join("vam_data.json")).unwrap();
    let store = FileStore::open(path).unwrap();
    store.write_full(page_records(1, seed)).unwrap();
    Arc::new(store)
}

#[test]
fn refill_grows_snapshot_by_every_fetched_page() {
    let temp = tempfile::tempdir().unwrap();
    let store = seeded_store(&temp, 4);
    let client = ScriptedClient::with_pages(2..=5, 3);
    let bus = NotificationBus::new(16);
    let events = bus.subscribe();

    let report = run_refill(
        &client,
        store.as_ref(),
        &bus,
        RefillPlan {
            generation: 1,
            after: 1,
            through: 5,
        },
        &CancelToken::new(),
    );

    assert_eq!(report.appended_pages, vec![2, 3, 4, 5]);
    assert_eq!(report.records_appended, 12);
    assert_eq!(store.load().unwrap().unwrap().len(), 4 + 12);
    assert_eq!(client.calls(), vec![2, 3, 4, 5]);

    let received = events.try_iter().collect::<Vec<_>>();
    assert_eq!(received.len(), 4);
    assert_eq!(received[0].page, 2);
    assert_eq!(received[0].records.len(), 3);
    assert_eq!(received[0].total, 7);
    assert_eq!(received[3].total, 16);
}

#[test]
fn failed_page_is_skipped_and_walk_continues() {
    let temp = tempfile::tempdir().unwrap();
    let store = seeded_store(&temp, 2);
    let mut client = ScriptedClient::with_pages(2..=4, 2);
    client.failing.insert(3);
    let bus = NotificationBus::new(16);
    let events = bus.subscribe();

    let report = run_refill(
        &client,
        store.as_ref(),
        &bus,
        RefillPlan {
            generation: 1,
            after: 1,
            through: 4,
        },
        &CancelToken::new(),
    );

    assert_eq!(report.appended_pages, vec![2, 4]);
    assert_eq!(report.failed_pages, vec![3]);
    assert_eq!(client.calls(), vec![2, 3, 4]);
    assert_eq!(store.load().unwrap().unwrap().len(), 2 + 4);
    let pages = events.try_iter().map(|event| event.page).collect::<Vec<_>>();
    assert_eq!(pages, vec![2, 4]);
}

#[test]
fn cancellation_stops_between_pages() {
    let temp = tempfile::tempdir().unwrap();
    let store = seeded_store(&temp, 1);
    let cancel = CancelToken::new();
    let mut client = ScriptedClient::with_pages(2..=6, 1);
    client.cancel_on = Some((3, cancel.clone()));
    let bus = NotificationBus::new(16);

    let report = run_refill(
        &client,
        store.as_ref(),
        &bus,
        RefillPlan {
            generation: 1,
            after: 1,
            through: 6,
        },
        &cancel,
    );

    assert!(report.cancelled);
    assert_eq!(report.appended_pages, vec![2, 3]);
    assert_eq!(client.calls(), vec![2, 3]);
    assert_eq!(store.load().unwrap().unwrap().len(), 3);
}

#[test]
fn superseded_generation_stops_refill() {
    let temp = tempfile::tempdir().unwrap();
    let store = seeded_store(&temp, 1);
    store.write_full(page_records(1, 2)).unwrap();
    let client = ScriptedClient::with_pages(2..=3, 1);
    let bus = NotificationBus::new(16);

    let report = run_refill(
        &client,
        store.as_ref(),
        &bus,
        RefillPlan {
            generation: 1,
            after: 1,
            through: 3,
        },
        &CancelToken::new(),
    );

    assert!(report.superseded);
    assert!(report.appended_pages.is_empty());
    assert_eq!(client.calls(), vec![2]);
    assert_eq!(store.load().unwrap().unwrap().len(), 2);
}

#[test]
fn slow_subscriber_does_not_stall_refill() {
    let temp = tempfile::tempdir().unwrap();
    let store = seeded_store(&temp, 1);
    let client = Arc::new(ScriptedClient::with_pages(2..=9, 1));
    let bus = Arc::new(NotificationBus::new(1));
    let _never_read = bus.subscribe();

    let handle = spawn_refiller(
        client,
        store.clone(),
        bus.clone(),
        RefillPlan {
            generation: 1,
            after: 1,
            through: 9,
        },
    );
    let report = handle.join();

    assert_eq!(report.appended_pages.len(), 8);
    assert_eq!(store.load().unwrap().unwrap().len(), 9);
    assert_eq!(bus.stats().dropped(), 7);
}

#[test]
fn spawned_refiller_can_be_cancelled() {
    let temp = tempfile::tempdir().unwrap();
    let store = seeded_store(&temp, 1);
    let client = Arc::new(ScriptedClient::with_pages(2..=3, 1));
    let bus = Arc::new(NotificationBus::new(4));

    let handle = spawn_refiller(
        client,
        store,
        bus,
        RefillPlan {
            generation: 1,
            after: 1,
            through: 3,
        },
    );
    handle.cancel();
    let report = handle.join();

    assert!(report.appended_pages.len() <= 2);
    assert!(report.cancelled || report.appended_pages.len() == 2);
}
