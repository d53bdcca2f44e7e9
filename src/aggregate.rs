use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, warn};

use crate::bus::NotificationBus;
use crate::domain::Record;
use crate::refill::{BatchAppended, CancelToken};
use crate::store::SnapshotStore;

/// Records handed to display surfaces at once.
pub const DISPLAY_LIMIT: usize = 30;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Aggregates {
    /// Record count per known year, ascending.
    pub histogram: BTreeMap<i32, usize>,
    /// Every object type and place seen.
    pub vocabulary: BTreeSet<String>,
}

pub fn summarize(records: &[Record]) -> Aggregates {
    let mut aggregates = Aggregates::default();
    for record in records {
        if let Some(year) = record.year {
            *aggregates.histogram.entry(year).or_default() += 1;
        }
        aggregates.vocabulary.insert(record.object_type.clone());
        aggregates.vocabulary.insert(record.place.clone());
    }
    aggregates
}

/// Records matching an exact year and a case-insensitive substring of
/// object type or place. An empty query does not filter.
pub fn filter_records<'a>(
    records: &'a [Record],
    year: Option<i32>,
    query: Option<&str>,
) -> Vec<&'a Record> {
    let needle = query
        .map(str::trim)
        .filter(|query| !query.is_empty())
        .map(str::to_lowercase);
    records
        .iter()
        .filter(|record| year.is_none_or(|year| record.year == Some(year)))
        .filter(|record| match &needle {
            Some(needle) => {
                record.object_type.to_lowercase().contains(needle.as_str())
                    || record.place.to_lowercase().contains(needle.as_str())
            }
            None => true,
        })
        .collect()
}

pub fn display_slice<T>(items: &[T]) -> &[T] {
    &items[..items.len().min(DISPLAY_LIMIT)]
}

/// Update pushed to display subscribers after each appended page.
#[derive(Debug, Clone, Serialize)]
pub struct CollectionUpdate {
    pub page: u32,
    pub total: usize,
    pub new_records: Vec<Record>,
    pub histogram: BTreeMap<i32, usize>,
    pub vocabulary: BTreeSet<String>,
}

/// Turns incremental batches into full-snapshot updates on a separate
/// thread, keeping aggregation off the refill path.
pub struct AggregateProjector {
    updates: Arc<NotificationBus<CollectionUpdate>>,
    cancel: CancelToken,
    handle: Option<thread::JoinHandle<usize>>,
}

impl AggregateProjector {
    pub fn spawn<S>(
        store: Arc<S>,
        batches: Receiver<BatchAppended>,
        updates: Arc<NotificationBus<CollectionUpdate>>,
    ) -> Self
    where
        S: SnapshotStore + ?Sized + 'static,
    {
        let cancel = CancelToken::new();
        let worker_cancel = cancel.clone();
        let worker_updates = updates.clone();
        let handle = thread::spawn(move || {
            let mut projected = 0usize;
            while !worker_cancel.is_cancelled() {
                let batch = match batches.recv_timeout(Duration::from_millis(100)) {
                    Ok(batch) => batch,
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => break,
                };
                let snapshot = match store.load() {
                    Ok(Some(snapshot)) => snapshot,
                    Ok(None) => continue,
                    Err(err) => {
                        warn!(page = batch.page, error = %err, "projector could not load snapshot");
                        continue;
                    }
                };
                let aggregates = summarize(&snapshot.records);
                let delivered = worker_updates.publish(CollectionUpdate {
                    page: batch.page,
                    total: snapshot.len(),
                    new_records: batch.records,
                    histogram: aggregates.histogram,
                    vocabulary: aggregates.vocabulary,
                });
                debug!(page = batch.page, delivered, "projected collection update");
                projected += 1;
            }
            projected
        });
        Self {
            updates,
            cancel,
            handle: Some(handle),
        }
    }

    pub fn subscribe(&self) -> Receiver<CollectionUpdate> {
        self.updates.subscribe()
    }

    /// Stops the projector and returns how many updates it published.
    pub fn stop(self) -> usize {
        self.cancel.cancel();
        self.join()
    }

    /// Waits until the batch source disconnects and every pending batch is projected.
    pub fn join(mut self) -> usize {
        self.handle
            .take()
            .and_then(|handle| handle.join().ok())
            .unwrap_or(0)
    }
}

impl Drop for AggregateProjector {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SourceFields;

    fn record(date: &str, object_type: &str, place: &str) -> Record {
        Record::from_source(SourceFields {
            date: Some(date.to_string()),
            object_type: Some(object_type.to_string()),
            place: Some(place.to_string()),
            ..SourceFields::default()
        })
    }

    #[test]
    fn histogram_counts_known_years_in_order() {
        let records = vec![
            record("1920s", "Poster", "London"),
            record("1850", "Print", "Paris"),
            record("1925", "Poster", "Paris"),
            record("Unknown", "Print", "Unknown"),
        ];
        let aggregates = summarize(&records);
        assert_eq!(
            aggregates.histogram.into_iter().collect::<Vec<_>>(),
            vec![(1850, 1), (1925, 2)]
        );
        assert!(aggregates.vocabulary.contains("Poster"));
        assert!(aggregates.vocabulary.contains("London"));
        assert!(aggregates.vocabulary.contains("Unknown"));
        assert_eq!(aggregates.vocabulary.len(), 5);
    }

    #[test]
    fn histogram_serializes_year_labels() {
        let aggregates = summarize(&[record("1901", "Print", "Rome")]);
        let json = serde_json::to_value(&aggregates).unwrap();
        assert_eq!(json["histogram"]["1901"], 1);
    }

    #[test]
    fn filter_by_year_and_query() {
        let records = vec![
            record("1901", "Poster", "London"),
            record("1901", "Print", "Paris"),
            record("1902", "Poster", "Paris"),
        ];
        assert_eq!(filter_records(&records, Some(1901), None).len(), 2);
        assert_eq!(filter_records(&records, None, Some("paris")).len(), 2);
        assert_eq!(filter_records(&records, Some(1901), Some("POSTER")).len(), 1);
        assert_eq!(filter_records(&records, None, Some("  ")).len(), 3);
        assert!(filter_records(&records, Some(1700), None).is_empty());
    }

    #[test]
    fn display_slice_caps_at_limit() {
        let items = (0..45).collect::<Vec<_>>();
        assert_eq!(display_slice(&items).len(), DISPLAY_LIMIT);
        assert_eq!(display_slice(&items[..3]).len(), 3);
    }
}
