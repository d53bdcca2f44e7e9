use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info};

use crate::aggregate::{self, Aggregates};
use crate::bus::NotificationBus;
use crate::domain::{PageRange, Record};
use crate::error::FeedError;
use crate::fetch::CollectionClient;
use crate::refill::{BatchAppended, RefillHandle, RefillPlan, RefillReport, spawn_refiller};
use crate::store::{Snapshot, SnapshotStore};

#[derive(Debug, Clone)]
pub struct CoordinatorOptions {
    pub freshness: Duration,
    pub bus_capacity: usize,
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        Self {
            freshness: Duration::from_secs(60 * 60),
            bus_capacity: 64,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct GetOptions {
    pub force_refresh: bool,
    pub initial_pages: u32,
    pub total_pages: u32,
}

impl Default for GetOptions {
    fn default() -> Self {
        Self {
            force_refresh: false,
            initial_pages: 7,
            total_pages: 20,
        }
    }
}

/// How a `get` call was served.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServeAction {
    Cache,
    FullFetch,
}

#[derive(Debug, Clone)]
pub struct GetResult {
    pub snapshot: Snapshot,
    pub action: ServeAction,
}

/// Entry point for readers of the collection.
///
/// Serves the cached snapshot while it is fresh. Otherwise fetches the
/// first pages in the foreground, commits them as a new generation and
/// hands the remaining pages to a background refiller.
pub struct IngestionCoordinator<C: CollectionClient + ?Sized, S: SnapshotStore + ?Sized> {
    client: Arc<C>,
    store: Arc<S>,
    bus: Arc<NotificationBus<BatchAppended>>,
    options: CoordinatorOptions,
    refresh: Mutex<()>,
    refiller: Mutex<Option<RefillHandle>>,
}

impl<C, S> IngestionCoordinator<C, S>
where
    C: CollectionClient + ?Sized + 'static,
    S: SnapshotStore + ?Sized + 'static,
{
    pub fn new(client: Arc<C>, store: Arc<S>, options: CoordinatorOptions) -> Self {
        let bus = Arc::new(NotificationBus::new(options.bus_capacity));
        Self {
            client,
            store,
            bus,
            options,
            refresh: Mutex::new(()),
            refiller: Mutex::new(None),
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn bus(&self) -> &Arc<NotificationBus<BatchAppended>> {
        &self.bus
    }

    pub fn subscribe(&self) -> Receiver<BatchAppended> {
        self.bus.subscribe()
    }

    pub fn get(&self, options: GetOptions) -> Result<Snapshot, FeedError> {
        self.get_with_action(options).map(|result| result.snapshot)
    }

    pub fn get_with_action(&self, options: GetOptions) -> Result<GetResult, FeedError> {
        let initial = PageRange::first(options.initial_pages)?;
        if options.total_pages < options.initial_pages {
            return Err(FeedError::InvalidPageRange(format!(
                "total pages {} below initial pages {}",
                options.total_pages, options.initial_pages
            )));
        }

        if !options.force_refresh
            && let Some(snapshot) = self.fresh_snapshot()?
        {
            debug!(records = snapshot.len(), "serving fresh cached snapshot");
            return Ok(GetResult {
                snapshot,
                action: ServeAction::Cache,
            });
        }

        let _refresh = self
            .refresh
            .lock()
            .map_err(|_| FeedError::StoreIo("refresh lock poisoned".to_string()))?;
        // another caller may have refreshed while this one waited
        if !options.force_refresh
            && let Some(snapshot) = self.fresh_snapshot()?
        {
            return Ok(GetResult {
                snapshot,
                action: ServeAction::Cache,
            });
        }

        info!(
            force = options.force_refresh,
            pages = %initial,
            "performing full fetch"
        );
        let records = self.client.fetch(initial)?;
        self.retire_refiller();
        let snapshot = self.store.write_full(records)?;

        if options.total_pages > options.initial_pages {
            let handle = spawn_refiller(
                self.client.clone(),
                self.store.clone(),
                self.bus.clone(),
                RefillPlan {
                    generation: snapshot.generation,
                    after: options.initial_pages,
                    through: options.total_pages,
                },
            );
            *self.refiller_slot() = Some(handle);
        }

        Ok(GetResult {
            snapshot,
            action: ServeAction::FullFetch,
        })
    }

    fn fresh_snapshot(&self) -> Result<Option<Snapshot>, FeedError> {
        if self.store.is_stale(self.options.freshness)? {
            return Ok(None);
        }
        self.store.load()
    }

    fn refiller_slot(&self) -> MutexGuard<'_, Option<RefillHandle>> {
        self.refiller.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Cancels the active refiller and waits for it to leave the store.
    fn retire_refiller(&self) -> Option<RefillReport> {
        let handle = self.refiller_slot().take()?;
        if !handle.is_finished() {
            info!(
                generation = handle.plan().generation,
                "cancelling previous background refill"
            );
        }
        handle.cancel();
        let report = handle.join();
        debug!(
            generation = report.generation,
            appended = report.appended_pages.len(),
            "previous background refill retired"
        );
        Some(report)
    }

    pub fn filter<'a>(
        &self,
        snapshot: &'a Snapshot,
        year: Option<i32>,
        query: Option<&str>,
    ) -> Vec<&'a Record> {
        let mut matched = aggregate::filter_records(&snapshot.records, year, query);
        matched.truncate(aggregate::DISPLAY_LIMIT);
        matched
    }

    pub fn summary(&self, snapshot: &Snapshot) -> Aggregates {
        aggregate::summarize(&snapshot.records)
    }

    pub fn refill_in_progress(&self) -> bool {
        self.refiller_slot()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Blocks until the current background refill ends.
    pub fn wait_for_refill(&self) -> Option<RefillReport> {
        let handle = self.refiller_slot().take()?;
        Some(handle.join())
    }

    /// Cancels and joins the background refill, if any.
    pub fn shutdown(&self) -> Option<RefillReport> {
        let report = self.retire_refiller()?;
        info!(generation = report.generation, "background refill stopped");
        Some(report)
    }
}

impl<C: CollectionClient + ?Sized, S: SnapshotStore + ?Sized> Drop for IngestionCoordinator<C, S> {
    fn drop(&mut self) {
        let slot = self.refiller.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = slot.take() {
            handle.cancel();
            let _ = handle.join();
        }
    }
}
