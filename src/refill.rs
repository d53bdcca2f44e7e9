use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::bus::NotificationBus;
use crate::domain::Record;
use crate::error::FeedError;
use crate::fetch::CollectionClient;
use crate::store::SnapshotStore;

/// Emitted once per page the refiller appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchAppended {
    pub generation: u64,
    pub page: u32,
    pub records: Vec<Record>,
    /// Snapshot length after the append.
    pub total: usize,
}

#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RefillReport {
    pub generation: u64,
    pub appended_pages: Vec<u32>,
    pub failed_pages: Vec<u32>,
    pub records_appended: usize,
    pub cancelled: bool,
    /// A newer full refresh replaced the generation this refill worked on.
    pub superseded: bool,
    pub store_error: Option<String>,
}

/// Pages `after + 1 ..= through`, bound to one cache generation.
#[derive(Debug, Clone, Copy)]
pub struct RefillPlan {
    pub generation: u64,
    pub after: u32,
    pub through: u32,
}

pub struct RefillHandle {
    plan: RefillPlan,
    cancel: CancelToken,
    handle: thread::JoinHandle<RefillReport>,
}

impl RefillHandle {
    pub fn plan(&self) -> RefillPlan {
        self.plan
    }

    /// Stops the walk before the next page; a page in flight still completes.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn join(self) -> RefillReport {
        self.handle.join().unwrap_or_else(|_| RefillReport {
            generation: self.plan.generation,
            store_error: Some("refill worker panicked".to_string()),
            ..RefillReport::default()
        })
    }
}

pub fn spawn_refiller<C, S>(
    client: Arc<C>,
    store: Arc<S>,
    bus: Arc<NotificationBus<BatchAppended>>,
    plan: RefillPlan,
) -> RefillHandle
where
    C: CollectionClient + ?Sized + 'static,
    S: SnapshotStore + ?Sized + 'static,
{
    let cancel = CancelToken::new();
    let worker_cancel = cancel.clone();
    let handle = thread::spawn(move || {
        let report = run_refill(client.as_ref(), store.as_ref(), &bus, plan, &worker_cancel);
        info!(
            generation = report.generation,
            appended = report.appended_pages.len(),
            failed = report.failed_pages.len(),
            records = report.records_appended,
            cancelled = report.cancelled,
            superseded = report.superseded,
            "background refill finished"
        );
        report
    });
    RefillHandle {
        plan,
        cancel,
        handle,
    }
}

/// Walks the plan page by page on the calling thread.
///
/// Fetch failures skip the page. Store failures end the walk.
pub fn run_refill<C, S>(
    client: &C,
    store: &S,
    bus: &NotificationBus<BatchAppended>,
    plan: RefillPlan,
    cancel: &CancelToken,
) -> RefillReport
where
    C: CollectionClient + ?Sized,
    S: SnapshotStore + ?Sized,
{
    let mut report = RefillReport {
        generation: plan.generation,
        ..RefillReport::default()
    };
    info!(
        generation = plan.generation,
        from = plan.after + 1,
        through = plan.through,
        "starting background refill"
    );
    for page in plan.after.saturating_add(1)..=plan.through {
        if cancel.is_cancelled() {
            report.cancelled = true;
            break;
        }
        let records = match client.fetch_page(page) {
            Ok(records) => records,
            Err(err) => {
                warn!(page, error = %err, "skipping page after fetch failure");
                report.failed_pages.push(page);
                continue;
            }
        };
        match store.append_to_generation(plan.generation, &records) {
            Ok(snapshot) => {
                report.appended_pages.push(page);
                report.records_appended += records.len();
                let delivered = bus.publish(BatchAppended {
                    generation: plan.generation,
                    page,
                    total: snapshot.len(),
                    records,
                });
                info!(page, total = snapshot.len(), delivered, "appended page");
            }
            Err(FeedError::GenerationMismatch { expected, actual }) => {
                info!(page, expected, actual, "refill superseded by newer refresh");
                report.superseded = true;
                break;
            }
            Err(err) => {
                error!(page, error = %err, "stopping refill after store failure");
                report.store_error = Some(err.to_string());
                break;
            }
        }
    }
    report
}
