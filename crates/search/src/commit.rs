//! Debounced index commits
//!
//! Every indexing event schedules a commit of its core one window later. An
//! event arriving while a commit is pending moves that commit's deadline
//! instead of adding another, so a burst of writes costs one commit issued one
//! window after the last write.

use crate::engine::SearchEngine;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};
use widesync_core::{Error, Result};

/// Callback receiving non-fatal indexing errors with their collection
pub type IndexErrorCallback = Arc<dyn Fn(&str, &Error) + Send + Sync>;

/// Where non-fatal indexing errors are reported
#[derive(Clone, Default)]
pub struct ErrorSink {
    callback: Arc<RwLock<Option<IndexErrorCallback>>>,
}

impl ErrorSink {
    /// Install the callback, replacing any earlier one
    pub fn set(&self, callback: IndexErrorCallback) {
        *self.callback.write() = Some(callback);
    }

    /// Pass an indexing error to the callback, if any
    pub fn report(&self, collection: &str, error: &Error) {
        let callback = self.callback.read().clone();
        if let Some(callback) = callback {
            callback(collection, error);
        }
    }
}

impl std::fmt::Debug for ErrorSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorSink")
            .field("registered", &self.callback.read().is_some())
            .finish()
    }
}

type Deadline = Arc<Mutex<Instant>>;

/// Per-core debounced commits
pub struct CommitScheduler {
    engine: Arc<dyn SearchEngine>,
    window: Duration,
    /// Pending commit deadline, by core; each entry has one timer task
    pending: Arc<DashMap<String, Deadline>>,
    errors: ErrorSink,
}

impl CommitScheduler {
    /// Scheduler committing each core `window` after its last event
    pub fn new(engine: Arc<dyn SearchEngine>, window: Duration, errors: ErrorSink) -> Self {
        Self {
            engine,
            window,
            pending: Arc::new(DashMap::new()),
            errors,
        }
    }

    /// Commit `core` one window from now, replacing any pending deadline.
    ///
    /// `collection` names the core's collection in error reports. Must be
    /// called from within a tokio runtime.
    pub fn schedule(&self, core: &str, collection: &str) {
        let deadline = Instant::now() + self.window;
        let slot = match self.pending.entry(core.to_string()) {
            Entry::Occupied(e) => {
                *e.get().lock() = deadline;
                return;
            }
            Entry::Vacant(e) => {
                let slot = Arc::new(Mutex::new(deadline));
                e.insert(Arc::clone(&slot));
                slot
            }
        };

        let engine = Arc::clone(&self.engine);
        let pending = Arc::clone(&self.pending);
        let errors = self.errors.clone();
        let core = core.to_string();
        let collection = collection.to_string();
        tokio::spawn(async move {
            loop {
                let at = *slot.lock();
                tokio::time::sleep_until(at).await;
                if *slot.lock() <= Instant::now() {
                    break;
                }
            }
            // a flush already took this commit
            if pending
                .remove_if(&core, |_, s| Arc::ptr_eq(s, &slot))
                .is_none()
            {
                return;
            }
            debug!(target: "widesync::search", core = %core, "Debounced commit");
            if let Err(e) = engine.commit(&core).await {
                warn!(target: "widesync::search", core = %core, error = %e, "Debounced commit failed");
                errors.report(&collection, &e);
            }
        });
    }

    /// Cores with a commit pending
    pub fn pending(&self) -> Vec<String> {
        self.pending.iter().map(|e| e.key().clone()).collect()
    }

    /// Commit every pending core now.
    ///
    /// Every core is attempted; the first failure is returned.
    pub async fn flush(&self) -> Result<()> {
        let mut first_error = None;
        for core in self.pending() {
            if self.pending.remove(&core).is_none() {
                continue;
            }
            debug!(target: "widesync::search", core = %core, "Flushing commit");
            if let Err(e) = self.engine.commit(&core).await {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Drop a pending commit without issuing it
    pub fn cancel(&self, core: &str) {
        self.pending.remove(core);
    }
}
