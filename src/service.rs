// File: ./src/service.rs
//! Background task that owns a `CalendarCache`.
//!
//! All reconciliations, queries and debounced flushes run inside a single
//! tokio task, so the flush timer can never interleave with a mutation. Other
//! tasks talk to it through a cloneable `CacheHandle`.
//!
//! Backend calls made by the cache are synchronous; a connector that blocks
//! for long should be driven from `spawn_blocking` on its own side.
use crate::cache::{CalendarCache, ConnectionStatus, ReconcileSummary};
use crate::error::{CacheError, CacheResult};
use crate::model::{CalendarItem, Moment};
use chrono::{DateTime, FixedOffset};
use tokio::sync::{mpsc, oneshot};
use tokio::time::sleep_until;

const COMMAND_QUEUE_DEPTH: usize = 32;

pub enum CacheCommand {
    Reconcile {
        items: Vec<CalendarItem>,
        start: DateTime<FixedOffset>,
        end: DateTime<FixedOffset>,
        reply: oneshot::Sender<ReconcileSummary>,
    },
    Refresh {
        start: DateTime<FixedOffset>,
        end: DateTime<FixedOffset>,
        reply: oneshot::Sender<CacheResult<ReconcileSummary>>,
    },
    SetStatus(ConnectionStatus),
    ItemById {
        id: String,
        reply: oneshot::Sender<Option<CalendarItem>>,
    },
    ItemsBySubject {
        exact: Option<String>,
        partial: Option<String>,
        reply: oneshot::Sender<Vec<CalendarItem>>,
    },
    ItemsAt {
        moment: Moment,
        reply: oneshot::Sender<Vec<CalendarItem>>,
    },
    ItemsInRange {
        start: DateTime<FixedOffset>,
        end: DateTime<FixedOffset>,
        reply: oneshot::Sender<Vec<CalendarItem>>,
    },
    AllItems(oneshot::Sender<Vec<CalendarItem>>),
    NowItems(oneshot::Sender<Vec<CalendarItem>>),
    NextItems(oneshot::Sender<Vec<CalendarItem>>),
    PreviousItems(oneshot::Sender<Vec<CalendarItem>>),
    Flush(oneshot::Sender<CacheResult<bool>>),
    Shutdown(oneshot::Sender<CacheResult<()>>),
}

#[derive(Clone, Debug)]
pub struct CacheHandle {
    tx: mpsc::Sender<CacheCommand>,
}

fn closed() -> CacheError {
    CacheError::Backend("calendar cache task has stopped".to_string())
}

impl CacheHandle {
    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> CacheCommand,
    ) -> CacheResult<T> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(make(reply)).await.map_err(|_| closed())?;
        rx.await.map_err(|_| closed())
    }

    pub async fn reconcile(
        &self,
        items: Vec<CalendarItem>,
        start: DateTime<FixedOffset>,
        end: DateTime<FixedOffset>,
    ) -> CacheResult<ReconcileSummary> {
        self.request(|reply| CacheCommand::Reconcile {
            items,
            start,
            end,
            reply,
        })
        .await
    }

    pub async fn refresh(
        &self,
        start: DateTime<FixedOffset>,
        end: DateTime<FixedOffset>,
    ) -> CacheResult<ReconcileSummary> {
        self.request(|reply| CacheCommand::Refresh { start, end, reply })
            .await?
    }

    pub async fn set_status(&self, status: ConnectionStatus) -> CacheResult<()> {
        self.tx
            .send(CacheCommand::SetStatus(status))
            .await
            .map_err(|_| closed())
    }

    pub async fn item_by_id(&self, id: &str) -> CacheResult<Option<CalendarItem>> {
        let id = id.to_string();
        self.request(|reply| CacheCommand::ItemById { id, reply })
            .await
    }

    /// Matches are re-fetched from the backend inside the cache task.
    pub async fn items_by_subject(
        &self,
        exact: Option<&str>,
        partial: Option<&str>,
    ) -> CacheResult<Vec<CalendarItem>> {
        let exact = exact.map(str::to_string);
        let partial = partial.map(str::to_string);
        self.request(|reply| CacheCommand::ItemsBySubject {
            exact,
            partial,
            reply,
        })
        .await
    }

    pub async fn items_at(&self, moment: impl Into<Moment>) -> CacheResult<Vec<CalendarItem>> {
        let moment = moment.into();
        self.request(|reply| CacheCommand::ItemsAt { moment, reply })
            .await
    }

    /// Refreshes the range from the backend first, like `CalendarCache::items_in_range`.
    pub async fn items_in_range(
        &self,
        start: DateTime<FixedOffset>,
        end: DateTime<FixedOffset>,
    ) -> CacheResult<Vec<CalendarItem>> {
        self.request(|reply| CacheCommand::ItemsInRange { start, end, reply })
            .await
    }

    pub async fn all_items(&self) -> CacheResult<Vec<CalendarItem>> {
        self.request(CacheCommand::AllItems).await
    }

    pub async fn now_items(&self) -> CacheResult<Vec<CalendarItem>> {
        self.request(CacheCommand::NowItems).await
    }

    pub async fn next_items(&self) -> CacheResult<Vec<CalendarItem>> {
        self.request(CacheCommand::NextItems).await
    }

    pub async fn previous_items(&self) -> CacheResult<Vec<CalendarItem>> {
        self.request(CacheCommand::PreviousItems).await
    }

    pub async fn flush(&self) -> CacheResult<bool> {
        self.request(CacheCommand::Flush).await?
    }

    /// Final flush, then stop the task.
    pub async fn shutdown(&self) -> CacheResult<()> {
        self.request(CacheCommand::Shutdown).await?
    }
}

/// Spawns the cache task and returns a handle to it.
pub fn spawn_cache_actor(cache: CalendarCache) -> CacheHandle {
    let (tx, rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
    tokio::spawn(run(cache, rx));
    CacheHandle { tx }
}

async fn run(mut cache: CalendarCache, mut rx: mpsc::Receiver<CacheCommand>) {
    loop {
        let deadline = cache.flush_deadline();

        tokio::select! {
            cmd = rx.recv() => {
                let Some(cmd) = cmd else {
                    // Every handle dropped: write what is pending and stop.
                    if let Err(e) = cache.shutdown() {
                        log::error!("Final calendar cache flush failed: {}", e);
                    }
                    break;
                };
                if !handle_command(&mut cache, cmd) {
                    break;
                }
            }
            _ = wait_for(deadline) => {
                cache.poll_flush();
            }
        }
    }
    log::debug!("Calendar cache task stopped");
}

/// Returns false once the task should stop.
fn handle_command(cache: &mut CalendarCache, cmd: CacheCommand) -> bool {
    // A dropped reply receiver just means the caller stopped waiting.
    match cmd {
        CacheCommand::Reconcile {
            items,
            start,
            end,
            reply,
        } => {
            let _ = reply.send(cache.reconcile(items, start, end, true));
        }
        CacheCommand::Refresh { start, end, reply } => {
            let _ = reply.send(cache.refresh_range(start, end));
        }
        CacheCommand::SetStatus(status) => cache.set_connection_status(status),
        CacheCommand::ItemById { id, reply } => {
            let _ = reply.send(cache.item_by_id(&id).cloned());
        }
        CacheCommand::ItemsBySubject {
            exact,
            partial,
            reply,
        } => {
            let _ = reply.send(cache.items_by_subject(exact.as_deref(), partial.as_deref()));
        }
        CacheCommand::ItemsAt { moment, reply } => {
            let _ = reply.send(cache.items_at(moment));
        }
        CacheCommand::ItemsInRange { start, end, reply } => {
            let _ = reply.send(cache.items_in_range(start, end));
        }
        CacheCommand::AllItems(reply) => {
            let _ = reply.send(cache.all_items());
        }
        CacheCommand::NowItems(reply) => {
            let _ = reply.send(cache.now_items());
        }
        CacheCommand::NextItems(reply) => {
            let _ = reply.send(cache.next_items());
        }
        CacheCommand::PreviousItems(reply) => {
            let _ = reply.send(cache.previous_items());
        }
        CacheCommand::Flush(reply) => {
            let _ = reply.send(cache.flush());
        }
        CacheCommand::Shutdown(reply) => {
            let _ = reply.send(cache.shutdown());
            return false;
        }
    }
    true
}

async fn wait_for(deadline: Option<std::time::Instant>) {
    match deadline {
        Some(d) => sleep_until(tokio::time::Instant::from_std(d)).await,
        None => std::future::pending::<()>().await,
    }
}
