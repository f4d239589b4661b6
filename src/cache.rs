// File: ./src/cache.rs
// In-memory cache of room bookings, reconciled against backend fetches and
// persisted to a `CacheStore` after a quiet period.
//
// The cache is driven from one execution context. It holds no locks; every
// mutation goes through `&mut self`. Queries clone the items they return, so
// results stay valid whatever happens to the cache afterwards.
use crate::backend::CalendarBackend;
use crate::callbacks::CacheCallbacks;
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::context::AppContext;
use crate::debounce::FlushDebouncer;
use crate::error::{CacheError, CacheResult};
use crate::model::{CalendarItem, Moment, RawEventRecord, StorageBlob, StorageRecord};
use crate::storage::{CacheStore, JsonFileStore};
use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use strum::{Display, EnumString};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString,
)]
pub enum ConnectionStatus {
    #[default]
    Unknown,
    Connected,
    Disconnected,
}

/// Ids touched by one reconciliation, in callback order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub added: Vec<String>,
    pub changed: Vec<String>,
    pub deleted: Vec<String>,
}

impl ReconcileSummary {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.changed.is_empty() && self.deleted.is_empty()
    }
}

enum Upsert {
    Added,
    Changed,
    Unchanged,
}

pub struct CalendarCache {
    items: HashMap<String, CalendarItem>,
    status: ConnectionStatus,
    last_updated: DateTime<Utc>,
    dirty: bool,
    offset: FixedOffset,
    backend: Arc<dyn CalendarBackend>,
    store: Option<Box<dyn CacheStore>>,
    clock: Arc<dyn Clock>,
    callbacks: CacheCallbacks,
    debouncer: FlushDebouncer,
}

impl std::fmt::Debug for CalendarCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CalendarCache")
            .field("items", &self.items.len())
            .field("status", &self.status)
            .field("last_updated", &self.last_updated)
            .field("dirty", &self.dirty)
            .field("offset", &self.offset)
            .field("persistent", &self.store.is_some())
            .field("callbacks", &self.callbacks)
            .finish()
    }
}

impl CalendarCache {
    /// Empty cache with no persistence, reading the wall clock in `offset`.
    pub fn new(backend: Arc<dyn CalendarBackend>, offset: FixedOffset) -> Self {
        Self {
            items: HashMap::new(),
            status: ConnectionStatus::Unknown,
            last_updated: DateTime::<Utc>::default(),
            dirty: false,
            offset,
            backend,
            store: None,
            clock: Arc::new(SystemClock::new(offset)),
            callbacks: CacheCallbacks::default(),
            debouncer: FlushDebouncer::default(),
        }
    }

    pub fn with_store(mut self, store: Box<dyn CacheStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_flush_delay(mut self, delay: Duration) -> Self {
        self.debouncer = FlushDebouncer::new(delay);
        self
    }

    /// Build a cache the way a device starts up: offset, delay and cache file
    /// from `config`, then hydrate from whatever was persisted last time.
    pub fn from_config(
        config: &Config,
        ctx: &dyn AppContext,
        backend: Arc<dyn CalendarBackend>,
    ) -> CacheResult<Self> {
        let offset = config.timezone.resolve()?;
        let mut cache = Self::new(backend, offset).with_flush_delay(config.flush_delay());
        if config.persistent_storage {
            let store = JsonFileStore::from_context(ctx, &config.cache_file)?;
            log::debug!("Calendar cache file: {:?}", store.path());
            cache = cache.with_store(Box::new(store));
        }
        cache.hydrate();
        Ok(cache)
    }

    // --- State accessors ---

    pub fn connection_status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn last_updated(&self) -> DateTime<Utc> {
        self.last_updated
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// When the pending write is due, if one is pending.
    pub fn flush_deadline(&self) -> Option<Instant> {
        self.debouncer.deadline()
    }

    // --- Callback registration (last registration wins) ---

    pub fn on_new_item(&mut self, f: impl FnMut(&CalendarItem) + Send + 'static) {
        self.callbacks.set_new_item(f);
    }

    pub fn on_item_changed(&mut self, f: impl FnMut(&CalendarItem) + Send + 'static) {
        self.callbacks.set_item_changed(f);
    }

    pub fn on_item_deleted(&mut self, f: impl FnMut(&CalendarItem) + Send + 'static) {
        self.callbacks.set_item_deleted(f);
    }

    pub fn on_connected(&mut self, f: impl FnMut(ConnectionStatus) + Send + 'static) {
        self.callbacks.set_connected(f);
    }

    pub fn on_disconnected(&mut self, f: impl FnMut(ConnectionStatus) + Send + 'static) {
        self.callbacks.set_disconnected(f);
    }

    // --- Connection state ---

    /// Record a connection attempt. The timestamp is refreshed on every call;
    /// the matching callback fires only when the status actually changes.
    ///
    /// `Unknown` is only the initial state and is ignored here.
    pub fn set_connection_status(&mut self, status: ConnectionStatus) {
        if status == ConnectionStatus::Unknown {
            log::warn!("Ignoring transition back to {} connection status", status);
            return;
        }
        self.last_updated = self.clock.now().with_timezone(&Utc);
        self.mark_dirty();

        if status != self.status {
            log::info!("Calendar connection status: {} -> {}", self.status, status);
            self.status = status;
            self.callbacks.fire_status(status);
        }
    }

    pub fn mark_up_to_date(&mut self) {
        self.last_updated = self.clock.now().with_timezone(&Utc);
    }

    // --- Queries ---

    fn snapshot(&self) -> Vec<CalendarItem> {
        let mut items: Vec<CalendarItem> = self.items.values().cloned().collect();
        items.sort_by(|a, b| {
            a.start()
                .cmp(&b.start())
                .then_with(|| a.item_id().cmp(b.item_id()))
        });
        items
    }

    pub fn item_by_id(&self, id: &str) -> Option<&CalendarItem> {
        self.items.get(id)
    }

    /// Every cached item, ordered by start.
    pub fn all_items(&self) -> Vec<CalendarItem> {
        self.snapshot()
    }

    /// Items whose subject equals `exact` or contains `partial`.
    ///
    /// Each match is re-fetched from the backend before it is returned, so this
    /// may perform I/O. A failed re-fetch falls back to the cached copy.
    pub fn items_by_subject(
        &mut self,
        exact: Option<&str>,
        partial: Option<&str>,
    ) -> Vec<CalendarItem> {
        let matches: Vec<CalendarItem> = self
            .snapshot()
            .into_iter()
            .filter(|item| {
                let subject = item.subject();
                exact == Some(subject) || partial.is_some_and(|p| subject.contains(p))
            })
            .collect();

        matches
            .into_iter()
            .map(|item| self.refresh_item(item))
            .collect()
    }

    fn refresh_item(&mut self, item: CalendarItem) -> CalendarItem {
        let fresh = self
            .backend
            .refresh_single(&item)
            .and_then(CalendarItem::from_raw);
        match fresh {
            Ok(fresh) if fresh.item_id() == item.item_id() => {
                if let Upsert::Changed = self.upsert(fresh.clone(), true) {
                    self.mark_dirty();
                }
                self.items.get(item.item_id()).cloned().unwrap_or(fresh)
            }
            Ok(fresh) => {
                log::warn!(
                    "Backend returned item {} when refreshing {}; keeping cached copy",
                    fresh.item_id(),
                    item.item_id()
                );
                item
            }
            Err(CacheError::NotImplemented(op)) => {
                log::debug!("{op} unavailable; returning cached {}", item.item_id());
                item
            }
            Err(e) => {
                log::warn!("Could not refresh item {}: {}", item.item_id(), e);
                item
            }
        }
    }

    pub fn items_at(&self, moment: impl Into<Moment>) -> Vec<CalendarItem> {
        let moment = moment.into();
        self.snapshot()
            .into_iter()
            .filter(|item| item.contains(moment))
            .collect()
    }

    /// Refresh `[start, end]` from the backend, then return the cached items
    /// touching that range. A failed refresh is logged and the cached view is
    /// returned as-is.
    pub fn items_in_range(
        &mut self,
        start: DateTime<FixedOffset>,
        end: DateTime<FixedOffset>,
    ) -> Vec<CalendarItem> {
        if let Err(e) = self.refresh_range(start, end) {
            log::warn!("Calendar refresh for {} - {} failed: {}", start, end, e);
        }
        self.snapshot()
            .into_iter()
            .filter(|item| item.within_range(start, end))
            .collect()
    }

    pub fn now_items(&self) -> Vec<CalendarItem> {
        self.items_at(self.clock.now())
    }

    /// Items sharing the earliest start strictly after now.
    pub fn next_items(&self) -> Vec<CalendarItem> {
        let now = self.clock.now();
        let snapshot = self.snapshot();
        let Some(next_start) = snapshot
            .iter()
            .map(CalendarItem::start)
            .filter(|start| *start > now)
            .min()
        else {
            return vec![];
        };
        snapshot
            .into_iter()
            .filter(|item| item.start() == next_start)
            .collect()
    }

    /// Items sharing the latest end strictly before now.
    pub fn previous_items(&self) -> Vec<CalendarItem> {
        let now = self.clock.now();
        let snapshot = self.snapshot();
        let Some(previous_end) = snapshot
            .iter()
            .map(CalendarItem::end)
            .filter(|end| *end < now)
            .max()
        else {
            return vec![];
        };
        snapshot
            .into_iter()
            .filter(|item| item.end() == previous_end)
            .collect()
    }

    // --- Backend driven updates ---

    /// Fetch the complete set of events in `[start, end]` and reconcile it.
    pub fn refresh_range(
        &mut self,
        start: DateTime<FixedOffset>,
        end: DateTime<FixedOffset>,
    ) -> CacheResult<ReconcileSummary> {
        match self.backend.refresh_range(start, end) {
            Ok(records) => {
                self.set_connection_status(ConnectionStatus::Connected);
                let mut items = Vec::with_capacity(records.len());
                for record in records {
                    match CalendarItem::from_raw(record) {
                        Ok(item) => items.push(item),
                        Err(e) => log::warn!("Skipping unusable calendar record: {e}"),
                    }
                }
                Ok(self.reconcile(items, start, end, true))
            }
            Err(e @ CacheError::NotImplemented(_)) => Err(e),
            Err(e) => {
                self.set_connection_status(ConnectionStatus::Disconnected);
                Err(e)
            }
        }
    }

    /// Merge `fetched`, the backend's complete view of `[range_start, range_end]`,
    /// into the cache.
    ///
    /// New ids are inserted, differing ones overwritten, and cached items that
    /// touch the range but are missing from `fetched` are removed. Items outside
    /// the range are left alone. The cache is marked dirty either way.
    pub fn reconcile(
        &mut self,
        fetched: Vec<CalendarItem>,
        range_start: DateTime<FixedOffset>,
        range_end: DateTime<FixedOffset>,
        fire_callbacks: bool,
    ) -> ReconcileSummary {
        let mut summary = ReconcileSummary::default();
        let mut fetched_ids = HashSet::with_capacity(fetched.len());

        for item in fetched {
            let id = item.item_id().to_string();
            match self.upsert(item, fire_callbacks) {
                Upsert::Added => summary.added.push(id.clone()),
                Upsert::Changed => summary.changed.push(id.clone()),
                Upsert::Unchanged => {}
            }
            fetched_ids.insert(id);
        }

        for stale in self.snapshot() {
            if !stale.within_range(range_start, range_end)
                || fetched_ids.contains(stale.item_id())
            {
                continue;
            }
            let id = stale.item_id().to_string();
            if let Some(removed) = self.items.remove(&id) {
                log::debug!("Calendar item deleted upstream: {}", removed);
                if fire_callbacks {
                    self.callbacks.fire_item_deleted(&removed);
                }
                summary.deleted.push(id);
            }
        }

        if !summary.is_empty() {
            log::info!(
                "Reconciled {} - {}: {} new, {} changed, {} deleted",
                range_start,
                range_end,
                summary.added.len(),
                summary.changed.len(),
                summary.deleted.len()
            );
        }
        self.mark_dirty();
        summary
    }

    fn upsert(&mut self, mut item: CalendarItem, fire_callbacks: bool) -> Upsert {
        item.set_source(self.backend_ref());
        // Connectors may report any offset; dates are judged on the local day.
        item.set_times(
            item.start().with_timezone(&self.offset),
            item.end().with_timezone(&self.offset),
        );
        let id = item.item_id().to_string();

        let outcome = match self.items.get(&id) {
            None => Upsert::Added,
            Some(existing) if *existing != item => Upsert::Changed,
            Some(_) => return Upsert::Unchanged,
        };

        self.items.insert(id.clone(), item);
        if fire_callbacks && let Some(stored) = self.items.get(&id) {
            match outcome {
                Upsert::Added => self.callbacks.fire_new_item(stored),
                Upsert::Changed => self.callbacks.fire_item_changed(stored),
                Upsert::Unchanged => {}
            }
        }
        outcome
    }

    fn backend_ref(&self) -> Weak<dyn CalendarBackend> {
        Arc::downgrade(&self.backend)
    }

    // --- Backend write operations ---

    /// Create a booking on the backend and add it to the cache.
    pub fn create_event(
        &mut self,
        subject: &str,
        body: &str,
        start: DateTime<FixedOffset>,
        end: DateTime<FixedOffset>,
    ) -> CacheResult<CalendarItem> {
        let record: RawEventRecord = self.backend.create_event(subject, body, start, end)?;
        let item = CalendarItem::from_raw(record)?;
        Ok(self.store_written(item))
    }

    /// Move a booking on the backend and update the cached copy.
    pub fn change_event_time(
        &mut self,
        id: &str,
        new_start: DateTime<FixedOffset>,
        new_end: DateTime<FixedOffset>,
    ) -> CacheResult<CalendarItem> {
        let mut item = self
            .items
            .get(id)
            .cloned()
            .ok_or_else(|| CacheError::Backend(format!("unknown calendar item '{id}'")))?;
        if new_end < new_start {
            return Err(CacheError::InvalidInterval {
                id: id.to_string(),
                start: new_start.to_rfc3339(),
                end: new_end.to_rfc3339(),
            });
        }
        self.backend.change_event_time(&item, new_start, new_end)?;
        item.set_times(new_start, new_end);
        Ok(self.store_written(item))
    }

    /// Cache an item the backend just accepted and return the stored copy.
    fn store_written(&mut self, item: CalendarItem) -> CalendarItem {
        let id = item.item_id().to_string();
        self.upsert(item.clone(), true);
        self.mark_dirty();
        self.items.get(&id).cloned().unwrap_or(item)
    }

    /// Delete a booking on the backend and drop it from the cache.
    pub fn delete_event(&mut self, id: &str) -> CacheResult<CalendarItem> {
        let item = self
            .items
            .get(id)
            .cloned()
            .ok_or_else(|| CacheError::Backend(format!("unknown calendar item '{id}'")))?;
        self.backend.delete_event(&item)?;
        if let Some(removed) = self.items.remove(id) {
            self.callbacks.fire_item_deleted(&removed);
        }
        self.mark_dirty();
        Ok(item)
    }

    // --- Persistence ---

    fn mark_dirty(&mut self) {
        self.dirty = true;
        if self.store.is_some() {
            self.debouncer.restart();
        }
    }

    fn storage_blob(&self) -> StorageBlob {
        StorageBlob {
            last_update_time: self.last_updated.timestamp() as f64
                + f64::from(self.last_updated.timestamp_subsec_millis()) / 1000.0,
            last_update_time_iso: Some(self.last_updated.with_timezone(&self.offset).to_rfc3339()),
            items: self
                .snapshot()
                .iter()
                .filter_map(|item| serde_json::to_value(item.to_storage_record()).ok())
                .collect(),
        }
    }

    /// Write the cache if anything changed since the last successful write.
    ///
    /// Returns whether a write happened. The dirty flag is cleared only after
    /// the store accepted the data; on failure it stays set so a later flush
    /// retries.
    pub fn flush(&mut self) -> CacheResult<bool> {
        if !self.dirty {
            return Ok(false);
        }
        let Some(store) = self.store.as_ref() else {
            return Ok(false);
        };

        let blob = self.storage_blob();
        match store.save(&blob) {
            Ok(()) => {
                log::debug!("Flushed {} calendar items", blob.items.len());
                self.dirty = false;
                self.debouncer.cancel();
                Ok(true)
            }
            Err(e) => {
                log::error!("Error saving calendar cache: {e:#}");
                Err(e.into())
            }
        }
    }

    /// Flush if the debounce deadline has passed. A failed write re-arms the
    /// deadline.
    pub fn poll_flush(&mut self) -> bool {
        if !self.debouncer.is_due(Instant::now()) {
            return false;
        }
        self.debouncer.cancel();
        match self.flush() {
            Ok(written) => written,
            Err(_) => {
                self.debouncer.restart();
                false
            }
        }
    }

    /// Seed a fresh cache from the store without firing callbacks.
    ///
    /// Errors are logged and swallowed; malformed records are skipped.
    /// A cache that already holds data or unsaved changes is left alone.
    /// Returns the number of items restored.
    pub fn hydrate(&mut self) -> usize {
        let Some(store) = self.store.as_ref() else {
            return 0;
        };
        if !self.items.is_empty() || self.dirty {
            log::warn!("Not hydrating a calendar cache that already holds data");
            return 0;
        }
        let blob = match store.load() {
            Ok(Some(blob)) => blob,
            Ok(None) => return 0,
            Err(e) => {
                log::error!("Error loading calendar items from disk: {e:#}");
                return 0;
            }
        };

        if let Some(t) = timestamp_to_utc(blob.last_update_time) {
            self.last_updated = t;
        }

        let mut items = Vec::with_capacity(blob.items.len());
        for value in blob.items {
            let restored = serde_json::from_value::<StorageRecord>(value)
                .map_err(|e| CacheError::Storage(e.to_string()))
                .and_then(|record| CalendarItem::from_storage_record(record, &self.offset));
            match restored {
                Ok(item) => items.push(item),
                Err(e) => log::warn!("Skipping unreadable cached calendar item: {e}"),
            }
        }

        let range_start = items.iter().map(CalendarItem::start).min();
        let range_end = items.iter().map(CalendarItem::end).max();
        let (Some(range_start), Some(range_end)) = (range_start, range_end) else {
            return 0;
        };

        let count = items.len();
        self.reconcile(items, range_start, range_end, false);
        // What was just read is what is on disk.
        self.dirty = false;
        self.debouncer.cancel();
        log::info!("Restored {} calendar items from disk", count);
        count
    }

    /// Final flush before the cache goes away.
    pub fn shutdown(&mut self) -> CacheResult<()> {
        self.debouncer.cancel();
        self.flush().map(|_| ())
    }
}

fn timestamp_to_utc(secs: f64) -> Option<DateTime<Utc>> {
    if !secs.is_finite() {
        return None;
    }
    DateTime::<Utc>::from_timestamp_millis((secs * 1000.0).round() as i64)
}

impl Drop for CalendarCache {
    fn drop(&mut self) {
        if self.dirty && self.store.is_some() {
            // flush() already logged any failure.
            let _ = self.flush();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::NullBackend;
    use crate::clock::FixedClock;
    use chrono::TimeZone;
    use std::sync::Mutex;

    fn offset() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    fn cache() -> CalendarCache {
        let clock = FixedClock::new(offset().with_ymd_and_hms(2024, 2, 1, 8, 0, 0).unwrap());
        CalendarCache::new(Arc::new(NullBackend), offset()).with_clock(Arc::new(clock))
    }

    #[test]
    fn test_status_callbacks_fire_only_on_change() {
        let mut cache = cache();
        let log = Arc::new(Mutex::new(Vec::new()));

        let l = log.clone();
        cache.on_connected(move |s| l.lock().unwrap().push(s));
        let l = log.clone();
        cache.on_disconnected(move |s| l.lock().unwrap().push(s));

        assert_eq!(cache.connection_status(), ConnectionStatus::Unknown);
        assert_eq!(cache.last_updated(), DateTime::<Utc>::default());

        cache.set_connection_status(ConnectionStatus::Connected);
        cache.set_connection_status(ConnectionStatus::Connected);
        cache.set_connection_status(ConnectionStatus::Disconnected);
        cache.set_connection_status(ConnectionStatus::Connected);

        assert_eq!(
            *log.lock().unwrap(),
            vec![
                ConnectionStatus::Connected,
                ConnectionStatus::Disconnected,
                ConnectionStatus::Connected
            ]
        );
        // Timestamp refreshed even by the no-op transition.
        assert_eq!(
            cache.last_updated(),
            Utc.with_ymd_and_hms(2024, 2, 1, 8, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_unknown_status_is_not_a_transition() {
        let mut cache = cache();
        let hits = Arc::new(Mutex::new(0));
        let h = hits.clone();
        cache.on_disconnected(move |_| *h.lock().unwrap() += 1);

        cache.set_connection_status(ConnectionStatus::Unknown);
        assert!(!cache.is_dirty());
        assert_eq!(cache.last_updated(), DateTime::<Utc>::default());

        cache.set_connection_status(ConnectionStatus::Connected);
        cache.set_connection_status(ConnectionStatus::Unknown);
        assert_eq!(cache.connection_status(), ConnectionStatus::Connected);
        assert_eq!(*hits.lock().unwrap(), 0);
    }

    #[test]
    fn test_last_registration_wins() {
        let mut cache = cache();
        let hits = Arc::new(Mutex::new(Vec::new()));

        let h = hits.clone();
        cache.on_connected(move |_| h.lock().unwrap().push("first"));
        let h = hits.clone();
        cache.on_connected(move |_| h.lock().unwrap().push("second"));

        cache.set_connection_status(ConnectionStatus::Connected);
        assert_eq!(*hits.lock().unwrap(), vec!["second"]);
    }

    #[test]
    fn test_status_parses_from_text() {
        assert_eq!(
            "Disconnected".parse::<ConnectionStatus>().unwrap(),
            ConnectionStatus::Disconnected
        );
        assert_eq!(ConnectionStatus::Connected.to_string(), "Connected");
    }

    #[test]
    fn test_flush_without_store_is_noop() {
        let mut cache = cache();
        let start = offset().timestamp_opt(0, 0).unwrap();
        let end = offset().timestamp_opt(10, 0).unwrap();
        cache.reconcile(vec![], start, end, true);
        assert!(cache.is_dirty());
        assert!(!cache.flush().unwrap());
        assert!(cache.flush_deadline().is_none());
    }

    #[test]
    fn test_refresh_with_null_backend_keeps_status() {
        let mut cache = cache();
        let start = offset().with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        let end = offset().with_ymd_and_hms(2024, 2, 2, 0, 0, 0).unwrap();
        let err = cache.refresh_range(start, end).unwrap_err();
        assert!(matches!(err, CacheError::NotImplemented(_)));
        assert_eq!(cache.connection_status(), ConnectionStatus::Unknown);
        assert!(cache.items_in_range(start, end).is_empty());
    }
}
