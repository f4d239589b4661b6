// File: tests/cache_actor.rs
use chrono::{DateTime, FixedOffset, NaiveDate, TimeZone};
use roomcal::NullBackend;
use roomcal::cache::{CalendarCache, ConnectionStatus};
use roomcal::clock::FixedClock;
use roomcal::model::{CalendarItem, StorageBlob};
use roomcal::service::spawn_cache_actor;
use roomcal::storage::CacheStore;
use serde_json::{Map, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn tz() -> FixedOffset {
    FixedOffset::east_opt(0).unwrap()
}

fn at(hour: u32) -> DateTime<FixedOffset> {
    tz().with_ymd_and_hms(2024, 11, 5, hour, 0, 0).unwrap()
}

fn item(id: &str, start: u32, end: u32) -> CalendarItem {
    let mut attrs = Map::new();
    attrs.insert("ItemId".into(), Value::String(id.into()));
    attrs.insert("Subject".into(), Value::String(format!("Meeting {id}")));
    CalendarItem::new(at(start), at(end), attrs).unwrap()
}

#[derive(Clone, Default)]
struct RecordingStore {
    saved: Arc<Mutex<Vec<StorageBlob>>>,
}

impl RecordingStore {
    fn writes(&self) -> usize {
        self.saved.lock().unwrap().len()
    }
}

impl CacheStore for RecordingStore {
    fn load(&self) -> anyhow::Result<Option<StorageBlob>> {
        Ok(None)
    }

    fn save(&self, blob: &StorageBlob) -> anyhow::Result<()> {
        self.saved.lock().unwrap().push(blob.clone());
        Ok(())
    }
}

fn cache_with(store: &RecordingStore, delay: Duration) -> CalendarCache {
    CalendarCache::new(Arc::new(NullBackend), tz())
        .with_clock(Arc::new(FixedClock::new(at(10))))
        .with_store(Box::new(store.clone()))
        .with_flush_delay(delay)
}

#[tokio::test]
async fn test_burst_of_reconciles_flushes_once() {
    let store = RecordingStore::default();
    let handle = spawn_cache_actor(cache_with(&store, Duration::from_millis(200)));

    for n in 0..5 {
        let id = format!("m{n}");
        let summary = handle
            .reconcile(vec![item(&id, 9, 11)], at(12), at(13))
            .await
            .unwrap();
        assert_eq!(summary.added, vec![id]);
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(store.writes(), 0);

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(store.writes(), 1);
    assert_eq!(store.saved.lock().unwrap()[0].items.len(), 5);

    handle.shutdown().await.unwrap();
    // Nothing changed since the debounced write.
    assert_eq!(store.writes(), 1);
}

#[tokio::test]
async fn test_queries_through_handle() {
    let store = RecordingStore::default();
    let handle = spawn_cache_actor(cache_with(&store, Duration::from_secs(60)));

    handle
        .reconcile(
            vec![item("past", 8, 9), item("current", 9, 11), item("upcoming", 11, 12)],
            at(0),
            at(23),
        )
        .await
        .unwrap();
    handle.set_status(ConnectionStatus::Connected).await.unwrap();

    let ids = |items: Vec<CalendarItem>| -> Vec<String> {
        items.iter().map(|i| i.item_id().to_string()).collect()
    };
    assert_eq!(ids(handle.now_items().await.unwrap()), vec!["current"]);
    assert_eq!(ids(handle.next_items().await.unwrap()), vec!["upcoming"]);
    assert_eq!(ids(handle.previous_items().await.unwrap()), vec!["past"]);
    assert_eq!(handle.all_items().await.unwrap().len(), 3);

    let found = handle.item_by_id("current").await.unwrap().unwrap();
    assert_eq!(found.start(), at(9));
    assert!(handle.item_by_id("missing").await.unwrap().is_none());

    assert_eq!(ids(handle.items_at(at(8)).await.unwrap()), vec!["past"]);
    let day = NaiveDate::from_ymd_opt(2024, 11, 5).unwrap();
    assert_eq!(handle.items_at(day).await.unwrap().len(), 3);

    // No backend behind the cache: lookups fall back to cached copies.
    assert_eq!(
        ids(handle.items_by_subject(Some("Meeting upcoming"), None).await.unwrap()),
        vec!["upcoming"]
    );
    assert_eq!(
        ids(handle.items_by_subject(None, Some("ing p")).await.unwrap()),
        vec!["past"]
    );
    assert_eq!(
        ids(handle.items_in_range(at(10), at(11)).await.unwrap()),
        vec!["current", "upcoming"]
    );

    assert!(handle.refresh(at(0), at(23)).await.is_err());

    assert!(handle.flush().await.unwrap());
    assert!(!handle.flush().await.unwrap());
    handle.shutdown().await.unwrap();
    assert!(handle.now_items().await.is_err());
}

#[tokio::test]
async fn test_dropping_every_handle_writes_pending_changes() {
    let store = RecordingStore::default();
    let handle = spawn_cache_actor(cache_with(&store, Duration::from_secs(60)));
    handle
        .reconcile(vec![item("a", 9, 10)], at(0), at(23))
        .await
        .unwrap();
    drop(handle);

    for _ in 0..50 {
        if store.writes() > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(store.writes(), 1);
}
