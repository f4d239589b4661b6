// File: ./src/model/item.rs
use crate::backend::{Attachment, CalendarBackend};
use crate::error::{CacheError, CacheResult};
use crate::model::record::{RawEventRecord, StorageRecord};
use crate::timezone::from_epoch_seconds;
use chrono::{DateTime, FixedOffset, NaiveDate, TimeDelta, Utc};
use serde_json::{Map, Value, json};
use std::fmt;
use std::sync::Weak;

pub const ATTR_ITEM_ID: &str = "ItemId";
pub const ATTR_SUBJECT: &str = "Subject";
pub const ATTR_HAS_ATTACHMENTS: &str = "HasAttachments";
pub const ATTR_ORGANIZER_NAME: &str = "OrganizerName";
pub const ATTR_ROOM_NAME: &str = "RoomName";
pub const ATTR_LOCATION_ID: &str = "LocationId";

pub const KEY_START: &str = "Start";
pub const KEY_END: &str = "End";
pub const KEY_DURATION: &str = "Duration";
pub const KEY_START_ISO: &str = "Start_ISO";
pub const KEY_END_ISO: &str = "End_ISO";

// Keys derived from start/end; never stored as plain attributes.
const DERIVED_KEYS: [&str; 5] = [KEY_START, KEY_END, KEY_DURATION, KEY_START_ISO, KEY_END_ISO];

// --- COMPARISON OPERANDS ---

/// A point in time, or a whole local calendar day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Moment {
    At(DateTime<FixedOffset>),
    On(NaiveDate),
}

impl From<DateTime<FixedOffset>> for Moment {
    fn from(dt: DateTime<FixedOffset>) -> Self {
        Moment::At(dt)
    }
}

impl From<DateTime<Utc>> for Moment {
    fn from(dt: DateTime<Utc>) -> Self {
        Moment::At(dt.fixed_offset())
    }
}

impl From<NaiveDate> for Moment {
    fn from(date: NaiveDate) -> Self {
        Moment::On(date)
    }
}

/// Right-hand side of the boundary predicates: an instant or another item.
#[derive(Debug, Clone, Copy)]
pub enum Comparand<'a> {
    Instant(DateTime<FixedOffset>),
    Item(&'a CalendarItem),
}

impl From<DateTime<FixedOffset>> for Comparand<'_> {
    fn from(dt: DateTime<FixedOffset>) -> Self {
        Comparand::Instant(dt)
    }
}

impl<'a> From<&'a CalendarItem> for Comparand<'a> {
    fn from(item: &'a CalendarItem) -> Self {
        Comparand::Item(item)
    }
}

// --- ITEM ---

/// One booking on the room calendar.
///
/// Start/end are kept in the device's local offset so that date containment
/// follows the local calendar day. Everything else the backend reports lives in
/// the open `attributes` map, which always carries a string `ItemId` and `Subject`.
#[derive(Debug, Clone)]
pub struct CalendarItem {
    start: DateTime<FixedOffset>,
    end: DateTime<FixedOffset>,
    attributes: Map<String, Value>,
    source: Option<Weak<dyn CalendarBackend>>,
}

impl CalendarItem {
    pub fn new(
        start: DateTime<FixedOffset>,
        end: DateTime<FixedOffset>,
        mut attributes: Map<String, Value>,
    ) -> CacheResult<Self> {
        for key in DERIVED_KEYS {
            attributes.remove(key);
        }

        let id = match attributes.get(ATTR_ITEM_ID) {
            Some(Value::String(id)) => id.clone(),
            _ => return Err(CacheError::MissingAttribute(ATTR_ITEM_ID)),
        };
        if !matches!(attributes.get(ATTR_SUBJECT), Some(Value::String(_))) {
            return Err(CacheError::MissingAttribute(ATTR_SUBJECT));
        }
        if end < start {
            return Err(CacheError::InvalidInterval {
                id,
                start: start.to_rfc3339(),
                end: end.to_rfc3339(),
            });
        }

        Ok(Self {
            start,
            end,
            attributes,
            source: None,
        })
    }

    pub fn from_raw(record: RawEventRecord) -> CacheResult<Self> {
        Self::new(record.start, record.end, record.attributes)
    }

    /// Rebuild an item from its persisted form, placing it in `offset`.
    pub fn from_storage_record(record: StorageRecord, offset: &FixedOffset) -> CacheResult<Self> {
        let start = from_epoch_seconds(record.start, offset)?;
        let end = from_epoch_seconds(record.end, offset)?;
        Self::new(start, end, record.attributes)
    }

    pub(crate) fn set_source(&mut self, source: Weak<dyn CalendarBackend>) {
        self.source = Some(source);
    }

    pub(crate) fn set_times(&mut self, start: DateTime<FixedOffset>, end: DateTime<FixedOffset>) {
        self.start = start;
        self.end = end;
    }

    // --- Accessors ---

    pub fn start(&self) -> DateTime<FixedOffset> {
        self.start
    }

    pub fn end(&self) -> DateTime<FixedOffset> {
        self.end
    }

    /// Recomputed on every call.
    pub fn duration(&self) -> TimeDelta {
        self.end - self.start
    }

    pub fn duration_secs(&self) -> f64 {
        self.duration().num_milliseconds() as f64 / 1000.0
    }

    pub fn item_id(&self) -> &str {
        self.attributes
            .get(ATTR_ITEM_ID)
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    pub fn subject(&self) -> &str {
        self.attributes
            .get(ATTR_SUBJECT)
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    pub fn has_attachments(&self) -> bool {
        self.attributes
            .get(ATTR_HAS_ATTACHMENTS)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn attributes(&self) -> &Map<String, Value> {
        &self.attributes
    }

    /// Look up a value by key. `Start`/`End` come back as RFC 3339 strings,
    /// `Duration` as seconds. Missing keys yield `None`.
    pub fn get(&self, key: &str) -> Option<Value> {
        match key {
            KEY_START => Some(Value::String(self.start.to_rfc3339())),
            KEY_END => Some(Value::String(self.end.to_rfc3339())),
            KEY_DURATION => Some(json!(self.duration_secs())),
            _ => self.attributes.get(key).cloned(),
        }
    }

    /// Insert or overwrite an attribute.
    ///
    /// Derived keys are ignored, and so are `ItemId`/`Subject` values that are not
    /// strings, so the item stays valid.
    pub fn add_data(&mut self, key: impl Into<String>, value: Value) {
        let key = key.into();
        if DERIVED_KEYS.contains(&key.as_str()) {
            log::debug!("Ignoring derived key '{}' on item {}", key, self.item_id());
            return;
        }
        if (key == ATTR_ITEM_ID || key == ATTR_SUBJECT) && !value.is_string() {
            log::warn!("Refusing non-string '{}' on item {}", key, self.item_id());
            return;
        }
        self.attributes.insert(key, value);
    }

    /// Attributes plus the start/end as ISO strings.
    pub fn data(&self) -> Map<String, Value> {
        let mut ret = self.attributes.clone();
        ret.insert(KEY_START_ISO.into(), Value::String(self.start.to_rfc3339()));
        ret.insert(KEY_END_ISO.into(), Value::String(self.end.to_rfc3339()));
        ret
    }

    pub fn to_storage_record(&self) -> StorageRecord {
        StorageRecord {
            start: epoch_seconds(&self.start),
            end: epoch_seconds(&self.end),
            duration: self.duration_secs(),
            attributes: self.attributes.clone(),
        }
    }

    /// Fetch attachments through the backend that produced this item.
    pub fn attachments(&self) -> CacheResult<Vec<Attachment>> {
        let backend = self
            .source
            .as_ref()
            .and_then(Weak::upgrade)
            .ok_or_else(|| CacheError::NoAttachmentSource(self.item_id().to_string()))?;
        backend.attachments(self)
    }

    // --- Interval semantics ---

    /// Instants are contained when `start <= t <= end`. Dates are contained when
    /// they are the local start date or the local end date (not days in between).
    pub fn contains(&self, moment: impl Into<Moment>) -> bool {
        match moment.into() {
            Moment::At(t) => self.start <= t && t <= self.end,
            Moment::On(date) => self.start.date_naive() == date || self.end.date_naive() == date,
        }
    }

    /// `<`: compares starts.
    pub fn starts_before<'a>(&self, other: impl Into<Comparand<'a>>) -> bool {
        match other.into() {
            Comparand::Instant(t) => self.start < t,
            Comparand::Item(item) => self.start < item.start,
        }
    }

    /// `<=`: compares starts.
    pub fn starts_at_or_before<'a>(&self, other: impl Into<Comparand<'a>>) -> bool {
        match other.into() {
            Comparand::Instant(t) => self.start <= t,
            Comparand::Item(item) => self.start <= item.start,
        }
    }

    /// `>`: compares ends.
    pub fn ends_after<'a>(&self, other: impl Into<Comparand<'a>>) -> bool {
        match other.into() {
            Comparand::Instant(t) => self.end > t,
            Comparand::Item(item) => self.end > item.end,
        }
    }

    /// `>=`: compares ends.
    pub fn ends_at_or_after<'a>(&self, other: impl Into<Comparand<'a>>) -> bool {
        match other.into() {
            Comparand::Instant(t) => self.end >= t,
            Comparand::Item(item) => self.end >= item.end,
        }
    }

    /// `range_start <= item <= range_end` under the boundary predicates,
    /// i.e. the item touches the range.
    pub fn within_range(
        &self,
        range_start: DateTime<FixedOffset>,
        range_end: DateTime<FixedOffset>,
    ) -> bool {
        self.ends_at_or_after(range_start) && self.starts_at_or_before(range_end)
    }
}

fn epoch_seconds(dt: &DateTime<FixedOffset>) -> f64 {
    dt.timestamp() as f64 + f64::from(dt.timestamp_subsec_nanos()) / 1e9
}

impl PartialEq for CalendarItem {
    fn eq(&self, other: &Self) -> bool {
        self.item_id() == other.item_id()
            && self.start == other.start
            && self.end == other.end
            && self.attributes == other.attributes
    }
}

impl fmt::Display for CalendarItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let id: String = self.item_id().chars().take(10).collect();
        let text = |key: &str| {
            self.attributes
                .get(key)
                .map(|v| match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .unwrap_or_else(|| "None".to_string())
        };
        write!(
            f,
            "<CalendarItem: Start={}, End={}, Duration={}, Subject={}, HasAttachments={}, OrganizerName={}, ItemId[:10]={}..., RoomName={}, LocationId={}>",
            self.start.format("%Y-%m-%d %H:%M:%S"),
            self.end.format("%Y-%m-%d %H:%M:%S"),
            self.duration_secs(),
            self.subject(),
            self.has_attachments(),
            text(ATTR_ORGANIZER_NAME),
            id,
            text(ATTR_ROOM_NAME),
            text(ATTR_LOCATION_ID),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<FixedOffset> {
        FixedOffset::east_opt(3600)
            .unwrap()
            .with_ymd_and_hms(2024, 5, 6, h, m, 0)
            .unwrap()
    }

    fn attrs(id: &str, subject: &str) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert(ATTR_ITEM_ID.into(), json!(id));
        map.insert(ATTR_SUBJECT.into(), json!(subject));
        map
    }

    fn item(id: &str, start: DateTime<FixedOffset>, end: DateTime<FixedOffset>) -> CalendarItem {
        CalendarItem::new(start, end, attrs(id, "Meeting")).unwrap()
    }

    #[test]
    fn test_contains_instant_is_inclusive() {
        let it = item("a", at(10, 0), at(11, 0));
        assert!(it.contains(at(10, 0)));
        assert!(it.contains(at(10, 30)));
        assert!(it.contains(at(11, 0)));
        assert!(!it.contains(at(9, 59)));
        assert!(!it.contains(at(11, 1)));
    }

    #[test]
    fn test_contains_date_only_matches_endpoints() {
        let offset = FixedOffset::east_opt(3600).unwrap();
        let start = offset.with_ymd_and_hms(2024, 5, 6, 22, 0, 0).unwrap();
        let end = offset.with_ymd_and_hms(2024, 5, 8, 2, 0, 0).unwrap();
        let it = item("multi", start, end);

        assert!(it.contains(NaiveDate::from_ymd_opt(2024, 5, 6).unwrap()));
        assert!(it.contains(NaiveDate::from_ymd_opt(2024, 5, 8).unwrap()));
        // A day strictly inside the span is not "in" the item.
        assert!(!it.contains(NaiveDate::from_ymd_opt(2024, 5, 7).unwrap()));
    }

    #[test]
    fn test_boundary_predicates_are_asymmetric() {
        let long = item("long", at(9, 0), at(12, 0));
        let short = item("short", at(10, 0), at(11, 0));

        // Starts are compared for "before", ends for "after".
        assert!(long.starts_before(&short));
        assert!(long.ends_after(&short));
        assert!(!short.starts_before(&long));
        assert!(!short.ends_after(&long));

        assert!(short.starts_at_or_before(at(10, 0)));
        assert!(!short.starts_before(at(10, 0)));
        assert!(short.ends_at_or_after(at(11, 0)));
        assert!(!short.ends_after(at(11, 0)));
    }

    #[test]
    fn test_within_range_means_touching() {
        let it = item("a", at(10, 0), at(11, 0));
        assert!(it.within_range(at(9, 0), at(12, 0)));
        assert!(it.within_range(at(10, 30), at(12, 0)));
        assert!(it.within_range(at(11, 0), at(12, 0)));
        assert!(!it.within_range(at(11, 1), at(12, 0)));
        assert!(!it.within_range(at(8, 0), at(9, 59)));
    }

    #[test]
    fn test_new_validates_required_attributes() {
        let mut no_subject = Map::new();
        no_subject.insert(ATTR_ITEM_ID.into(), json!("x"));
        assert!(matches!(
            CalendarItem::new(at(10, 0), at(11, 0), no_subject),
            Err(CacheError::MissingAttribute(ATTR_SUBJECT))
        ));

        assert!(matches!(
            CalendarItem::new(at(10, 0), at(11, 0), Map::new()),
            Err(CacheError::MissingAttribute(ATTR_ITEM_ID))
        ));

        assert!(matches!(
            CalendarItem::new(at(11, 0), at(10, 0), attrs("x", "s")),
            Err(CacheError::InvalidInterval { .. })
        ));
    }

    #[test]
    fn test_get_reserved_and_missing_keys() {
        let mut it = item("a", at(10, 0), at(10, 45));
        assert_eq!(it.get(KEY_DURATION), Some(json!(2700.0)));
        assert_eq!(it.get(KEY_START), Some(json!("2024-05-06T10:00:00+01:00")));
        assert_eq!(it.get("Nope"), None);

        it.add_data("RoomName", json!("Boardroom"));
        assert_eq!(it.get("RoomName"), Some(json!("Boardroom")));

        // Derived keys cannot be overwritten through the attribute map.
        it.add_data(KEY_DURATION, json!(1));
        assert_eq!(it.get(KEY_DURATION), Some(json!(2700.0)));
    }

    #[test]
    fn test_equality_covers_attributes_and_times() {
        let a = item("a", at(10, 0), at(11, 0));
        let mut b = a.clone();
        assert_eq!(a, b);

        b.add_data(ATTR_SUBJECT, json!("Renamed"));
        assert_ne!(a, b);

        let moved = item("a", at(10, 0), at(11, 30));
        assert_ne!(a, moved);
    }

    #[test]
    fn test_storage_record_carries_epoch_times() {
        let it = item("a", at(10, 0), at(11, 0));
        let record = it.to_storage_record();
        assert_eq!(record.start, at(10, 0).timestamp() as f64);
        assert_eq!(record.duration, 3600.0);
        assert_eq!(record.attributes[ATTR_ITEM_ID], json!("a"));

        let offset = FixedOffset::east_opt(3600).unwrap();
        let back = CalendarItem::from_storage_record(record, &offset).unwrap();
        assert_eq!(back, it);
    }

    #[test]
    fn test_attachments_without_backend_fails() {
        let it = item("a", at(10, 0), at(11, 0));
        assert!(matches!(
            it.attachments(),
            Err(CacheError::NoAttachmentSource(_))
        ));
    }

    #[test]
    fn test_display_truncates_id() {
        let it = item("0123456789abcdef", at(10, 0), at(11, 0));
        let s = it.to_string();
        assert!(s.contains("ItemId[:10]=0123456789..."));
        assert!(s.contains("Subject=Meeting"));
        assert!(s.contains("RoomName=None"));
    }
}
