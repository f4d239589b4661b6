// File: ./src/backend.rs
//! Seam to the real calendar service (Exchange EWS, AdAstra, ...).
//!
//! A connector implements `CalendarBackend`. Every method has a default that
//! fails with `CacheError::NotImplemented`, so a connector only overrides what
//! its service supports. `NullBackend` overrides nothing and is what offline
//! tools use.
use crate::error::{CacheError, CacheResult};
use crate::model::{CalendarItem, RawEventRecord};
use chrono::{DateTime, FixedOffset};

/// A file attached to a booking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub name: String,
    pub content_type: Option<String>,
    pub content: Vec<u8>,
}

pub trait CalendarBackend: Send + Sync {
    /// Return every event in `[start, end]`. The result is treated as complete:
    /// cached items in that range that are missing from it get deleted.
    fn refresh_range(
        &self,
        _start: DateTime<FixedOffset>,
        _end: DateTime<FixedOffset>,
    ) -> CacheResult<Vec<RawEventRecord>> {
        Err(CacheError::NotImplemented("refresh_range"))
    }

    /// Re-fetch one event (subject lookups refresh their matches this way).
    fn refresh_single(&self, _item: &CalendarItem) -> CacheResult<RawEventRecord> {
        Err(CacheError::NotImplemented("refresh_single"))
    }

    fn attachments(&self, _item: &CalendarItem) -> CacheResult<Vec<Attachment>> {
        Err(CacheError::NotImplemented("attachments"))
    }

    fn create_event(
        &self,
        _subject: &str,
        _body: &str,
        _start: DateTime<FixedOffset>,
        _end: DateTime<FixedOffset>,
    ) -> CacheResult<RawEventRecord> {
        Err(CacheError::NotImplemented("create_event"))
    }

    fn change_event_time(
        &self,
        _item: &CalendarItem,
        _new_start: DateTime<FixedOffset>,
        _new_end: DateTime<FixedOffset>,
    ) -> CacheResult<()> {
        Err(CacheError::NotImplemented("change_event_time"))
    }

    fn delete_event(&self, _item: &CalendarItem) -> CacheResult<()> {
        Err(CacheError::NotImplemented("delete_event"))
    }
}

/// Backend with no service behind it.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullBackend;

impl CalendarBackend for NullBackend {}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_null_backend_reports_not_implemented() {
        let now = FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
            .unwrap();
        let err = NullBackend.refresh_range(now, now).unwrap_err();
        assert!(matches!(err, CacheError::NotImplemented("refresh_range")));
        assert_eq!(
            err.to_string(),
            "refresh_range is not implemented by this calendar backend"
        );

        let err = NullBackend.create_event("s", "b", now, now).unwrap_err();
        assert!(matches!(err, CacheError::NotImplemented("create_event")));
    }
}
