// File: ./src/model/mod.rs
pub mod item;
pub mod record;

pub use item::{CalendarItem, Comparand, Moment};
pub use record::{RawEventRecord, StorageBlob, StorageRecord};
