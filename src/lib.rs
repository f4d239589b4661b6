// Crate root library declaration and module exports.
pub mod backend;
pub mod cache;
pub mod callbacks;
pub mod clock;
pub mod config;
pub mod context;
pub mod debounce;
pub mod error;
pub mod model;
pub mod service;
pub mod storage;
pub mod timezone;

pub use backend::{Attachment, CalendarBackend, NullBackend};
pub use cache::{CalendarCache, ConnectionStatus, ReconcileSummary};
pub use error::{CacheError, CacheResult};
pub use model::{CalendarItem, Moment, RawEventRecord};
