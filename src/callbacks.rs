// File: ./src/callbacks.rs
// Single-slot change listeners. Registering a listener replaces the previous one.
use crate::cache::ConnectionStatus;
use crate::model::CalendarItem;

pub type ItemCallback = Box<dyn FnMut(&CalendarItem) + Send>;
pub type StatusCallback = Box<dyn FnMut(ConnectionStatus) + Send>;

#[derive(Default)]
pub struct CacheCallbacks {
    new_item: Option<ItemCallback>,
    item_changed: Option<ItemCallback>,
    item_deleted: Option<ItemCallback>,
    connected: Option<StatusCallback>,
    disconnected: Option<StatusCallback>,
}

impl std::fmt::Debug for CacheCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheCallbacks")
            .field("new_item", &self.new_item.is_some())
            .field("item_changed", &self.item_changed.is_some())
            .field("item_deleted", &self.item_deleted.is_some())
            .field("connected", &self.connected.is_some())
            .field("disconnected", &self.disconnected.is_some())
            .finish()
    }
}

impl CacheCallbacks {
    pub fn set_new_item(&mut self, f: impl FnMut(&CalendarItem) + Send + 'static) {
        self.new_item = Some(Box::new(f));
    }

    pub fn set_item_changed(&mut self, f: impl FnMut(&CalendarItem) + Send + 'static) {
        self.item_changed = Some(Box::new(f));
    }

    pub fn set_item_deleted(&mut self, f: impl FnMut(&CalendarItem) + Send + 'static) {
        self.item_deleted = Some(Box::new(f));
    }

    pub fn set_connected(&mut self, f: impl FnMut(ConnectionStatus) + Send + 'static) {
        self.connected = Some(Box::new(f));
    }

    pub fn set_disconnected(&mut self, f: impl FnMut(ConnectionStatus) + Send + 'static) {
        self.disconnected = Some(Box::new(f));
    }

    pub(crate) fn fire_new_item(&mut self, item: &CalendarItem) {
        if let Some(cb) = self.new_item.as_mut() {
            cb(item);
        }
    }

    pub(crate) fn fire_item_changed(&mut self, item: &CalendarItem) {
        if let Some(cb) = self.item_changed.as_mut() {
            cb(item);
        }
    }

    pub(crate) fn fire_item_deleted(&mut self, item: &CalendarItem) {
        if let Some(cb) = self.item_deleted.as_mut() {
            cb(item);
        }
    }

    pub(crate) fn fire_status(&mut self, status: ConnectionStatus) {
        let slot = match status {
            ConnectionStatus::Connected => self.connected.as_mut(),
            ConnectionStatus::Disconnected => self.disconnected.as_mut(),
            ConnectionStatus::Unknown => None,
        };
        if let Some(cb) = slot {
            cb(status);
        }
    }
}
