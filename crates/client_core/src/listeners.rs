use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
};

use shared::protocol::{GatewayEvent, GatewayEventKind};

pub type EventCallback = Arc<dyn Fn(&GatewayEvent) + Send + Sync>;

/// Identifies one registered callback. Removal is by handle, so two consumers
/// subscribed to the same event never unhook each other.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerHandle {
    kind: GatewayEventKind,
    id: u64,
}

/// Subscriber registry keyed by event kind and callback identity. Callbacks
/// run inline on the event loop task; they must not block.
#[derive(Default)]
pub struct ListenerRegistry {
    next_id: AtomicU64,
    listeners: Mutex<HashMap<GatewayEventKind, Vec<(u64, EventCallback)>>>,
}

impl ListenerRegistry {
    pub fn register(&self, kind: GatewayEventKind, callback: EventCallback) -> ListenerHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
        listeners.entry(kind).or_default().push((id, callback));
        ListenerHandle { kind, id }
    }

    /// Removes exactly the callback the handle was issued for. Returns false
    /// when it was already removed.
    pub fn remove(&self, handle: &ListenerHandle) -> bool {
        let mut listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
        let Some(entries) = listeners.get_mut(&handle.kind) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|(id, _)| *id != handle.id);
        before != entries.len()
    }

    pub fn dispatch(&self, event: &GatewayEvent) {
        let callbacks: Vec<EventCallback> = {
            let listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
            listeners
                .get(&event.kind())
                .map(|entries| entries.iter().map(|(_, cb)| Arc::clone(cb)).collect())
                .unwrap_or_default()
        };
        for callback in callbacks {
            callback(event);
        }
    }

    pub fn clear(&self) {
        self.listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    #[cfg(test)]
    pub fn count(&self, kind: GatewayEventKind) -> usize {
        self.listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&kind)
            .map_or(0, Vec::len)
    }
}
