use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::adapter::BusAdapter;
use crate::protocol::ProtocolEvent;

/// In-memory adapter for tests and embedding: records everything sent and
/// replays anything pushed into its inbox.
#[derive(Default)]
pub struct MemoryAdapter {
    connected: bool,
    sent: Arc<Mutex<Vec<ProtocolEvent>>>,
    inbox: Arc<Mutex<VecDeque<ProtocolEvent>>>,
}

impl MemoryAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared view of the sent events, usable after the adapter has been
    /// handed to an engine.
    pub fn sent_handle(&self) -> Arc<Mutex<Vec<ProtocolEvent>>> {
        Arc::clone(&self.sent)
    }

    /// Shared inbox; pushed events are returned from the next `poll`.
    pub fn inbox_handle(&self) -> Arc<Mutex<VecDeque<ProtocolEvent>>> {
        Arc::clone(&self.inbox)
    }
}

impl BusAdapter for MemoryAdapter {
    fn connect(&mut self) -> bool {
        self.connected = true;
        true
    }

    fn disconnect(&mut self) {
        self.connected = false;
    }

    fn send_event(&mut self, event: &ProtocolEvent) -> bool {
        if !self.connected {
            return false;
        }
        self.sent.lock().push(event.clone());
        true
    }

    fn poll(&mut self, max: usize) -> Vec<ProtocolEvent> {
        let mut inbox = self.inbox.lock();
        let take = max.min(inbox.len());
        inbox.drain(..take).collect()
    }
}

#[cfg(test)]
mod tests {
    use volition_core::UniqueId;

    use super::*;
    use crate::protocol::ProtocolBody;

    fn event() -> ProtocolEvent {
        ProtocolEvent::new(
            UniqueId::random(),
            0,
            ProtocolBody::Control {
                agent: "a".into(),
                command: "start".into(),
            },
        )
    }

    #[test]
    fn test_send_requires_connect() {
        let mut adapter = MemoryAdapter::new();
        assert!(!adapter.send_event(&event()));
        assert!(adapter.connect());
        assert!(adapter.send_event(&event()));
        assert_eq!(adapter.sent_handle().lock().len(), 1);
    }

    #[test]
    fn test_poll_drains_up_to_max() {
        let mut adapter = MemoryAdapter::new();
        adapter.connect();
        for _ in 0..3 {
            adapter.inbox_handle().lock().push_back(event());
        }
        assert_eq!(adapter.poll(2).len(), 2);
        assert_eq!(adapter.poll(2).len(), 1);
        assert!(adapter.poll(2).is_empty());
    }

    #[test]
    fn test_reconnect_after_disconnect() {
        let mut adapter = MemoryAdapter::new();
        adapter.connect();
        adapter.disconnect();
        assert!(!adapter.send_event(&event()));
        assert!(adapter.connect());
        assert!(adapter.send_event(&event()));
    }
}
