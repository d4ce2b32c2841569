use crate::protocol::ProtocolEvent;

/// Pluggable sink/source for protocol-level events.
///
/// The engine transcodes internal events on the way out and accepts received
/// events on the way in; with no adapter attached all bus operations are
/// no-ops. Implementations must tolerate `connect` being called again after
/// `disconnect`.
pub trait BusAdapter: Send {
    /// Connect or reconnect to the transport layer.
    fn connect(&mut self) -> bool;

    /// Disconnect from the transport layer.
    fn disconnect(&mut self);

    /// Push one event onto the transport. Returns false when the event could
    /// not be sent.
    fn send_event(&mut self, event: &ProtocolEvent) -> bool;

    /// Consume up to `max` events the adapter has received.
    fn poll(&mut self, max: usize) -> Vec<ProtocolEvent>;
}
