pub mod adapter;
pub mod error;
pub mod json;
pub mod memory;
pub mod protocol;

pub use adapter::BusAdapter;
pub use error::{BusError, Result};
pub use json::JsonAdapter;
pub use memory::MemoryAdapter;
pub use protocol::{BdiLogLevel, ProtocolBody, ProtocolEvent};
