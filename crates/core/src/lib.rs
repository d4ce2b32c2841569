pub mod error;
pub mod handle;
pub mod id;
pub mod message;
pub mod promise;
pub mod queue;
pub mod value;

pub use error::{CoreError, Result};
pub use handle::{ActionHandle, AgentHandle, GoalHandle, ServiceHandle, TacticHandle};
pub use id::UniqueId;
pub use message::{Message, Schema, SchemaField};
pub use promise::{Promise, PromiseHook, PromiseStatus};
pub use queue::EventQueue;
pub use value::{Value, ValueKind};
