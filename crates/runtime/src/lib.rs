pub mod agent;
pub mod coroutine;
pub mod engine;
pub mod error;
pub mod events;
pub mod goal;
pub mod intention;
pub mod plan;
pub mod registry;
pub mod role;
pub mod service;
pub mod tactic;
pub mod team;

pub use agent::Agent;
pub use coroutine::{Coroutine, CoroutineBuilder, Task, TaskKind, TERMINAL_LABEL};
pub use engine::{Engine, EngineHandle};
pub use error::{Result, RuntimeError};
pub use events::{ControlCommand, DropMode, Event, EventBody, EventStatus};
pub use goal::{Goal, GoalBuilder, GoalInstance, PlanHistory, PlanSelection};
pub use intention::{ExecState, FinishState, IntentionExecutor};
pub use plan::{Plan, PlanBuilder};
pub use registry::{AgentBuilder, AgentTemplate, ModelRegistry, ResourceTemplate};
pub use role::{Role, RoleBeliefSet};
pub use service::{ActionCall, ActionDef, ActionStatus, ActionTicket, Service, ServiceTemplate};
pub use tactic::{PlanOrder, Tactic, TacticBuilder, LOOP_FOREVER};
pub use team::{Auction, Bid, Member, TeamState};

pub mod prelude {
    pub use crate::coroutine::CoroutineBuilder;
    pub use crate::engine::Engine;
    pub use crate::events::DropMode;
    pub use crate::goal::GoalBuilder;
    pub use crate::plan::PlanBuilder;
    pub use crate::registry::{AgentBuilder, ResourceTemplate};
    pub use crate::role::Role;
    pub use crate::service::{ActionDef, ActionStatus};
    pub use crate::tactic::{PlanOrder, TacticBuilder};
    pub use volition_beliefs::{BeliefContext, BeliefQuery};
    pub use volition_core::{Message, Schema, UniqueId, Value, ValueKind};
}
