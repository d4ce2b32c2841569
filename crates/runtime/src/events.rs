use volition_core::{
    AgentHandle, GoalHandle, Message, Promise, PromiseHook, TacticHandle, UniqueId, Value,
};

/// Status of an event through its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventStatus {
    Pending,
    Success,
    Fail,
}

/// How a goal should be dropped. Normal drops run the plan's drop coroutine;
/// forced drops skip it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropMode {
    Normal,
    Force,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    StartAgent,
    StopAgent,
    StopEngine,
}

/// A typed event record flowing through the engine and agent queues.
///
/// Every producer can hold a [`Promise`] settled by the event's status
/// transition; the event itself only carries the weak hook.
#[derive(Debug)]
pub struct Event {
    pub id: UniqueId,
    pub status: EventStatus,
    pub caller: Option<AgentHandle>,
    pub recipient: Option<AgentHandle>,
    pub reason: Option<String>,
    pub promise: PromiseHook,
    pub body: EventBody,
}

impl Event {
    pub fn new(body: EventBody) -> Self {
        Self {
            id: UniqueId::random(),
            status: EventStatus::Pending,
            caller: None,
            recipient: None,
            reason: None,
            promise: PromiseHook::default(),
            body,
        }
    }

    pub fn to(mut self, recipient: AgentHandle) -> Self {
        self.recipient = Some(recipient);
        self
    }

    pub fn sent_by(mut self, caller: AgentHandle) -> Self {
        self.caller = Some(caller);
        self
    }

    pub fn with_promise(mut self, promise: &Promise) -> Self {
        self.promise = promise.hook();
        self
    }

    pub fn with_status(mut self, status: EventStatus) -> Self {
        self.status = status;
        self
    }

    pub fn succeed(&mut self) {
        self.status = EventStatus::Success;
        self.promise.resolve();
    }

    pub fn fail(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        self.status = EventStatus::Fail;
        self.promise.fail(Some(reason.clone()));
        self.reason = Some(reason);
    }

    /// Short name for logging.
    pub fn kind(&self) -> &'static str {
        match &self.body {
            EventBody::Timer { .. } => "timer",
            EventBody::Control { .. } => "control",
            EventBody::Action { .. } => "action",
            EventBody::ActionComplete { .. } => "action-complete",
            EventBody::Message { .. } => "message",
            EventBody::Percept { .. } => "percept",
            EventBody::Pursue { .. } => "pursue",
            EventBody::Drop { .. } => "drop",
            EventBody::Schedule { .. } => "schedule",
            EventBody::Delegation { .. } => "delegation",
            EventBody::Auction { .. } => "auction",
            EventBody::ShareBeliefSet { .. } => "share-beliefset",
            EventBody::Tactic { .. } => "tactic",
            EventBody::Register { .. } => "register",
        }
    }
}

#[derive(Debug)]
pub enum EventBody {
    /// Request (status Pending) or expiry (status Success) of a timer.
    Timer {
        scheduled_at_ms: u64,
        duration_ms: u64,
        goal: GoalHandle,
        intention_id: UniqueId,
        task_id: UniqueId,
        plan: String,
    },
    Control {
        command: ControlCommand,
    },
    /// An action dispatched from a plan body. The request message is built at
    /// dispatch from the action's schema plus these resolved parameters.
    Action {
        action: String,
        params: Vec<(String, Value)>,
        goal: GoalHandle,
        intention_id: UniqueId,
        plan: String,
        task_id: UniqueId,
    },
    ActionComplete {
        action: String,
        task_id: UniqueId,
        outcome: EventStatus,
        goal: GoalHandle,
        intention_id: UniqueId,
        plan: String,
        reply: Option<Message>,
    },
    Message {
        message: Message,
        broadcast: bool,
    },
    /// A single belief update. `is_message` distinguishes beliefset updates
    /// from resource count updates.
    Percept {
        name: String,
        field: Option<String>,
        value: Value,
        is_message: bool,
        broadcast: bool,
    },
    Pursue {
        goal: String,
        parameters: Option<Message>,
        params: Vec<(String, Value)>,
        persistent: bool,
        parent_intention: Option<UniqueId>,
        parent_task: Option<UniqueId>,
        /// Held strongly so a fire-and-forget pursue still resolves sub-goal
        /// completion for the parent task.
        promise: Option<Promise>,
    },
    Drop {
        goal: GoalHandle,
        mode: DropMode,
    },
    Schedule {
        schedule_id: u64,
    },
    /// Auction legwork. With `analyse` set the recipient bids by returning
    /// the event with a score; without it the recipient executes the goal.
    Delegation {
        goal: GoalHandle,
        parameters: Option<Message>,
        analyse: bool,
        score: f64,
        schedule_id: u64,
        team: AgentHandle,
    },
    /// Registers a new auction on the issuing team.
    Auction {
        goal: GoalHandle,
        schedule_id: u64,
    },
    ShareBeliefSet {
        owner: AgentHandle,
        message: Message,
    },
    Tactic {
        tactic: TacticHandle,
    },
    Register {
        name: String,
        id: UniqueId,
        team: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fail_sets_reason_and_promise() {
        let promise = Promise::new(UniqueId::random());
        let mut event = Event::new(EventBody::Control {
            command: ControlCommand::StartAgent,
        })
        .with_promise(&promise);
        event.fail("no_recipient");
        assert_eq!(event.status, EventStatus::Fail);
        assert!(promise.failed());
        assert_eq!(promise.reason().as_deref(), Some("no_recipient"));
    }

    #[test]
    fn test_succeed_resolves_promise() {
        let promise = Promise::new(UniqueId::random());
        let mut event = Event::new(EventBody::Schedule { schedule_id: 1 }).with_promise(&promise);
        event.succeed();
        assert!(promise.succeeded());
    }
}
