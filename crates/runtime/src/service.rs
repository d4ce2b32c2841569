use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use volition_beliefs::BeliefContext;
use volition_core::{AgentHandle, GoalHandle, Message, ServiceHandle, UniqueId};

/// What an action handler reports back to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionStatus {
    Success,
    Fail,
    /// The handler completes the action later via
    /// `Engine::complete_action` with the call's ticket.
    Pending,
}

/// The in-flight form of one dispatched action. Handlers read the request,
/// fill in the reply, and either finish inline or keep the ticket.
#[derive(Debug, Clone)]
pub struct ActionCall {
    pub action: String,
    pub request: Message,
    pub reply: Message,
    pub caller: AgentHandle,
    pub goal: GoalHandle,
    pub intention_id: UniqueId,
    pub plan: String,
    pub task_id: UniqueId,
}

impl ActionCall {
    /// Everything needed to complete this action asynchronously.
    pub fn ticket(&self) -> ActionTicket {
        ActionTicket {
            action: self.action.clone(),
            agent: self.caller.clone(),
            goal: self.goal.clone(),
            intention_id: self.intention_id,
            plan: self.plan.clone(),
            task_id: self.task_id,
        }
    }
}

/// Routing information for asynchronously completing an action.
#[derive(Debug, Clone)]
pub struct ActionTicket {
    pub action: String,
    pub agent: AgentHandle,
    pub goal: GoalHandle,
    pub intention_id: UniqueId,
    pub plan: String,
    pub task_id: UniqueId,
}

pub type ActionHandler =
    Arc<dyn Fn(&mut BeliefContext, &mut ActionCall) -> ActionStatus + Send + Sync>;

/// A committed action signature: name plus optional request/reply schemas.
#[derive(Debug, Clone, Default)]
pub struct ActionDef {
    pub name: String,
    pub request: Option<String>,
    pub reply: Option<String>,
}

impl ActionDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            request: None,
            reply: None,
        }
    }

    pub fn request(mut self, schema: impl Into<String>) -> Self {
        self.request = Some(schema.into());
        self
    }

    pub fn reply(mut self, schema: impl Into<String>) -> Self {
        self.reply = Some(schema.into());
        self
    }
}

/// Template for a service: a non-reasoning action provider agents attach to.
#[derive(Clone, Default)]
pub struct ServiceTemplate {
    pub name: String,
    pub actions: Vec<String>,
    pub handler: Option<ActionHandler>,
}

impl ServiceTemplate {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            actions: Vec::new(),
            handler: None,
        }
    }

    pub fn action(mut self, name: impl Into<String>) -> Self {
        self.actions.push(name.into());
        self
    }

    pub fn handler(
        mut self,
        func: impl Fn(&mut BeliefContext, &mut ActionCall) -> ActionStatus + Send + Sync + 'static,
    ) -> Self {
        self.handler = Some(Arc::new(func));
        self
    }
}

impl fmt::Debug for ServiceTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceTemplate")
            .field("name", &self.name)
            .field("actions", &self.actions)
            .finish()
    }
}

/// A service instance. Proxy services execute nothing locally; their events
/// are mirrored onto the bus for the remote instance.
pub struct Service {
    pub handle: ServiceHandle,
    pub template: String,
    pub proxy: bool,
    pub actions: HashSet<String>,
    pub handler: Option<ActionHandler>,
    pub context: BeliefContext,
}

impl Service {
    pub fn from_template(template: &ServiceTemplate, name: impl Into<String>, proxy: bool) -> Self {
        Self {
            handle: ServiceHandle::new(name, UniqueId::random()),
            template: template.name.clone(),
            proxy,
            actions: template.actions.iter().cloned().collect(),
            handler: template.handler.clone(),
            context: BeliefContext::new(),
        }
    }

    pub fn handles_action(&self, action: &str) -> bool {
        self.actions.contains(action)
    }

    pub fn run(&mut self, call: &mut ActionCall) -> ActionStatus {
        match &self.handler {
            Some(handler) => handler(&mut self.context, call),
            None => ActionStatus::Fail,
        }
    }
}

impl fmt::Debug for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Service")
            .field("handle", &self.handle)
            .field("template", &self.template)
            .field("proxy", &self.proxy)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_runs_handler() {
        let template = ServiceTemplate::new("Gol")
            .action("Step")
            .handler(|_, call| {
                call.reply.set("ok", true);
                ActionStatus::Success
            });
        let mut service = Service::from_template(&template, "gol-1", false);
        assert!(service.handles_action("Step"));
        let mut call = ActionCall {
            action: "Step".into(),
            request: Message::new("req"),
            reply: Message::new("reply"),
            caller: AgentHandle::new("a", UniqueId::random()),
            goal: GoalHandle::new("g", UniqueId::random()),
            intention_id: UniqueId::random(),
            plan: "p".into(),
            task_id: UniqueId::random(),
        };
        assert_eq!(service.run(&mut call), ActionStatus::Success);
        assert_eq!(call.reply.get_bool("ok"), Some(true));
    }

    #[test]
    fn test_service_without_handler_fails() {
        let template = ServiceTemplate::new("Empty").action("A");
        let mut service = Service::from_template(&template, "e", false);
        let mut call = ActionCall {
            action: "A".into(),
            request: Message::new("req"),
            reply: Message::new("reply"),
            caller: AgentHandle::new("a", UniqueId::random()),
            goal: GoalHandle::new("g", UniqueId::random()),
            intention_id: UniqueId::random(),
            plan: "p".into(),
            task_id: UniqueId::random(),
        };
        assert_eq!(service.run(&mut call), ActionStatus::Fail);
    }
}
