use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use volition_bus::protocol::{message_from_json, message_to_json};
use volition_bus::{BusAdapter, ProtocolBody, ProtocolEvent};
use volition_core::{
    AgentHandle, EventQueue, GoalHandle, Message, Promise, Schema, ServiceHandle, UniqueId, Value,
};

use crate::agent::Agent;
use crate::error::{Result, RuntimeError};
use crate::events::{ControlCommand, DropMode, Event, EventBody, EventStatus};
use crate::goal::Goal;
use crate::intention::ExecState;
use crate::plan::Plan;
use crate::registry::{AgentTemplate, ModelRegistry, ResourceTemplate};
use crate::role::Role;
use crate::service::{ActionDef, ActionTicket, Service, ServiceTemplate};
use crate::tactic::Tactic;

/// A sleeping task waiting on the internal clock.
#[derive(Debug, Clone)]
pub(crate) struct PendingTimer {
    pub due_ms: u64,
    pub agent: AgentHandle,
    pub goal: GoalHandle,
    pub intention_id: UniqueId,
    pub task_id: UniqueId,
    pub plan: String,
}

/// The slice of engine state an agent may touch while it ticks. The agent
/// itself is temporarily out of the peer map.
pub(crate) struct EngineCtx<'a> {
    pub registry: &'a ModelRegistry,
    pub peers: &'a mut HashMap<UniqueId, Agent>,
    pub services: &'a mut HashMap<UniqueId, Service>,
    pub timers: &'a mut Vec<PendingTimer>,
    pub engine_queue: &'a EventQueue<Event>,
    pub clock_ms: u64,
    pub node_id: UniqueId,
    pub bus_attached: bool,
    pub bus_outbox: &'a mut Vec<ProtocolEvent>,
    pub stop: &'a AtomicBool,
}

impl EngineCtx<'_> {
    /// Queue a protocol event for the bus flush at the end of the tick.
    /// No-op without an adapter.
    pub fn emit(&mut self, body: ProtocolBody) {
        if self.bus_attached {
            self.bus_outbox
                .push(ProtocolEvent::new(self.node_id, self.clock_ms, body));
        }
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

fn status_str(status: EventStatus) -> &'static str {
    match status {
        EventStatus::Pending => "Pending",
        EventStatus::Success => "Success",
        EventStatus::Fail => "Fail",
    }
}

/// Mirror an internal event as a protocol event, for proxy agents whose real
/// instance lives across the bus.
pub(crate) fn transcode(event: &Event, agent: &AgentHandle) -> Option<ProtocolBody> {
    match &event.body {
        EventBody::Percept {
            name,
            field,
            value,
            is_message,
            ..
        } => Some(ProtocolBody::Percept {
            agent: agent.name.clone(),
            name: name.clone(),
            field: field.clone(),
            value: serde_json::to_value(value).unwrap_or(serde_json::Value::Null),
            resource: !*is_message,
        }),
        EventBody::Pursue {
            goal,
            parameters,
            persistent,
            ..
        } => Some(ProtocolBody::Pursue {
            agent: agent.name.clone(),
            goal: goal.clone(),
            message: parameters.as_ref().map(message_to_json),
            persistent: *persistent,
        }),
        EventBody::Drop { goal, mode } => Some(ProtocolBody::Drop {
            agent: agent.name.clone(),
            goal: goal.name.clone(),
            goal_id: goal.id.to_hex(),
            mode: if *mode == DropMode::Force { "Force" } else { "Normal" }.to_string(),
        }),
        EventBody::Message { message, .. } => Some(ProtocolBody::Message {
            agent: agent.name.clone(),
            message: message_to_json(message),
        }),
        EventBody::Control { command } => Some(ProtocolBody::Control {
            agent: agent.name.clone(),
            command: match command {
                ControlCommand::StartAgent => "start",
                ControlCommand::StopAgent => "stop",
                ControlCommand::StopEngine => "stop-engine",
            }
            .to_string(),
        }),
        EventBody::Delegation {
            goal,
            analyse,
            score,
            team,
            ..
        } => Some(ProtocolBody::Delegation {
            team: team.name.clone(),
            delegate: agent.name.clone(),
            goal: goal.name.clone(),
            goal_id: goal.id.to_hex(),
            analyse: *analyse,
            score: *score,
            status: status_str(event.status).to_string(),
        }),
        EventBody::Register { name, id, team } => Some(ProtocolBody::Register {
            name: name.clone(),
            id: id.to_hex(),
            team: *team,
        }),
        _ => None,
    }
}

/// Cloneable, thread-safe front door to a running engine. Producers on other
/// threads interact exclusively through the lock-free queue.
#[derive(Clone)]
pub struct EngineHandle {
    queue: Arc<EventQueue<Event>>,
    stop: Arc<AtomicBool>,
}

impl EngineHandle {
    pub fn send(&self, event: Event) {
        self.queue.enqueue(event);
    }

    pub fn pursue(&self, agent: AgentHandle, goal: &str, parameters: Option<Message>) -> Promise {
        let promise = Promise::new(UniqueId::random());
        self.queue.enqueue(
            Event::new(EventBody::Pursue {
                goal: goal.to_string(),
                parameters,
                params: Vec::new(),
                persistent: false,
                parent_intention: None,
                parent_task: None,
                promise: Some(promise.clone()),
            })
            .with_promise(&promise)
            .to(agent),
        );
        promise
    }

    pub fn set_belief(&self, agent: AgentHandle, message: &str, field: &str, value: Value) {
        self.queue.enqueue(
            Event::new(EventBody::Percept {
                name: message.to_string(),
                field: Some(field.to_string()),
                value,
                is_message: true,
                broadcast: false,
            })
            .to(agent),
        );
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

/// The reasoning engine: the model registry, the agent population, the
/// event queue, the clock and the optional bus adapter.
///
/// All reasoning is single-threaded and cooperative; `poll`/`execute` are the
/// only entry points that advance it.
pub struct Engine {
    registry: ModelRegistry,
    agents: HashMap<UniqueId, Agent>,
    /// Creation order; agents tick in this order.
    order: Vec<UniqueId>,
    services: HashMap<UniqueId, Service>,
    queue: Arc<EventQueue<Event>>,
    timers: Vec<PendingTimer>,
    clock_ms: u64,
    stop: Arc<AtomicBool>,
    exit_when_done: bool,
    node: AgentHandle,
    bus: Option<Box<dyn BusAdapter>>,
    bus_outbox: Vec<ProtocolEvent>,
    bus_send_error_logged: bool,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    pub fn new() -> Self {
        Self::with_name("volition")
    }

    pub fn with_name(name: &str) -> Self {
        Self {
            registry: ModelRegistry::default(),
            agents: HashMap::new(),
            order: Vec::new(),
            services: HashMap::new(),
            queue: Arc::new(EventQueue::new()),
            timers: Vec::new(),
            clock_ms: 0,
            stop: Arc::new(AtomicBool::new(false)),
            exit_when_done: false,
            node: AgentHandle::new(name, UniqueId::random()),
            bus: None,
            bus_outbox: Vec::new(),
            bus_send_error_logged: false,
        }
    }

    pub fn node(&self) -> &AgentHandle {
        &self.node
    }

    /// Monotonic milliseconds since construction, advanced by `poll`.
    pub fn internal_clock(&self) -> u64 {
        self.clock_ms
    }

    /// When set, `poll`/`execute` return once the queues are empty and no
    /// intentions remain.
    pub fn set_exit_when_done(&mut self, exit: bool) {
        self.exit_when_done = exit;
    }

    pub fn handle(&self) -> EngineHandle {
        EngineHandle {
            queue: Arc::clone(&self.queue),
            stop: Arc::clone(&self.stop),
        }
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    // ---- model registry -------------------------------------------------

    pub fn commit_message_schema(&mut self, schema: Schema) -> Result<()> {
        self.registry.commit_schema(schema)
    }

    pub fn commit_action(&mut self, action: ActionDef) -> Result<()> {
        self.registry.commit_action(action)
    }

    pub fn commit_goal(&mut self, goal: Goal) -> Result<()> {
        self.registry.commit_goal(goal)
    }

    pub fn commit_plan(&mut self, plan: Plan) -> Result<()> {
        self.registry.commit_plan(plan)
    }

    pub fn commit_role(&mut self, role: Role) -> Result<()> {
        self.registry.commit_role(role)
    }

    pub fn commit_resource(&mut self, resource: ResourceTemplate) -> Result<()> {
        self.registry.commit_resource(resource)
    }

    pub fn commit_tactic(&mut self, tactic: Tactic) -> Result<volition_core::TacticHandle> {
        let handle = tactic.handle.clone();
        self.registry.commit_tactic(tactic)?;
        Ok(handle)
    }

    pub fn commit_agent_template(&mut self, template: AgentTemplate) -> Result<()> {
        self.registry.commit_agent_template(template)
    }

    pub fn commit_service_template(&mut self, template: ServiceTemplate) -> Result<()> {
        self.registry.commit_service_template(template)
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    // ---- instance lifecycle ---------------------------------------------

    pub fn create_agent(&mut self, template: &str, name: &str) -> Result<AgentHandle> {
        self.create_agent_with_id(template, name, UniqueId::random(), false)
    }

    /// Proxy agents mirror their events onto the bus instead of reasoning
    /// locally; the concrete instance lives on a remote node.
    pub fn create_proxy_agent(&mut self, template: &str, name: &str) -> Result<AgentHandle> {
        self.create_agent_with_id(template, name, UniqueId::random(), true)
    }

    pub fn create_agent_with_id(
        &mut self,
        template: &str,
        name: &str,
        id: UniqueId,
        proxy: bool,
    ) -> Result<AgentHandle> {
        let Some(template) = self.registry.agent_templates.get(template) else {
            return Err(RuntimeError::UnknownTemplate(template.to_string()));
        };
        let is_team = template.team;
        let template_name = template.name.clone();
        let agent = Agent::from_template(template, name, id, &self.registry, proxy);
        let handle = agent.handle().clone();
        info!(agent = %handle, template = %template_name, team = is_team, "agent created");
        self.emit_protocol(ProtocolBody::Register {
            name: handle.name.clone(),
            id: handle.id.to_hex(),
            team: is_team,
        });
        self.agents.insert(handle.id, agent);
        self.order.push(handle.id);
        Ok(handle)
    }

    pub fn create_service(
        &mut self,
        template: &str,
        name: &str,
        proxy: bool,
    ) -> Result<ServiceHandle> {
        let Some(template) = self.registry.service_templates.get(template) else {
            return Err(RuntimeError::UnknownTemplate(template.to_string()));
        };
        let service = Service::from_template(template, name, proxy);
        let handle = service.handle.clone();
        self.services.insert(handle.id, service);
        Ok(handle)
    }

    pub fn attach_service(&mut self, agent: &AgentHandle, service: &ServiceHandle) -> Result<()> {
        if !self.services.contains_key(&service.id) {
            return Err(RuntimeError::UnknownTemplate(service.name.clone()));
        }
        let found = self
            .agents
            .get_mut(&agent.id)
            .ok_or_else(|| RuntimeError::UnknownAgent(agent.name.clone()))?;
        found.attach_service(service.clone());
        Ok(())
    }

    /// Remove the agent. Events already queued for it fail on dispatch with
    /// reason `no_recipient`.
    pub fn destroy_agent(&mut self, handle: &AgentHandle) -> Result<()> {
        let Some(agent) = self.agents.remove(&handle.id) else {
            return Err(RuntimeError::UnknownAgent(handle.name.clone()));
        };
        self.order.retain(|id| *id != handle.id);
        while let Some(mut event) = agent.queue().dequeue() {
            event.fail("no_recipient");
        }
        for team in self.agents.values_mut() {
            if let Some(team_state) = team.team.as_mut() {
                team_state.remove_member(handle);
            }
        }
        self.timers.retain(|t| t.agent.id != handle.id);
        self.emit_protocol(ProtocolBody::Deregister {
            name: handle.name.clone(),
            id: handle.id.to_hex(),
        });
        info!(agent = %handle, "agent destroyed");
        Ok(())
    }

    pub fn start_agent(&mut self, handle: &AgentHandle) -> Result<()> {
        let agent = self
            .agents
            .get_mut(&handle.id)
            .ok_or_else(|| RuntimeError::UnknownAgent(handle.name.clone()))?;
        agent.set_running(true);
        self.emit_protocol(ProtocolBody::Control {
            agent: handle.name.clone(),
            command: "start".to_string(),
        });
        Ok(())
    }

    pub fn stop_agent(&mut self, handle: &AgentHandle) -> Result<()> {
        let agent = self
            .agents
            .get_mut(&handle.id)
            .ok_or_else(|| RuntimeError::UnknownAgent(handle.name.clone()))?;
        agent.set_running(false);
        self.emit_protocol(ProtocolBody::Control {
            agent: handle.name.clone(),
            command: "stop".to_string(),
        });
        Ok(())
    }

    pub fn agent(&self, handle: &AgentHandle) -> Option<&Agent> {
        self.agents.get(&handle.id)
    }

    pub fn agent_by_name(&self, name: &str) -> Option<&Agent> {
        self.agents.values().find(|a| a.handle().name == name)
    }

    // ---- team membership ------------------------------------------------

    pub fn add_team_member(
        &mut self,
        team: &AgentHandle,
        member: &AgentHandle,
        role: &str,
    ) -> Result<()> {
        if !self.registry.roles.contains_key(role) {
            return Err(RuntimeError::UnknownRole(role.to_string()));
        }
        if !self.agents.contains_key(&member.id) {
            return Err(RuntimeError::UnknownAgent(member.name.clone()));
        }
        {
            let team_agent = self
                .agents
                .get_mut(&team.id)
                .ok_or_else(|| RuntimeError::UnknownAgent(team.name.clone()))?;
            let Some(team_state) = team_agent.team.as_mut() else {
                return Err(RuntimeError::NotATeam(team.name.clone()));
            };
            if !team_state.add_member(member.clone(), role) {
                return Err(RuntimeError::AlreadyMember {
                    team: team.name.clone(),
                    member: member.name.clone(),
                });
            }
        }
        if let Some(member_agent) = self.agents.get_mut(&member.id) {
            member_agent.memberships.push(team.clone());
        }
        self.emit_protocol(ProtocolBody::AgentJoinTeam {
            team: team.name.clone(),
            member: member.name.clone(),
            role: role.to_string(),
        });
        Ok(())
    }

    /// Remove a member. Outstanding bids from it are discarded; if it had
    /// already won a delegation, that delegation restarts as a fresh auction.
    pub fn remove_team_member(&mut self, team: &AgentHandle, member: &AgentHandle) -> Result<()> {
        let orphaned: Vec<UniqueId> = {
            let team_agent = self
                .agents
                .get_mut(&team.id)
                .ok_or_else(|| RuntimeError::UnknownAgent(team.name.clone()))?;
            let Some(team_state) = team_agent.team.as_mut() else {
                return Err(RuntimeError::NotATeam(team.name.clone()));
            };
            if !team_state.remove_member(member) {
                return Err(RuntimeError::NotAMember {
                    team: team.name.clone(),
                    member: member.name.clone(),
                });
            }
            team_agent
                .intentions
                .iter()
                .filter(|i| {
                    matches!(i.state(), ExecState::Delegated { winner } if winner.id == member.id)
                })
                .map(|i| i.id)
                .collect()
        };
        if let Some(member_agent) = self.agents.get_mut(&member.id) {
            member_agent.memberships.retain(|t| t.id != team.id);
        }
        self.emit_protocol(ProtocolBody::AgentLeaveTeam {
            team: team.name.clone(),
            member: member.name.clone(),
        });
        for intention_id in orphaned {
            self.with_agent(team.id, |agent, ctx| {
                agent.start_auction_for(intention_id, ctx);
            });
        }
        Ok(())
    }

    /// Run a closure with one agent checked out of the map and a full engine
    /// context, the same shape an engine tick uses.
    fn with_agent(&mut self, id: UniqueId, f: impl FnOnce(&mut Agent, &mut EngineCtx)) {
        let Some(mut agent) = self.agents.remove(&id) else {
            return;
        };
        let bus_attached = self.bus.is_some();
        {
            let mut ctx = EngineCtx {
                registry: &self.registry,
                peers: &mut self.agents,
                services: &mut self.services,
                timers: &mut self.timers,
                engine_queue: &self.queue,
                clock_ms: self.clock_ms,
                node_id: self.node.id,
                bus_attached,
                bus_outbox: &mut self.bus_outbox,
                stop: &self.stop,
            };
            f(&mut agent, &mut ctx);
        }
        self.agents.insert(id, agent);
    }

    // ---- event producers ------------------------------------------------

    pub fn pursue(
        &self,
        agent: &AgentHandle,
        goal: &str,
        parameters: Option<Message>,
    ) -> Result<Promise> {
        self.pursue_inner(agent, goal, parameters, false)
    }

    /// The goal is permanently desired: it re-enters plan selection after
    /// every success and never resolves until dropped.
    pub fn pursue_persistent(
        &self,
        agent: &AgentHandle,
        goal: &str,
        parameters: Option<Message>,
    ) -> Result<Promise> {
        self.pursue_inner(agent, goal, parameters, true)
    }

    fn pursue_inner(
        &self,
        agent: &AgentHandle,
        goal: &str,
        parameters: Option<Message>,
        persistent: bool,
    ) -> Result<Promise> {
        if !self.agents.contains_key(&agent.id) {
            return Err(RuntimeError::UnknownAgent(agent.name.clone()));
        }
        if !self.registry.goals.contains_key(goal) {
            return Err(RuntimeError::UnknownGoal(goal.to_string()));
        }
        let promise = Promise::new(UniqueId::random());
        self.queue.enqueue(
            Event::new(EventBody::Pursue {
                goal: goal.to_string(),
                parameters,
                params: Vec::new(),
                persistent,
                parent_intention: None,
                parent_task: None,
                promise: Some(promise.clone()),
            })
            .with_promise(&promise)
            .to(agent.clone()),
        );
        Ok(promise)
    }

    /// Drop every desire for the named goal on the agent.
    pub fn drop_goal(&self, agent: &AgentHandle, goal: &str, mode: DropMode) -> Promise {
        self.drop_goal_handle(agent, GoalHandle::new(goal, UniqueId::NIL), mode)
    }

    pub fn drop_goal_handle(&self, agent: &AgentHandle, goal: GoalHandle, mode: DropMode) -> Promise {
        let promise = Promise::new(UniqueId::random());
        self.queue.enqueue(
            Event::new(EventBody::Drop { goal, mode })
                .with_promise(&promise)
                .to(agent.clone()),
        );
        promise
    }

    /// Update one belief field on the agent, as a percept event.
    pub fn set_belief(&self, agent: &AgentHandle, message: &str, field: &str, value: Value) {
        self.queue.enqueue(
            Event::new(EventBody::Percept {
                name: message.to_string(),
                field: Some(field.to_string()),
                value,
                is_message: true,
                broadcast: false,
            })
            .to(agent.clone()),
        );
    }

    /// External mutation of a resource count, as a percept event.
    pub fn set_resource(&self, agent: &AgentHandle, resource: &str, count: i64) {
        self.queue.enqueue(
            Event::new(EventBody::Percept {
                name: resource.to_string(),
                field: None,
                value: Value::I64(count),
                is_message: false,
                broadcast: false,
            })
            .to(agent.clone()),
        );
    }

    /// Replace a whole beliefset on the agent.
    pub fn send_message(&self, agent: &AgentHandle, message: Message) -> Promise {
        let promise = Promise::new(UniqueId::random());
        self.queue.enqueue(
            Event::new(EventBody::Message {
                message,
                broadcast: false,
            })
            .with_promise(&promise)
            .to(agent.clone()),
        );
        promise
    }

    /// Install a committed tactic on the agent for the tactic's goal.
    pub fn set_tactic(&self, agent: &AgentHandle, tactic: &str) -> Result<()> {
        let Some(committed) = self.registry.tactics.get(tactic) else {
            return Err(RuntimeError::UnknownTactic(tactic.to_string()));
        };
        self.queue.enqueue(
            Event::new(EventBody::Tactic {
                tactic: committed.handle.clone(),
            })
            .to(agent.clone()),
        );
        Ok(())
    }

    /// Complete an action a handler left pending.
    pub fn complete_action(&self, ticket: ActionTicket, success: bool, reply: Option<Message>) {
        self.queue.enqueue(
            Event::new(EventBody::ActionComplete {
                action: ticket.action,
                task_id: ticket.task_id,
                outcome: if success {
                    EventStatus::Success
                } else {
                    EventStatus::Fail
                },
                goal: ticket.goal,
                intention_id: ticket.intention_id,
                plan: ticket.plan,
                reply,
            })
            .to(ticket.agent),
        );
    }

    // ---- bus ------------------------------------------------------------

    pub fn attach_bus(&mut self, mut adapter: Box<dyn BusAdapter>) {
        if !adapter.connect() {
            warn!("bus adapter failed to connect; events will be dropped until it reconnects");
        }
        self.bus = Some(adapter);
        self.bus_send_error_logged = false;
    }

    pub fn detach_bus(&mut self) {
        if let Some(mut adapter) = self.bus.take() {
            adapter.disconnect();
        }
        self.bus_outbox.clear();
    }

    fn emit_protocol(&mut self, body: ProtocolBody) {
        if self.bus.is_some() {
            self.bus_outbox
                .push(ProtocolEvent::new(self.node.id, self.clock_ms, body));
        }
    }

    fn flush_bus(&mut self) {
        if self.bus.is_none() {
            self.bus_outbox.clear();
            return;
        }
        let events: Vec<ProtocolEvent> = self.bus_outbox.drain(..).collect();
        let adapter = self.bus.as_mut().unwrap();
        for event in events {
            if !adapter.send_event(&event) && !self.bus_send_error_logged {
                // Logged once; later failures are suppressed.
                warn!("bus adapter failed to send an event");
                self.bus_send_error_logged = true;
            }
        }
    }

    /// Turn a received protocol event into an internal event, routed by
    /// agent name.
    fn inbound(&self, event: ProtocolEvent) -> Option<Event> {
        let by_name = |name: &str| {
            self.agents
                .values()
                .find(|a| a.handle().name == name)
                .map(|a| a.handle().clone())
        };
        match event.body {
            ProtocolBody::Pursue {
                agent,
                goal,
                message,
                persistent,
            } => {
                let recipient = by_name(&agent)?;
                Some(
                    Event::new(EventBody::Pursue {
                        goal,
                        parameters: message.as_ref().and_then(message_from_json),
                        params: Vec::new(),
                        persistent,
                        parent_intention: None,
                        parent_task: None,
                        promise: None,
                    })
                    .to(recipient),
                )
            }
            ProtocolBody::Percept {
                agent,
                name,
                field,
                value,
                resource,
            } => {
                let recipient = by_name(&agent)?;
                let value: Value = serde_json::from_value(value).ok()?;
                Some(
                    Event::new(EventBody::Percept {
                        name,
                        field,
                        value,
                        is_message: !resource,
                        broadcast: false,
                    })
                    .to(recipient),
                )
            }
            ProtocolBody::Drop {
                agent,
                goal,
                goal_id,
                mode,
            } => {
                let recipient = by_name(&agent)?;
                let id = UniqueId::from_hex(&goal_id).unwrap_or(UniqueId::NIL);
                Some(
                    Event::new(EventBody::Drop {
                        goal: GoalHandle::new(goal, id),
                        mode: if mode == "Force" {
                            DropMode::Force
                        } else {
                            DropMode::Normal
                        },
                    })
                    .to(recipient),
                )
            }
            ProtocolBody::Message { agent, message } => {
                let recipient = by_name(&agent)?;
                Some(
                    Event::new(EventBody::Message {
                        message: message_from_json(&message)?,
                        broadcast: false,
                    })
                    .to(recipient),
                )
            }
            ProtocolBody::Control { agent, command } => {
                let recipient = by_name(&agent)?;
                let command = match command.as_str() {
                    "start" => ControlCommand::StartAgent,
                    "stop" => ControlCommand::StopAgent,
                    "stop-engine" => ControlCommand::StopEngine,
                    _ => return None,
                };
                Some(Event::new(EventBody::Control { command }).to(recipient))
            }
            other => {
                debug!(?other, "ignoring inbound protocol event");
                None
            }
        }
    }

    // ---- scheduling -----------------------------------------------------

    fn route_event(&mut self, mut event: Event) {
        let Some(recipient) = event.recipient.clone() else {
            match &event.body {
                EventBody::Control {
                    command: ControlCommand::StopEngine,
                } => {
                    self.stop.store(true, Ordering::SeqCst);
                    event.succeed();
                }
                EventBody::Register { name, id, team } => {
                    let body = ProtocolBody::Register {
                        name: name.clone(),
                        id: id.to_hex(),
                        team: *team,
                    };
                    self.emit_protocol(body);
                    event.succeed();
                }
                _ => {
                    warn!(kind = event.kind(), "event without recipient dropped");
                    event.fail("no_recipient");
                }
            }
            return;
        };

        match self.agents.get_mut(&recipient.id) {
            Some(agent) => {
                // Start/stop controls act here so a stopped agent, whose
                // dispatcher is idle, can still be started.
                if let EventBody::Control { command } = &event.body {
                    match command {
                        ControlCommand::StartAgent => {
                            agent.set_running(true);
                            event.succeed();
                            return;
                        }
                        ControlCommand::StopAgent => {
                            agent.set_running(false);
                            event.succeed();
                            return;
                        }
                        ControlCommand::StopEngine => {}
                    }
                }
                agent.queue().enqueue(event);
            }
            None => {
                debug!(kind = event.kind(), recipient = %recipient, "recipient gone, event dropped");
                event.fail("no_recipient");
            }
        }
    }

    /// One engine tick: fire timers, drain and route the queue, pull bus
    /// input, tick every agent in creation order, flush the bus adapter.
    /// Returns the amount of work done and whether the engine is quiescent.
    fn tick(&mut self) -> (u64, bool) {
        let mut work = 0u64;

        let clock = self.clock_ms;
        let mut fired = Vec::new();
        self.timers.retain(|timer| {
            if timer.due_ms <= clock {
                fired.push(timer.clone());
                false
            } else {
                true
            }
        });
        for timer in fired {
            work += 1;
            if let Some(agent) = self.agents.get(&timer.agent.id) {
                agent.queue().enqueue(
                    Event::new(EventBody::Timer {
                        scheduled_at_ms: timer.due_ms,
                        duration_ms: 0,
                        goal: timer.goal,
                        intention_id: timer.intention_id,
                        task_id: timer.task_id,
                        plan: timer.plan,
                    })
                    .to(timer.agent.clone())
                    .with_status(EventStatus::Success),
                );
            }
        }

        while let Some(event) = self.queue.dequeue() {
            work += 1;
            self.route_event(event);
        }

        let inbound: Vec<ProtocolEvent> = match self.bus.as_mut() {
            Some(adapter) => adapter.poll(64),
            None => Vec::new(),
        };
        for protocol_event in inbound {
            work += 1;
            if let Some(event) = self.inbound(protocol_event) {
                self.route_event(event);
            }
        }

        let bus_attached = self.bus.is_some();
        let order = self.order.clone();
        for id in order {
            let Some(mut agent) = self.agents.remove(&id) else {
                continue;
            };
            {
                let mut ctx = EngineCtx {
                    registry: &self.registry,
                    peers: &mut self.agents,
                    services: &mut self.services,
                    timers: &mut self.timers,
                    engine_queue: &self.queue,
                    clock_ms: self.clock_ms,
                    node_id: self.node.id,
                    bus_attached,
                    bus_outbox: &mut self.bus_outbox,
                    stop: &self.stop,
                };
                let report = agent.tick(&mut ctx);
                work += report.events + report.transitions;
            }
            self.agents.insert(id, agent);
        }

        self.flush_bus();

        let quiescent = self.queue.is_empty()
            && self
                .agents
                .values()
                .all(|a| a.queue().is_empty() && a.intention_count() == 0);
        (work, quiescent)
    }

    /// Run ticks until the wall deadline, an explicit stop, quiescence under
    /// `exit_when_done`, or a tick that can make no further progress without
    /// external input. The internal clock advances by the full budget up
    /// front, so due timers fire within this poll. Returns ticks run.
    pub fn poll(&mut self, max_wall_ms: u64) -> u64 {
        self.clock_ms += max_wall_ms;
        let deadline = Instant::now() + Duration::from_millis(max_wall_ms);
        let mut ticks = 0;
        loop {
            let (work, quiescent) = self.tick();
            ticks += 1;
            if self.stop.load(Ordering::SeqCst) {
                break;
            }
            if self.exit_when_done && quiescent {
                break;
            }
            if work == 0 {
                // Beliefs only change through events; with no work done
                // nothing can unblock from inside.
                break;
            }
            if Instant::now() >= deadline {
                break;
            }
        }
        ticks
    }

    /// Poll until an explicit stop (or quiescence under `exit_when_done`).
    pub fn execute(&mut self) {
        let mut last = Instant::now();
        while !self.stop.load(Ordering::SeqCst) {
            let now = Instant::now();
            self.clock_ms += now.duration_since(last).as_millis() as u64;
            last = now;
            let (work, quiescent) = self.tick();
            if self.exit_when_done && quiescent {
                break;
            }
            if work == 0 {
                std::thread::sleep(Duration::from_millis(1));
            }
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.detach_bus();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::goal::GoalBuilder;
    use crate::registry::AgentBuilder;

    #[test]
    fn test_clock_advances_by_poll_budget() {
        let mut engine = Engine::new();
        engine.set_exit_when_done(true);
        assert_eq!(engine.internal_clock(), 0);
        engine.poll(250);
        assert_eq!(engine.internal_clock(), 250);
    }

    #[test]
    fn test_create_agent_requires_template() {
        let mut engine = Engine::new();
        assert!(matches!(
            engine.create_agent("nosuch", "a"),
            Err(RuntimeError::UnknownTemplate(_))
        ));
    }

    #[test]
    fn test_pursue_validates_agent_and_goal() {
        let mut engine = Engine::new();
        engine
            .commit_agent_template(AgentBuilder::new("t").build())
            .unwrap();
        let a = engine.create_agent("t", "a").unwrap();
        assert!(matches!(
            engine.pursue(&a, "nosuch", None),
            Err(RuntimeError::UnknownGoal(_))
        ));
        let ghost = AgentHandle::new("ghost", UniqueId::random());
        engine.commit_goal(GoalBuilder::new("G").build()).unwrap();
        assert!(matches!(
            engine.pursue(&ghost, "G", None),
            Err(RuntimeError::UnknownAgent(_))
        ));
    }

    #[test]
    fn test_routed_pursue_to_missing_agent_fails_no_recipient() {
        let mut engine = Engine::new();
        engine.set_exit_when_done(true);
        engine.commit_goal(GoalBuilder::new("G").build()).unwrap();
        let handle = engine.handle();
        let promise = handle.pursue(AgentHandle::new("ghost", UniqueId::random()), "G", None);
        engine.poll(10);
        assert!(promise.failed());
        assert_eq!(promise.reason().as_deref(), Some("no_recipient"));
    }

    #[test]
    fn test_stop_engine_control_event_ends_execute() {
        let mut engine = Engine::new();
        let handle = engine.handle();
        handle.send(Event::new(EventBody::Control {
            command: ControlCommand::StopEngine,
        }));
        engine.execute();
    }

    #[test]
    fn test_start_control_event_starts_a_stopped_agent() {
        let mut engine = Engine::new();
        engine.set_exit_when_done(true);
        engine
            .commit_agent_template(AgentBuilder::new("t").build())
            .unwrap();
        let a = engine.create_agent("t", "a").unwrap();
        assert!(!engine.agent(&a).unwrap().running());
        engine.handle().send(
            Event::new(EventBody::Control {
                command: ControlCommand::StartAgent,
            })
            .to(a.clone()),
        );
        engine.poll(10);
        assert!(engine.agent(&a).unwrap().running());
    }
}
