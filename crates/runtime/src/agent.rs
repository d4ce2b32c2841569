use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use volition_beliefs::{BeliefContext, PerceptSink, Resource};
use volition_bus::protocol::{message_to_json, ProtocolBody};
use volition_core::{
    AgentHandle, EventQueue, GoalHandle, Message, Promise, ServiceHandle, UniqueId, Value,
};

use crate::coroutine::BdiLogRecord;
use crate::engine::{transcode, EngineCtx, PendingTimer};
use crate::events::{ControlCommand, DropMode, Event, EventBody, EventStatus};
use crate::goal::GoalInstance;
use crate::intention::{DelegationOrigin, ExecState, FinishState, IntentionCtx, IntentionExecutor};
use crate::registry::{AgentTemplate, ModelRegistry};
use crate::service::{ActionCall, ActionHandler, ActionStatus};
use crate::team::TeamState;

/// Counters from one agent tick, feeding the engine's quiescence detection.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct TickReport {
    pub events: u64,
    pub transitions: u64,
}

/// Publishes resource count changes as percept events on the owning agent's
/// queue.
struct QueueSink {
    queue: Arc<EventQueue<Event>>,
    agent: AgentHandle,
}

impl PerceptSink for QueueSink {
    fn resource_changed(&self, resource: &str, count: i64) {
        self.queue.enqueue(
            Event::new(EventBody::Percept {
                name: resource.to_string(),
                field: None,
                value: Value::I64(count),
                is_message: false,
                broadcast: false,
            })
            .sent_by(self.agent.clone())
            .to(self.agent.clone()),
        );
    }
}

/// A reasoning agent: a belief context, a dispatcher queue and the active
/// intentions. Teams are agents with [`TeamState`] attached. Agents never
/// share mutable state; everything between them travels as events.
pub struct Agent {
    handle: AgentHandle,
    template: String,
    running: bool,
    proxy: bool,
    pub(crate) context: BeliefContext,
    queue: Arc<EventQueue<Event>>,
    pub(crate) intentions: Vec<IntentionExecutor>,
    /// Goal name to tactic name.
    tactics: HashMap<String, String>,
    plans: Vec<String>,
    /// The agent may select any committed plan (empty explicit list on a
    /// non-team template).
    any_plan: bool,
    roles: Vec<String>,
    handlers: HashMap<String, ActionHandler>,
    attached_services: Vec<ServiceHandle>,
    pub(crate) team: Option<TeamState>,
    /// Teams this agent is a member of.
    pub(crate) memberships: Vec<AgentHandle>,
}

impl Agent {
    pub(crate) fn from_template(
        template: &AgentTemplate,
        name: &str,
        id: UniqueId,
        registry: &ModelRegistry,
        proxy: bool,
    ) -> Self {
        let handle = AgentHandle::new(name, id);
        let queue = Arc::new(EventQueue::new());
        let mut context = BeliefContext::new();
        for schema_name in &template.beliefsets {
            if let Some(schema) = registry.schema(schema_name) {
                context.set_message(schema.instantiate());
            }
        }
        for resource_name in &template.resources {
            if let Some(resource) = registry.resources.get(resource_name) {
                context.add_resource(Resource::new(&resource.name, resource.min, resource.max));
            }
        }
        context.install_sink(Arc::new(QueueSink {
            queue: Arc::clone(&queue),
            agent: handle.clone(),
        }));
        // Creation writes are initial state, not shareable updates.
        context.take_dirty();

        let mut tactics = HashMap::new();
        for tactic_name in &template.tactics {
            if let Some(tactic) = registry.tactic(tactic_name) {
                tactics.insert(tactic.goal.clone(), tactic_name.clone());
            }
        }

        Self {
            handle,
            template: template.name.clone(),
            running: false,
            proxy,
            context,
            queue,
            intentions: Vec::new(),
            tactics,
            plans: template.plans.clone(),
            any_plan: template.plans.is_empty() && !template.team,
            roles: template.roles.clone(),
            handlers: template.handlers.clone(),
            attached_services: Vec::new(),
            team: template.team.then(|| TeamState::new(template.auction_timeout_ms)),
            memberships: Vec::new(),
        }
    }

    pub fn handle(&self) -> &AgentHandle {
        &self.handle
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn running(&self) -> bool {
        self.running
    }

    pub(crate) fn set_running(&mut self, running: bool) {
        self.running = running;
    }

    pub fn is_team(&self) -> bool {
        self.team.is_some()
    }

    pub fn context(&self) -> &BeliefContext {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut BeliefContext {
        &mut self.context
    }

    pub fn intention_count(&self) -> usize {
        self.intentions.len()
    }

    pub fn intentions(&self) -> &[IntentionExecutor] {
        &self.intentions
    }

    /// Members of this team; empty for regular agents.
    pub fn team_members(&self) -> &[crate::team::Member] {
        self.team
            .as_ref()
            .map(|t| t.members.as_slice())
            .unwrap_or(&[])
    }

    pub(crate) fn queue(&self) -> &Arc<EventQueue<Event>> {
        &self.queue
    }

    pub(crate) fn attach_service(&mut self, service: ServiceHandle) {
        if !self.attached_services.contains(&service) {
            self.attached_services.push(service);
        }
    }

    /// Route an event: own queue for self, a peer's queue when it is known,
    /// otherwise back through the engine queue.
    fn route(&self, event: Event, ctx: &mut EngineCtx) {
        match &event.recipient {
            Some(recipient) if recipient.id == self.handle.id => self.queue.enqueue(event),
            Some(recipient) => match ctx.peers.get(&recipient.id) {
                Some(peer) => peer.queue.enqueue(event),
                None => ctx.engine_queue.enqueue(event),
            },
            None => ctx.engine_queue.enqueue(event),
        }
    }

    /// One engine tick for this agent: drain the dispatcher, settle due
    /// auctions, advance intentions, then share role beliefsets.
    pub(crate) fn tick(&mut self, ctx: &mut EngineCtx) -> TickReport {
        let mut report = TickReport::default();
        if !self.running {
            return report;
        }
        let mut bdi_log = Vec::new();

        while let Some(event) = self.queue.dequeue() {
            report.events += 1;
            self.dispatch(event, ctx, &mut bdi_log);
        }

        self.finalize_auctions(ctx);

        let mut intentions = std::mem::take(&mut self.intentions);
        for intention in intentions.iter_mut() {
            let mut ictx = IntentionCtx {
                beliefs: &mut self.context,
                queue: &self.queue,
                agent: &self.handle,
                clock_ms: ctx.clock_ms,
                registry: ctx.registry,
                tactics: &self.tactics,
                agent_plans: &self.plans,
                any_plan: self.any_plan,
                bdi_log: &mut bdi_log,
            };
            if intention.tick(&mut ictx) {
                report.transitions += 1;
            }
        }
        // Dispatch may have installed intentions already (sub-goals finish
        // registration through the queue, so only the taken list is live).
        debug_assert!(self.intentions.is_empty());
        let (done, keep): (Vec<_>, Vec<_>) = intentions
            .into_iter()
            .partition(|i| i.finished().is_some());
        self.intentions = keep;
        for intention in done {
            report.transitions += 1;
            self.conclude(intention, ctx);
        }

        self.share_beliefsets(ctx);

        for record in bdi_log {
            ctx.emit(ProtocolBody::BdiLog {
                level: volition_bus::BdiLogLevel::Normal,
                agent: self.handle.name.clone(),
                goal: record.goal.name.clone(),
                goal_id: record.goal.id.to_hex(),
                intention_id: record.intention_id.to_hex(),
                plan: record.plan.clone(),
                task_id: record.task_id.to_hex(),
                message: record.message,
            });
        }
        report
    }

    /// Tear-down for a finished intention: tell the parent task, report a
    /// delegation outcome back to the team.
    fn conclude(&mut self, intention: IntentionExecutor, ctx: &mut EngineCtx) {
        let state = intention.finished().expect("concluding unfinished intention");
        let success = state == FinishState::Success;
        if let Some((parent_id, task_id)) = intention.parent {
            if let Some(parent) = self.intentions.iter_mut().find(|i| i.id == parent_id) {
                parent.on_task_complete(task_id, success);
            }
        }
        if let Some(origin) = intention.delegated_from.clone() {
            let mut event = Event::new(EventBody::Delegation {
                goal: origin.goal.clone(),
                parameters: None,
                analyse: false,
                score: 0.0,
                schedule_id: origin.schedule_id,
                team: origin.team.clone(),
            })
            .sent_by(self.handle.clone())
            .to(origin.team.clone());
            event.status = if success {
                EventStatus::Success
            } else {
                EventStatus::Fail
            };
            event.reason = intention.finish_reason().map(str::to_string);
            self.route(event, ctx);
            ctx.emit(ProtocolBody::Delegation {
                team: origin.team.name.clone(),
                delegate: self.handle.name.clone(),
                goal: origin.goal.name.clone(),
                goal_id: origin.goal.id.to_hex(),
                analyse: false,
                score: 0.0,
                status: if success { "Success" } else { "Fail" }.to_string(),
            });
        }
    }

    fn dispatch(&mut self, event: Event, ctx: &mut EngineCtx, bdi_log: &mut Vec<BdiLogRecord>) {
        if self.proxy {
            // Proxy agents execute nothing locally; their traffic is mirrored
            // onto the bus for the remote instance.
            if let Some(body) = transcode(&event, &self.handle) {
                ctx.emit(body);
            }
            event.promise.resolve();
            return;
        }

        let Event {
            status,
            caller,
            reason,
            promise,
            body,
            ..
        } = event;

        match body {
            EventBody::Control { command } => {
                match command {
                    ControlCommand::StartAgent => self.running = true,
                    ControlCommand::StopAgent => self.running = false,
                    ControlCommand::StopEngine => ctx.request_stop(),
                }
                promise.resolve();
            }

            EventBody::Percept {
                name,
                field,
                value,
                is_message,
                broadcast,
            } => {
                let from_own_resource =
                    !is_message && caller.as_ref().map(|c| c.id) == Some(self.handle.id);
                if is_message {
                    match (&field, &value) {
                        (Some(field_name), _) => {
                            if self.context.message(&name).is_none() {
                                self.context.set_message(Message::new(name.clone()));
                            }
                            let _ = self.context.set_field(&name, field_name, value.clone());
                        }
                        (None, Value::Msg(msg)) => self.context.set_message((**msg).clone()),
                        (None, _) => {
                            warn!(percept = %name, "message percept without field or message value");
                        }
                    }
                } else if !from_own_resource {
                    // External resource update; own-sink percepts are pure
                    // wake-ups, the count is already current.
                    if let Some(count) = value.as_i64() {
                        if let Some(resource) = self.context.resource_mut(&name) {
                            resource.set(count);
                        }
                    }
                }
                if broadcast || !is_message {
                    ctx.emit(ProtocolBody::Percept {
                        agent: self.handle.name.clone(),
                        name,
                        field,
                        value: serde_json::to_value(&value).unwrap_or(serde_json::Value::Null),
                        resource: !is_message,
                    });
                }
                promise.resolve();
            }

            EventBody::Message { message, broadcast } => {
                if let Some(schema) = ctx.registry.schema(message.schema()) {
                    if let Err(err) = schema.verify(&message) {
                        warn!(agent = %self.handle, error = %err, "message rejected");
                        promise.fail(Some(err.to_string()));
                        return;
                    }
                }
                if broadcast {
                    ctx.emit(ProtocolBody::Message {
                        agent: self.handle.name.clone(),
                        message: message_to_json(&message),
                    });
                }
                self.context.set_message(message);
                promise.resolve();
            }

            EventBody::Pursue {
                goal,
                parameters,
                params,
                persistent,
                parent_intention,
                parent_task,
                promise: pursue_promise,
            } => {
                // The pursue promise is settled by the intention's finish,
                // not by dispatch.
                let _ = promise;
                self.handle_pursue(
                    goal,
                    parameters,
                    params,
                    persistent,
                    parent_intention.zip(parent_task),
                    pursue_promise,
                    ctx,
                    bdi_log,
                );
            }

            EventBody::Drop { goal, mode } => {
                let reason = reason.unwrap_or_else(|| "dropped by request".to_string());
                let mut matched = false;
                let mut forwards = Vec::new();
                for intention in &mut self.intentions {
                    let hit = if goal.id.valid() {
                        intention.goal.handle.id == goal.id
                    } else {
                        intention.goal.handle.name == goal.name
                    };
                    if hit {
                        matched = true;
                        if let ExecState::Delegated { winner } = intention.state() {
                            forwards.push((winner.clone(), intention.goal.handle.name.clone()));
                        }
                        intention.request_drop(mode, reason.clone());
                    }
                }
                for (winner, goal_name) in forwards {
                    let event = Event::new(EventBody::Drop {
                        goal: GoalHandle::new(goal_name, UniqueId::NIL),
                        mode,
                    })
                    .sent_by(self.handle.clone())
                    .to(winner);
                    self.route(event, ctx);
                }
                ctx.emit(ProtocolBody::Drop {
                    agent: self.handle.name.clone(),
                    goal: goal.name.clone(),
                    goal_id: goal.id.to_hex(),
                    mode: if mode == DropMode::Force { "Force" } else { "Normal" }.to_string(),
                });
                if matched {
                    promise.resolve();
                } else {
                    promise.fail(Some(format!("no desire matches goal '{}'", goal.name)));
                }
            }

            EventBody::Action {
                action,
                params,
                goal,
                intention_id,
                plan,
                task_id,
            } => {
                self.handle_action(action, params, goal, intention_id, plan, task_id, ctx);
                promise.resolve();
            }

            EventBody::ActionComplete {
                action,
                task_id,
                outcome,
                intention_id,
                reply,
                ..
            } => {
                let success = outcome == EventStatus::Success;
                if success {
                    if let Some(reply) = reply {
                        if !reply.is_empty() {
                            self.context.push_action_reply(reply);
                        }
                    }
                }
                if let Some(intention) =
                    self.intentions.iter_mut().find(|i| i.id == intention_id)
                {
                    intention.on_task_complete(task_id, success);
                }
                ctx.emit(ProtocolBody::ActionUpdate {
                    agent: self.handle.name.clone(),
                    action,
                    task_id: task_id.to_hex(),
                    success,
                });
                if success {
                    promise.resolve();
                } else {
                    promise.fail(reason);
                }
            }

            EventBody::Timer {
                scheduled_at_ms,
                duration_ms,
                goal,
                intention_id,
                task_id,
                plan,
            } => match status {
                EventStatus::Pending => ctx.timers.push(PendingTimer {
                    due_ms: scheduled_at_ms + duration_ms,
                    agent: self.handle.clone(),
                    goal,
                    intention_id,
                    task_id,
                    plan,
                }),
                fired => {
                    let success = fired == EventStatus::Success;
                    if let Some(intention) =
                        self.intentions.iter_mut().find(|i| i.id == intention_id)
                    {
                        intention.on_task_complete(task_id, success);
                    }
                    promise.resolve();
                }
            },

            EventBody::Delegation {
                goal,
                parameters,
                analyse,
                score,
                schedule_id,
                team,
            } => self.handle_delegation(
                goal,
                parameters,
                analyse,
                score,
                schedule_id,
                team,
                status,
                caller,
                reason,
                promise,
                ctx,
                bdi_log,
            ),

            EventBody::Auction { goal, schedule_id } => {
                debug!(team = %self.handle, goal = %goal, schedule_id, "auction opened");
                promise.resolve();
            }

            EventBody::Schedule { schedule_id } => {
                // Advisory only; schedules are not consumed by the executor.
                debug!(agent = %self.handle, schedule_id, "schedule event ignored");
                promise.resolve();
            }

            EventBody::ShareBeliefSet { owner, message } => {
                let key = format!("{}@{}", message.schema(), owner.name);
                self.context.set_named_message(key, message);
                promise.resolve();
            }

            EventBody::Tactic { tactic } => match ctx.registry.tactic(&tactic.name) {
                Some(committed) => {
                    self.tactics
                        .insert(committed.goal.clone(), tactic.name.clone());
                    promise.resolve();
                }
                None => promise.fail(Some(format!("unknown tactic '{}'", tactic.name))),
            },

            EventBody::Register { name, id, team } => {
                ctx.emit(ProtocolBody::Register {
                    name,
                    id: id.to_hex(),
                    team,
                });
                promise.resolve();
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn handle_pursue(
        &mut self,
        goal_name: String,
        parameters: Option<Message>,
        params: Vec<(String, Value)>,
        persistent: bool,
        parent: Option<(UniqueId, UniqueId)>,
        promise: Option<Promise>,
        ctx: &mut EngineCtx,
        bdi_log: &mut Vec<BdiLogRecord>,
    ) {
        let fail = |this: &mut Self, reason: String| {
            warn!(agent = %this.handle, "{reason}");
            if let Some(promise) = &promise {
                promise.hook().fail(Some(reason));
            }
            if let Some((parent_id, task_id)) = parent {
                if let Some(parent) = this.intentions.iter_mut().find(|i| i.id == parent_id) {
                    parent.on_task_complete(task_id, false);
                }
            }
        };

        let Some(template) = ctx.registry.goal(&goal_name).cloned() else {
            fail(self, format!("unknown goal '{goal_name}'"));
            return;
        };

        let mut message = parameters;
        if message.is_none() && (!params.is_empty() || template.message_schema.is_some()) {
            let mut built = template
                .message_schema
                .as_ref()
                .and_then(|name| ctx.registry.schema(name))
                .map(|schema| schema.instantiate())
                .unwrap_or_else(|| Message::new(goal_name.clone()));
            for (field, value) in &params {
                built.set(field.clone(), value.clone());
            }
            message = Some(built);
        }

        if let Some(schema_name) = &template.message_schema {
            let schema = ctx
                .registry
                .schema(schema_name)
                .expect("goal schema validated at commit");
            let valid = message
                .as_ref()
                .map(|m| schema.verify(m))
                .unwrap_or_else(|| schema.verify(&Message::new(schema_name.clone())));
            if let Err(err) = valid {
                fail(self, format!("pursue of '{goal_name}' rejected: {err}"));
                return;
            }
        }

        ctx.emit(ProtocolBody::Pursue {
            agent: self.handle.name.clone(),
            goal: goal_name.clone(),
            message: message.as_ref().map(message_to_json),
            persistent,
        });

        let instance = GoalInstance::new(template, message, persistent);
        let mut intention = IntentionExecutor::new(instance, promise);
        intention.parent = parent;

        if self.should_delegate(&goal_name, ctx.registry) {
            let id = intention.id;
            self.intentions.push(intention);
            self.start_auction_for(id, ctx);
        } else {
            self.run_intention_once(&mut intention, ctx, bdi_log);
            self.intentions.push(intention);
        }
    }

    /// First step runs inside the dispatching tick so a same-tick drop finds
    /// the plan already executing.
    fn run_intention_once(
        &mut self,
        intention: &mut IntentionExecutor,
        ctx: &mut EngineCtx,
        bdi_log: &mut Vec<BdiLogRecord>,
    ) {
        let mut ictx = IntentionCtx {
            beliefs: &mut self.context,
            queue: &self.queue,
            agent: &self.handle,
            clock_ms: ctx.clock_ms,
            registry: ctx.registry,
            tactics: &self.tactics,
            agent_plans: &self.plans,
            any_plan: self.any_plan,
            bdi_log,
        };
        intention.tick(&mut ictx);
    }

    /// A team delegates when it does not advertise a plan for the goal itself
    /// but some member's role does.
    fn should_delegate(&self, goal: &str, registry: &ModelRegistry) -> bool {
        let Some(team) = &self.team else {
            return false;
        };
        // Teams advertise only plans they explicitly own.
        let local = registry
            .plans_for_goal(goal)
            .iter()
            .any(|p| self.plans.contains(p));
        !local && !team.delegates_for(goal, registry).is_empty()
    }

    pub(crate) fn start_auction_for(&mut self, intention_id: UniqueId, ctx: &mut EngineCtx) {
        let Some(pos) = self.intentions.iter().position(|i| i.id == intention_id) else {
            return;
        };
        let goal_handle = self.intentions[pos].goal.handle.clone();
        let parameters = self.intentions[pos].goal.message.clone();

        let candidates = self
            .team
            .as_ref()
            .map(|t| t.delegates_for(&goal_handle.name, ctx.registry))
            .unwrap_or_default();
        if candidates.is_empty() {
            self.intentions[pos].finish(FinishState::Failed, "no_delegate".to_string());
            return;
        }

        let (schedule_id, deadline_ms) = {
            let team = self.team.as_mut().expect("auction on a non-team agent");
            (
                team.next_schedule_id(),
                ctx.clock_ms + team.auction_timeout_ms,
            )
        };
        self.team.as_mut().unwrap().auctions.push(crate::team::Auction {
            goal: goal_handle.clone(),
            schedule_id,
            parameters: parameters.clone(),
            expected: candidates.clone(),
            bids: Vec::new(),
            failed: 0,
            deadline_ms,
        });
        self.intentions[pos].set_state(ExecState::Auctioning { schedule_id });

        self.queue.enqueue(
            Event::new(EventBody::Auction {
                goal: goal_handle.clone(),
                schedule_id,
            })
            .sent_by(self.handle.clone())
            .to(self.handle.clone()),
        );

        for candidate in candidates {
            ctx.emit(ProtocolBody::Delegation {
                team: self.handle.name.clone(),
                delegate: candidate.name.clone(),
                goal: goal_handle.name.clone(),
                goal_id: goal_handle.id.to_hex(),
                analyse: true,
                score: 0.0,
                status: "Pending".to_string(),
            });
            let event = Event::new(EventBody::Delegation {
                goal: goal_handle.clone(),
                parameters: parameters.clone(),
                analyse: true,
                score: 0.0,
                schedule_id,
                team: self.handle.clone(),
            })
            .sent_by(self.handle.clone())
            .to(candidate);
            self.route(event, ctx);
        }
    }

    /// Close out auctions that have every bid in or have timed out. Missing
    /// bids count as refusals.
    fn finalize_auctions(&mut self, ctx: &mut EngineCtx) {
        let clock = ctx.clock_ms;
        let mut due = Vec::new();
        if let Some(team) = self.team.as_mut() {
            team.auctions.retain(|auction| {
                if auction.complete() || auction.expired(clock) {
                    due.push(auction.clone());
                    false
                } else {
                    true
                }
            });
        }
        for auction in due {
            let position = self.intentions.iter().position(|i| {
                matches!(i.state(), ExecState::Auctioning { schedule_id } if *schedule_id == auction.schedule_id)
            });
            let Some(pos) = position else {
                debug!(team = %self.handle, goal = %auction.goal, "auction without desire, discarded");
                continue;
            };
            match auction.winner().cloned() {
                Some(bid) => {
                    debug!(
                        team = %self.handle,
                        goal = %auction.goal,
                        winner = %bid.bidder,
                        score = bid.score,
                        "auction won"
                    );
                    self.intentions[pos].set_state(ExecState::Delegated {
                        winner: bid.bidder.clone(),
                    });
                    ctx.emit(ProtocolBody::Delegation {
                        team: self.handle.name.clone(),
                        delegate: bid.bidder.name.clone(),
                        goal: auction.goal.name.clone(),
                        goal_id: auction.goal.id.to_hex(),
                        analyse: false,
                        score: bid.score,
                        status: "Pending".to_string(),
                    });
                    let event = Event::new(EventBody::Delegation {
                        goal: auction.goal.clone(),
                        parameters: auction.parameters.clone(),
                        analyse: false,
                        score: bid.score,
                        schedule_id: auction.schedule_id,
                        team: self.handle.clone(),
                    })
                    .sent_by(self.handle.clone())
                    .to(bid.bidder);
                    self.route(event, ctx);
                }
                None => {
                    self.intentions[pos].finish(FinishState::Failed, "no_delegate".to_string());
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn handle_delegation(
        &mut self,
        goal: GoalHandle,
        parameters: Option<Message>,
        analyse: bool,
        score: f64,
        schedule_id: u64,
        team: AgentHandle,
        status: EventStatus,
        caller: Option<AgentHandle>,
        reason: Option<String>,
        promise: volition_core::PromiseHook,
        ctx: &mut EngineCtx,
        bdi_log: &mut Vec<BdiLogRecord>,
    ) {
        match (analyse, status) {
            // Member side: asked to bid. The bid simulates taking the goal
            // on: the goal heuristic over current beliefs, or the current
            // intention load when no heuristic exists.
            (true, EventStatus::Pending) => {
                let can_handle = ctx
                    .registry
                    .plans_for_goal(&goal.name)
                    .iter()
                    .any(|p| self.any_plan || self.plans.contains(p));
                let (reply_status, bid) = if can_handle {
                    let bid = match ctx.registry.goal(&goal.name) {
                        Some(template) if template.heuristic.is_some() => {
                            self.context.set_goal_message(parameters.clone());
                            let score = template.score(&self.context);
                            self.context.set_goal_message(None);
                            score
                        }
                        _ => self.intentions.len() as f64,
                    };
                    (EventStatus::Success, bid)
                } else {
                    (EventStatus::Fail, 0.0)
                };
                let mut event = Event::new(EventBody::Delegation {
                    goal,
                    parameters,
                    analyse: true,
                    score: bid,
                    schedule_id,
                    team: team.clone(),
                })
                .sent_by(self.handle.clone())
                .to(team);
                event.status = reply_status;
                self.route(event, ctx);
                promise.resolve();
            }

            // Team side: a bid (or refusal) came back.
            (true, returned) => {
                let Some(bidder) = caller else {
                    return;
                };
                if let Some(team_state) = self.team.as_mut() {
                    if let Some(auction) = team_state.auction_mut(schedule_id) {
                        if auction.expected.iter().any(|h| h.id == bidder.id) {
                            if returned == EventStatus::Success {
                                auction.bids.push(crate::team::Bid {
                                    bidder,
                                    score,
                                });
                            } else {
                                auction.failed += 1;
                            }
                        }
                    }
                }
                promise.resolve();
            }

            // Member side: won the auction, execute the goal for the team.
            (false, EventStatus::Pending) => {
                let Some(template) = ctx.registry.goal(&goal.name).cloned() else {
                    let mut event = Event::new(EventBody::Delegation {
                        goal,
                        parameters: None,
                        analyse: false,
                        score: 0.0,
                        schedule_id,
                        team: team.clone(),
                    })
                    .sent_by(self.handle.clone())
                    .to(team);
                    event.status = EventStatus::Fail;
                    event.reason = Some("unknown goal".to_string());
                    self.route(event, ctx);
                    return;
                };
                let instance = GoalInstance::new(template, parameters, false);
                let mut intention = IntentionExecutor::new(instance, None);
                intention.delegated_from = Some(DelegationOrigin {
                    team,
                    goal,
                    schedule_id,
                });
                self.run_intention_once(&mut intention, ctx, bdi_log);
                self.intentions.push(intention);
                promise.resolve();
            }

            // Team side: the winner reports the delegated goal's outcome.
            (false, outcome) => {
                let success = outcome == EventStatus::Success;
                if let Some(intention) = self.intentions.iter_mut().find(|i| {
                    matches!(i.state(), ExecState::Delegated { .. }) && i.goal.handle.id == goal.id
                }) {
                    intention.finish(
                        if success {
                            FinishState::Success
                        } else {
                            FinishState::Failed
                        },
                        reason.unwrap_or_else(|| {
                            if success {
                                String::new()
                            } else {
                                "delegate failed".to_string()
                            }
                        }),
                    );
                }
                promise.resolve();
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn handle_action(
        &mut self,
        action: String,
        params: Vec<(String, Value)>,
        goal: GoalHandle,
        intention_id: UniqueId,
        plan: String,
        task_id: UniqueId,
        ctx: &mut EngineCtx,
    ) {
        let complete = |this: &Self, outcome: EventStatus, reply: Option<Message>| {
            this.queue.enqueue(
                Event::new(EventBody::ActionComplete {
                    action: action.clone(),
                    task_id,
                    outcome,
                    goal: goal.clone(),
                    intention_id,
                    plan: plan.clone(),
                    reply,
                })
                .sent_by(this.handle.clone())
                .to(this.handle.clone()),
            );
        };

        let Some(def) = ctx.registry.action(&action).cloned() else {
            warn!(agent = %self.handle, action = %action, "unknown action");
            complete(self, EventStatus::Fail, None);
            return;
        };

        let mut request = def
            .request
            .as_ref()
            .and_then(|name| ctx.registry.schema(name))
            .map(|schema| schema.instantiate())
            .unwrap_or_else(|| Message::new(action.clone()));
        for (field, value) in params {
            request.set(field, value);
        }
        let reply = def
            .reply
            .as_ref()
            .and_then(|name| ctx.registry.schema(name))
            .map(|schema| schema.instantiate())
            .unwrap_or_else(|| Message::new(format!("{action}#reply")));

        ctx.emit(ProtocolBody::ActionBegin {
            agent: self.handle.name.clone(),
            action: action.clone(),
            goal: goal.name.clone(),
            goal_id: goal.id.to_hex(),
            intention_id: intention_id.to_hex(),
            plan: plan.clone(),
            task_id: task_id.to_hex(),
        });

        let mut call = ActionCall {
            action: action.clone(),
            request,
            reply,
            caller: self.handle.clone(),
            goal: goal.clone(),
            intention_id,
            plan: plan.clone(),
            task_id,
        };

        // An attached service that declares the action takes precedence over
        // the agent's own handler.
        for service_handle in &self.attached_services {
            let Some(service) = ctx.services.get_mut(&service_handle.id) else {
                continue;
            };
            if !service.handles_action(&action) {
                continue;
            }
            if service.proxy {
                // The remote instance completes it through the bus.
                return;
            }
            let status = service.run(&mut call);
            match status {
                ActionStatus::Pending => {}
                ActionStatus::Success => complete(self, EventStatus::Success, Some(call.reply)),
                ActionStatus::Fail => complete(self, EventStatus::Fail, None),
            }
            return;
        }

        match self.handlers.get(&action).cloned() {
            Some(handler) => match handler(&mut self.context, &mut call) {
                ActionStatus::Pending => {}
                ActionStatus::Success => complete(self, EventStatus::Success, Some(call.reply)),
                ActionStatus::Fail => complete(self, EventStatus::Fail, None),
            },
            None => {
                warn!(agent = %self.handle, action = %action, "no handler for action");
                complete(self, EventStatus::Fail, None);
            }
        }
    }

    /// Role-gated belief sharing for the beliefsets that changed this tick:
    /// up to every team this agent writes to, and down to every member whose
    /// role reads from this team.
    fn share_beliefsets(&mut self, ctx: &mut EngineCtx) {
        let dirty = self.context.take_dirty();
        if dirty.is_empty() {
            return;
        }

        if !self.memberships.is_empty() {
            let mut shared = Vec::new();
            for role_name in &self.roles {
                let Some(role) = ctx.registry.role(role_name) else {
                    continue;
                };
                for beliefset in &role.beliefsets {
                    if beliefset.write_to_team
                        && dirty.contains(&beliefset.name)
                        && !shared.contains(&beliefset.name)
                    {
                        shared.push(beliefset.name.clone());
                    }
                }
            }
            for name in shared {
                let Some(message) = self.context.message(&name).cloned() else {
                    continue;
                };
                for team in self.memberships.clone() {
                    let event = Event::new(EventBody::ShareBeliefSet {
                        owner: self.handle.clone(),
                        message: message.clone(),
                    })
                    .sent_by(self.handle.clone())
                    .to(team);
                    self.route(event, ctx);
                }
            }
        }

        if let Some(team) = &self.team {
            for member in &team.members {
                let Some(role) = ctx.registry.role(&member.role) else {
                    continue;
                };
                for name in &dirty {
                    if !role.can_read_from_team(name) {
                        continue;
                    }
                    let Some(message) = self.context.message(name).cloned() else {
                        continue;
                    };
                    let event = Event::new(EventBody::ShareBeliefSet {
                        owner: self.handle.clone(),
                        message,
                    })
                    .sent_by(self.handle.clone())
                    .to(member.handle.clone());
                    self.route(event, ctx);
                }
            }
        }
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("handle", &self.handle)
            .field("template", &self.template)
            .field("running", &self.running)
            .field("team", &self.team.is_some())
            .field("intentions", &self.intentions.len())
            .finish()
    }
}
