use std::collections::HashMap;

use tracing::{debug, trace};

use volition_beliefs::BeliefContext;
use volition_core::{AgentHandle, EventQueue, Promise, UniqueId};

use crate::coroutine::{BdiLogRecord, TaskContext};
use crate::events::{DropMode, Event};
use crate::goal::GoalInstance;
use crate::plan::Plan;
use crate::registry::ModelRegistry;
use crate::tactic::{PlanOrder, LOOP_FOREVER};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishState {
    Success,
    Failed,
    Dropped,
}

/// Executor state for one active desire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecState {
    /// Looking for an applicable plan whose locks can be acquired.
    Selecting,
    /// Ticking the selected plan body.
    Executing,
    /// Running the plan's drop coroutine after a normal drop request.
    Dropping,
    /// A team waiting for auction bids on this desire.
    Auctioning { schedule_id: u64 },
    /// A team mirroring a delegated goal executing on the winning member.
    Delegated { winner: AgentHandle },
    Finished(FinishState),
}

/// Where a delegated intention reports its outcome.
#[derive(Debug, Clone)]
pub struct DelegationOrigin {
    pub team: AgentHandle,
    /// The delegating team's goal instance, echoed back on completion.
    pub goal: volition_core::GoalHandle,
    pub schedule_id: u64,
}

/// Everything an intention may touch while it ticks: the owning agent's
/// beliefs and queue, plus the engine's registries.
pub(crate) struct IntentionCtx<'a> {
    pub beliefs: &'a mut BeliefContext,
    pub queue: &'a EventQueue<Event>,
    pub agent: &'a AgentHandle,
    pub clock_ms: u64,
    pub registry: &'a ModelRegistry,
    /// Agent-local tactic assignment, goal name to tactic name.
    pub tactics: &'a HashMap<String, String>,
    /// Plans this agent owns.
    pub agent_plans: &'a [String],
    /// The agent owns every committed plan (regular agents with no explicit
    /// plan list; never true for teams).
    pub any_plan: bool,
    pub bdi_log: &'a mut Vec<BdiLogRecord>,
}

/// Per-active-desire state machine: select a plan, tick its body, apply
/// effects, release locks, retry or finish.
#[derive(Debug)]
pub struct IntentionExecutor {
    pub id: UniqueId,
    pub goal: GoalInstance,
    plan: Option<Plan>,
    state: ExecState,
    /// Resolved when the intention finishes; held strongly so sub-goal and
    /// bus-originated pursues settle even if the caller dropped theirs.
    pub promise: Option<Promise>,
    /// Parent intention and task for a sub-goal pursue.
    pub parent: Option<(UniqueId, UniqueId)>,
    /// Set when this intention executes a goal delegated by a team.
    pub delegated_from: Option<DelegationOrigin>,
    drop_requested: Option<(DropMode, String)>,
    locked: Vec<String>,
    /// Position of the executing plan within the effective plan list.
    current_index: usize,
    finish_reason: Option<String>,
}

impl IntentionExecutor {
    pub fn new(goal: GoalInstance, promise: Option<Promise>) -> Self {
        Self {
            id: UniqueId::random(),
            goal,
            plan: None,
            state: ExecState::Selecting,
            promise,
            parent: None,
            delegated_from: None,
            drop_requested: None,
            locked: Vec::new(),
            current_index: 0,
            finish_reason: None,
        }
    }

    pub fn state(&self) -> &ExecState {
        &self.state
    }

    pub fn set_state(&mut self, state: ExecState) {
        self.state = state;
    }

    pub fn finished(&self) -> Option<FinishState> {
        match self.state {
            ExecState::Finished(state) => Some(state),
            _ => None,
        }
    }

    pub fn finish_reason(&self) -> Option<&str> {
        self.finish_reason.as_deref()
    }

    pub fn current_plan(&self) -> Option<&str> {
        self.plan.as_ref().map(|p| p.name.as_str())
    }

    /// Ask this intention to stop. Normal drops run the drop coroutine of an
    /// executing plan; forced drops skip it.
    pub fn request_drop(&mut self, mode: DropMode, reason: impl Into<String>) {
        if self.finished().is_none() && self.drop_requested.is_none() {
            self.drop_requested = Some((mode, reason.into()));
        }
    }

    pub fn drop_requested(&self) -> bool {
        self.drop_requested.is_some()
    }

    /// Route a completion (action, timer, sub-goal) to the running coroutine.
    pub fn on_task_complete(&mut self, task_id: UniqueId, success: bool) -> bool {
        let Some(plan) = self.plan.as_mut() else {
            return false;
        };
        let coroutine = match self.state {
            ExecState::Dropping => plan.drop_coroutine.as_mut(),
            _ => Some(&mut plan.body),
        };
        coroutine
            .map(|c| c.on_task_complete(task_id, success))
            .unwrap_or(false)
    }

    /// Advance one step. Returns true when observable state changed, which
    /// feeds the engine's quiescence detection.
    pub(crate) fn tick(&mut self, ctx: &mut IntentionCtx) -> bool {
        let before = self.progress_key();
        ctx.beliefs.set_goal_message(self.goal.message.clone());
        match self.state {
            ExecState::Selecting => self.tick_selecting(ctx),
            ExecState::Executing => self.tick_executing(ctx),
            ExecState::Dropping => self.tick_dropping(ctx),
            // Auction and delegation steps are driven by the owning team.
            ExecState::Auctioning { .. } | ExecState::Delegated { .. } => {
                if let Some((_, reason)) = self.drop_requested.take() {
                    self.finish(FinishState::Dropped, reason);
                }
            }
            ExecState::Finished(_) => {}
        }
        ctx.beliefs.set_goal_message(None);
        before != self.progress_key()
    }

    fn progress_key(&self) -> (u8, i32, usize, u32, usize) {
        let tag = match self.state {
            ExecState::Selecting => 0,
            ExecState::Executing => 1,
            ExecState::Dropping => 2,
            ExecState::Auctioning { .. } => 3,
            ExecState::Delegated { .. } => 4,
            ExecState::Finished(_) => 5,
        };
        let cursor = self
            .plan
            .as_ref()
            .map(|p| p.body.current_label())
            .unwrap_or(i32::MIN);
        (
            tag,
            cursor,
            self.locked.len(),
            self.goal.selection.loop_iteration,
            self.goal.selection.plan_index,
        )
    }

    fn tick_selecting(&mut self, ctx: &mut IntentionCtx) {
        if let Some((_, reason)) = self.drop_requested.take() {
            self.finish(FinishState::Dropped, reason);
            return;
        }
        if self.goal.template.is_satisfied(ctx.beliefs) {
            if !self.goal.persistent {
                self.finish(FinishState::Success, String::new());
            }
            return;
        }
        if self.goal.template.should_drop(ctx.beliefs) {
            self.finish(FinishState::Dropped, "goal drop condition fired".to_string());
            return;
        }

        let (list, order, loops) = self.effective_plan_list(ctx);
        if list.is_empty() {
            if !self.goal.persistent {
                self.finish(
                    FinishState::Failed,
                    format!("no plans handle goal '{}'", self.goal.handle.name),
                );
            }
            return;
        }

        if let Some((index, plan)) = self.select_candidate(&list, order, ctx) {
            debug!(
                goal = %self.goal.handle,
                plan = %plan.name,
                "plan selected"
            );
            self.acquire_locks(&plan, ctx.beliefs);
            self.current_index = index;
            self.goal.selection.plan_index = index;
            self.plan = Some(plan);
            self.state = ExecState::Executing;
            // Start the body in the same tick the plan was selected.
            self.tick_executing(ctx);
            return;
        }

        // No candidate this tick. A completed pass over the list consumes one
        // loop allowance; preconditions that never held do not count.
        let selection = &mut self.goal.selection;
        let all_tried = list.iter().all(|p| selection.tried_this_pass(p));
        let strict_exhausted =
            order == PlanOrder::Strict && selection.plan_index >= list.len();
        if all_tried || strict_exhausted {
            selection.loop_iteration += 1;
            selection.plan_index = 0;
            if loops != LOOP_FOREVER && selection.loop_iteration >= loops {
                if self.goal.persistent {
                    self.goal.selection.reset();
                } else {
                    self.finish(
                        FinishState::Failed,
                        format!("plans exhausted for goal '{}'", self.goal.handle.name),
                    );
                }
            }
        }
    }

    fn effective_plan_list(&self, ctx: &IntentionCtx) -> (Vec<String>, PlanOrder, u32) {
        let tactic = ctx
            .tactics
            .get(&self.goal.handle.name)
            .and_then(|name| ctx.registry.tactic(name));
        let (list, order, loops) = match tactic {
            Some(tactic) => {
                let list = if tactic.use_plan_list && !tactic.plans.is_empty() {
                    tactic.plans.clone()
                } else {
                    ctx.registry.plans_for_goal(&self.goal.handle.name)
                };
                (list, tactic.plan_order, tactic.loop_plans_count)
            }
            None => (
                ctx.registry.plans_for_goal(&self.goal.handle.name),
                PlanOrder::ExcludePlanAfterAttempt,
                1,
            ),
        };
        let list = list
            .into_iter()
            .filter(|p| ctx.any_plan || ctx.agent_plans.iter().any(|a| a == p))
            .collect();
        (list, order, loops)
    }

    fn select_candidate(
        &self,
        list: &[String],
        order: PlanOrder,
        ctx: &mut IntentionCtx,
    ) -> Option<(usize, Plan)> {
        let selection = &self.goal.selection;
        match order {
            PlanOrder::Strict => (selection.plan_index..list.len())
                .find_map(|i| self.viable(&list[i], ctx).map(|plan| (i, plan.instantiate()))),
            PlanOrder::ExcludePlanAfterAttempt => (0..list.len()).find_map(|offset| {
                let i = (selection.plan_index + offset) % list.len();
                if selection.tried_this_pass(&list[i]) {
                    return None;
                }
                self.viable(&list[i], ctx).map(|plan| (i, plan.instantiate()))
            }),
            PlanOrder::ChooseBestPlan => {
                let mut best: Option<(usize, f64)> = None;
                for (i, name) in list.iter().enumerate() {
                    if selection.tried_this_pass(name) {
                        continue;
                    }
                    let Some(plan) = self.viable(name, ctx) else {
                        continue;
                    };
                    // Score the goal heuristic in the plan's tentative
                    // post-state.
                    let mut post = ctx.beliefs.clone();
                    plan.apply_effects(&mut post);
                    let score = self.goal.template.score(&post);
                    if best.map(|(_, s)| score < s).unwrap_or(true) {
                        best = Some((i, score));
                    }
                }
                best.map(|(i, _)| (i, ctx.registry.plan(&list[i]).unwrap().instantiate()))
            }
        }
    }

    /// A plan is a candidate when it exists, its precondition holds, and all
    /// of its declared locks can be acquired right now.
    fn viable<'r>(&self, name: &str, ctx: &IntentionCtx<'r>) -> Option<&'r Plan> {
        let plan = ctx.registry.plan(name)?;
        if !plan.applicable(ctx.beliefs) {
            return None;
        }
        if !self.locks_available(plan, ctx.beliefs) {
            return None;
        }
        Some(plan)
    }

    fn locks_available(&self, plan: &Plan, beliefs: &BeliefContext) -> bool {
        plan.resource_locks
            .iter()
            .all(|name| beliefs.resource(name).map(|r| r.available()).unwrap_or(false))
    }

    /// Locks acquire in sorted (declaration) order; availability was checked
    /// during selection, so on the single engine thread this cannot fail.
    fn acquire_locks(&mut self, plan: &Plan, beliefs: &mut BeliefContext) {
        for name in &plan.resource_locks {
            if let Some(resource) = beliefs.resource_mut(name) {
                resource.try_lock();
                self.locked.push(name.clone());
            }
        }
    }

    /// Release in reverse acquisition order.
    fn release_locks(&mut self, beliefs: &mut BeliefContext) {
        while let Some(name) = self.locked.pop() {
            if let Some(resource) = beliefs.resource_mut(name.as_str()) {
                resource.unlock();
            }
        }
    }

    fn tick_executing(&mut self, ctx: &mut IntentionCtx) {
        if self.drop_requested.is_some() {
            let has_drop_body = self
                .plan
                .as_ref()
                .map(|p| p.drop_coroutine.is_some())
                .unwrap_or(false);
            let (mode, reason) = self.drop_requested.clone().unwrap();
            if mode == DropMode::Normal && has_drop_body {
                if let Some(plan) = self.plan.as_mut() {
                    if let Some(drop) = plan.drop_coroutine.as_mut() {
                        drop.reset();
                    }
                }
                self.state = ExecState::Dropping;
                self.tick_dropping(ctx);
            } else {
                self.drop_requested = None;
                self.release_locks(ctx.beliefs);
                ctx.beliefs.flush_action_replies();
                self.finish(FinishState::Dropped, reason);
            }
            return;
        }

        let plan_drop = self
            .plan
            .as_ref()
            .map(|p| p.should_drop(ctx.beliefs))
            .unwrap_or(false);
        if plan_drop {
            trace!(goal = %self.goal.handle, "plan drop condition fired, reselecting");
            self.fail_current_plan(ctx);
            return;
        }

        let finished = {
            let plan = self.plan.as_mut().expect("executing without a plan");
            let mut task_ctx = TaskContext {
                beliefs: &mut *ctx.beliefs,
                queue: ctx.queue,
                agent: ctx.agent,
                clock_ms: ctx.clock_ms,
                goal: &self.goal.handle,
                intention_id: self.id,
                plan: &plan.name,
                bdi_log: &mut *ctx.bdi_log,
            };
            if plan.body.tick(&mut task_ctx) {
                Some(plan.body.succeeded())
            } else {
                None
            }
        };

        match finished {
            None => {}
            Some(true) => {
                let plan = self.plan.take().expect("executing without a plan");
                plan.apply_effects(ctx.beliefs);
                ctx.beliefs.flush_action_replies();
                {
                    let entry = self
                        .goal
                        .selection
                        .find_or_make_history(&plan.name);
                    entry.success_count += 1;
                }
                self.release_locks(ctx.beliefs);
                if self.goal.persistent {
                    self.goal.selection.reset();
                    self.state = ExecState::Selecting;
                } else {
                    self.finish(FinishState::Success, String::new());
                }
            }
            Some(false) => self.fail_current_plan(ctx),
        }
    }

    /// Record a failed attempt and go back to plan selection.
    fn fail_current_plan(&mut self, ctx: &mut IntentionCtx) {
        let Some(plan) = self.plan.take() else { return };
        self.release_locks(ctx.beliefs);
        ctx.beliefs.discard_action_replies();
        let loop_iteration = self.goal.selection.loop_iteration;
        let entry = self.goal.selection.find_or_make_history(&plan.name);
        entry.fail_count += 1;
        entry.last_loop_iteration = Some(loop_iteration);
        self.goal.selection.plan_index = self.current_index + 1;
        self.state = ExecState::Selecting;
    }

    fn tick_dropping(&mut self, ctx: &mut IntentionCtx) {
        let finished = {
            let Some(plan) = self.plan.as_mut() else {
                self.finish(FinishState::Dropped, "dropped".to_string());
                return;
            };
            match plan.drop_coroutine.as_mut() {
                None => true,
                Some(drop) => {
                    let mut task_ctx = TaskContext {
                        beliefs: &mut *ctx.beliefs,
                        queue: ctx.queue,
                        agent: ctx.agent,
                        clock_ms: ctx.clock_ms,
                        goal: &self.goal.handle,
                        intention_id: self.id,
                        plan: &plan.name,
                        bdi_log: &mut *ctx.bdi_log,
                    };
                    drop.tick(&mut task_ctx)
                }
            }
        };
        if finished {
            let reason = self
                .drop_requested
                .take()
                .map(|(_, reason)| reason)
                .unwrap_or_else(|| "dropped".to_string());
            self.release_locks(ctx.beliefs);
            ctx.beliefs.flush_action_replies();
            self.finish(FinishState::Dropped, reason);
        }
    }

    /// Terminal transition; settles the pursue promise.
    pub fn finish(&mut self, state: FinishState, reason: String) {
        if self.finished().is_some() {
            return;
        }
        let reason = match state {
            FinishState::Dropped if reason.is_empty() => "dropped".to_string(),
            FinishState::Dropped if !reason.contains("drop") => format!("dropped: {reason}"),
            _ => reason,
        };
        debug!(goal = %self.goal.handle, ?state, reason = %reason, "intention finished");
        if let Some(promise) = &self.promise {
            match state {
                FinishState::Success => promise.hook().resolve(),
                _ => promise.hook().fail(Some(reason.clone())),
            }
        }
        self.finish_reason = (!reason.is_empty()).then_some(reason);
        self.state = ExecState::Finished(state);
    }
}
