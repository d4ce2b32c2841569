use std::collections::HashMap;

use tracing::warn;

use volition_beliefs::{BeliefContext, BeliefQuery};
use volition_core::{AgentHandle, EventQueue, GoalHandle, UniqueId, Value};

use crate::events::{Event, EventBody};

/// The coroutine terminating task label.
pub const TERMINAL_LABEL: i32 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Ready,
    Waiting,
    Yield,
    Done,
    Async,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    None,
    Succeeded,
    Failed,
}

/// Where a task parameter takes its value from.
#[derive(Debug, Clone)]
pub enum ParamSource {
    Literal(Value),
    /// Resolved from the belief context at dispatch, by dotted path.
    FromContext(String),
}

#[derive(Debug, Clone)]
pub struct ParamBinding {
    pub field: String,
    pub source: ParamSource,
}

#[derive(Debug, Clone)]
pub enum TaskKind {
    Action { name: String },
    Pursue { goal: String },
    Drop { goal: GoalHandle },
    Sleep { duration_ms: u64 },
    Print { message: String },
    Cond { query: BeliefQuery },
    YieldUntil { query: BeliefQuery },
}

/// One node in a coroutine's task graph.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: UniqueId,
    pub kind: TaskKind,
    /// Fire-and-forget: the coroutine advances without waiting for this task.
    pub nowait: bool,
    pub params: Vec<ParamBinding>,
    state: TaskState,
    outcome: TaskOutcome,
}

impl Task {
    fn new(kind: TaskKind) -> Self {
        Self {
            id: UniqueId::random(),
            kind,
            nowait: false,
            params: Vec::new(),
            state: TaskState::Ready,
            outcome: TaskOutcome::None,
        }
    }

    fn reset(&mut self) {
        self.state = TaskState::Ready;
        self.outcome = TaskOutcome::None;
    }

    pub fn state(&self) -> TaskState {
        self.state
    }
}

/// A condition-branch record emitted by Cond tasks, forwarded to the bus as a
/// BDI log event by the owning agent.
#[derive(Debug, Clone)]
pub struct BdiLogRecord {
    pub goal: GoalHandle,
    pub intention_id: UniqueId,
    pub plan: String,
    pub task_id: UniqueId,
    pub message: String,
}

/// Everything a task may touch while it executes.
pub struct TaskContext<'a> {
    pub beliefs: &'a mut BeliefContext,
    /// The owning agent's dispatch queue; emitted events land here.
    pub queue: &'a EventQueue<Event>,
    pub agent: &'a AgentHandle,
    pub clock_ms: u64,
    pub goal: &'a GoalHandle,
    pub intention_id: UniqueId,
    pub plan: &'a str,
    pub bdi_log: &'a mut Vec<BdiLogRecord>,
}

/// A labelled task graph with success/fail edges and a cursor.
///
/// Labels are task indices; [`TERMINAL_LABEL`] ends execution. A task's
/// success edge defaults to the next task, its fail edge to the terminal.
/// Fire-and-forget (`nowait`) tasks advance the cursor immediately while an
/// async-outstanding counter tracks their completions; a blocking task acts
/// as a join point and will not start while that counter is non-zero.
#[derive(Debug, Clone)]
pub struct Coroutine {
    tasks: Vec<Task>,
    current: i32,
    succeeded: bool,
    async_outstanding: u32,
    async_failed: bool,
    success_edges: HashMap<i32, i32>,
    fail_edges: HashMap<i32, i32>,
}

impl Default for Coroutine {
    /// An empty, already-terminal body; a plan committed without one
    /// succeeds trivially.
    fn default() -> Self {
        CoroutineBuilder::new().build()
    }
}

impl Coroutine {
    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn current_label(&self) -> i32 {
        self.current
    }

    /// Reset cursor, async counters and per-task state for a fresh run.
    pub fn reset(&mut self) {
        self.current = if self.tasks.is_empty() { TERMINAL_LABEL } else { 0 };
        self.succeeded = true;
        self.async_outstanding = 0;
        self.async_failed = false;
        for task in &mut self.tasks {
            task.reset();
        }
    }

    pub fn finished(&self) -> bool {
        self.current == TERMINAL_LABEL && self.async_outstanding == 0
    }

    pub fn succeeded(&self) -> bool {
        self.succeeded && !self.async_failed
    }

    pub fn waiting(&self) -> bool {
        self.current >= 0
            && matches!(
                self.tasks[self.current as usize].state,
                TaskState::Waiting | TaskState::Yield
            )
    }

    /// True if `id` names the task the cursor is on.
    pub fn is_current_task(&self, id: UniqueId) -> bool {
        self.current >= 0 && self.tasks[self.current as usize].id == id
    }

    /// Advance the coroutine. Runs tasks until one suspends, a blocking task
    /// has to join outstanding async work, or the terminal label is reached.
    /// Returns true once the coroutine has finished.
    pub fn tick(&mut self, ctx: &mut TaskContext) -> bool {
        loop {
            if self.current == TERMINAL_LABEL {
                break;
            }
            let index = self.current as usize;
            match self.tasks[index].state {
                TaskState::Done => {
                    self.advance(index);
                    continue;
                }
                TaskState::Waiting => return self.finished(),
                TaskState::Ready | TaskState::Yield => {}
                // The cursor never rests on an async task; it advances as
                // soon as the task is dispatched.
                TaskState::Async => unreachable!("cursor on async task"),
            }

            // Join point: a blocking task waits for fire-and-forget work.
            if !self.tasks[index].nowait && self.async_outstanding > 0 {
                return self.finished();
            }

            let state = self.execute(index, ctx);
            self.tasks[index].state = state;
            match state {
                TaskState::Done => self.advance(index),
                TaskState::Async => {
                    self.async_outstanding += 1;
                    self.follow(index, true);
                }
                TaskState::Waiting | TaskState::Yield => return self.finished(),
                TaskState::Ready => unreachable!("execute returned ready"),
            }
        }
        self.finished()
    }

    /// Mark a suspended or async task as completed. Returns false when the id
    /// does not match a task awaiting completion.
    pub fn on_task_complete(&mut self, task_id: UniqueId, success: bool) -> bool {
        let Some(task) = self.tasks.iter_mut().find(|t| t.id == task_id) else {
            return false;
        };
        let outcome = if success {
            TaskOutcome::Succeeded
        } else {
            TaskOutcome::Failed
        };
        match task.state {
            TaskState::Waiting => {
                task.state = TaskState::Done;
                task.outcome = outcome;
                true
            }
            TaskState::Async => {
                task.state = TaskState::Done;
                task.outcome = outcome;
                self.mark_async_done(success);
                // Already advanced past it; the completion only drains the
                // counter.
                true
            }
            _ => false,
        }
    }

    pub fn mark_async_done(&mut self, success: bool) {
        self.async_outstanding = self.async_outstanding.saturating_sub(1);
        if !success {
            self.async_failed = true;
        }
    }

    fn execute(&mut self, index: usize, ctx: &mut TaskContext) -> TaskState {
        let nowait = self.tasks[index].nowait;
        let task_id = self.tasks[index].id;
        let suspend = if nowait { TaskState::Async } else { TaskState::Waiting };

        let params = match resolve_params(&self.tasks[index].params, ctx.beliefs) {
            Ok(params) => params,
            Err(missing) => {
                warn!(
                    plan = ctx.plan,
                    task = %task_id,
                    param = %missing,
                    "task parameter did not resolve from the belief context"
                );
                self.tasks[index].outcome = TaskOutcome::Failed;
                return TaskState::Done;
            }
        };

        match &self.tasks[index].kind {
            TaskKind::Action { name } => {
                ctx.queue.enqueue(
                    Event::new(EventBody::Action {
                        action: name.clone(),
                        params,
                        goal: ctx.goal.clone(),
                        intention_id: ctx.intention_id,
                        plan: ctx.plan.to_string(),
                        task_id,
                    })
                    .sent_by(ctx.agent.clone())
                    .to(ctx.agent.clone()),
                );
                suspend
            }
            TaskKind::Pursue { goal } => {
                ctx.queue.enqueue(
                    Event::new(EventBody::Pursue {
                        goal: goal.clone(),
                        parameters: None,
                        params,
                        persistent: false,
                        parent_intention: Some(ctx.intention_id),
                        parent_task: Some(task_id),
                        promise: None,
                    })
                    .sent_by(ctx.agent.clone())
                    .to(ctx.agent.clone()),
                );
                suspend
            }
            TaskKind::Drop { goal } => {
                ctx.queue.enqueue(
                    Event::new(EventBody::Drop {
                        goal: goal.clone(),
                        mode: crate::events::DropMode::Normal,
                    })
                    .sent_by(ctx.agent.clone())
                    .to(ctx.agent.clone()),
                );
                self.tasks[index].outcome = TaskOutcome::Succeeded;
                TaskState::Done
            }
            TaskKind::Sleep { duration_ms } => {
                ctx.queue.enqueue(
                    Event::new(EventBody::Timer {
                        scheduled_at_ms: ctx.clock_ms,
                        duration_ms: *duration_ms,
                        goal: ctx.goal.clone(),
                        intention_id: ctx.intention_id,
                        task_id,
                        plan: ctx.plan.to_string(),
                    })
                    .sent_by(ctx.agent.clone())
                    .to(ctx.agent.clone()),
                );
                suspend
            }
            TaskKind::Print { message } => {
                println!("{message}");
                self.tasks[index].outcome = TaskOutcome::Succeeded;
                TaskState::Done
            }
            TaskKind::Cond { query } => {
                let passed = query.eval(ctx.beliefs);
                ctx.bdi_log.push(BdiLogRecord {
                    goal: ctx.goal.clone(),
                    intention_id: ctx.intention_id,
                    plan: ctx.plan.to_string(),
                    task_id,
                    message: format!("condition {}", if passed { "passed" } else { "failed" }),
                });
                self.tasks[index].outcome = if passed {
                    TaskOutcome::Succeeded
                } else {
                    TaskOutcome::Failed
                };
                TaskState::Done
            }
            TaskKind::YieldUntil { query } => {
                if query.eval(ctx.beliefs) {
                    self.tasks[index].outcome = TaskOutcome::Succeeded;
                    TaskState::Done
                } else {
                    TaskState::Yield
                }
            }
        }
    }

    fn advance(&mut self, index: usize) {
        let success = self.tasks[index].outcome != TaskOutcome::Failed;
        self.follow(index, success);
    }

    fn follow(&mut self, index: usize, success: bool) {
        let label = index as i32;
        let target = if success {
            *self
                .success_edges
                .get(&label)
                .unwrap_or(&default_success_edge(label, self.tasks.len()))
        } else {
            *self.fail_edges.get(&label).unwrap_or(&TERMINAL_LABEL)
        };
        self.current = target;
        if target == TERMINAL_LABEL {
            self.succeeded = success;
        }
    }
}

fn default_success_edge(label: i32, task_count: usize) -> i32 {
    let next = label + 1;
    if (next as usize) < task_count {
        next
    } else {
        TERMINAL_LABEL
    }
}

fn resolve_params(
    bindings: &[ParamBinding],
    beliefs: &BeliefContext,
) -> std::result::Result<Vec<(String, Value)>, String> {
    let mut out = Vec::with_capacity(bindings.len());
    for binding in bindings {
        let value = match &binding.source {
            ParamSource::Literal(value) => value.clone(),
            ParamSource::FromContext(path) => {
                beliefs.fact(path).ok_or_else(|| path.clone())?
            }
        };
        out.push((binding.field.clone(), value));
    }
    Ok(out)
}

/// Chained construction of a coroutine, one task at a time. Edge and
/// parameter calls apply to the most recently added task.
#[derive(Debug, Clone)]
pub struct CoroutineBuilder {
    tasks: Vec<Task>,
    success_edges: HashMap<i32, i32>,
    fail_edges: HashMap<i32, i32>,
    current: i32,
}

impl CoroutineBuilder {
    pub fn new() -> Self {
        Self {
            tasks: Vec::new(),
            success_edges: HashMap::new(),
            fail_edges: HashMap::new(),
            current: TERMINAL_LABEL,
        }
    }

    fn push(mut self, task: Task) -> Self {
        self.tasks.push(task);
        self.current = (self.tasks.len() - 1) as i32;
        self
    }

    pub fn action(self, name: impl Into<String>) -> Self {
        self.push(Task::new(TaskKind::Action { name: name.into() }))
    }

    pub fn pursue(self, goal: impl Into<String>) -> Self {
        self.push(Task::new(TaskKind::Pursue { goal: goal.into() }))
    }

    pub fn drop_goal(self, goal: GoalHandle) -> Self {
        self.push(Task::new(TaskKind::Drop { goal }))
    }

    pub fn sleep(self, duration_ms: u64) -> Self {
        self.push(Task::new(TaskKind::Sleep { duration_ms }))
    }

    pub fn print(self, message: impl Into<String>) -> Self {
        self.push(Task::new(TaskKind::Print {
            message: message.into(),
        }))
    }

    pub fn cond(self, query: BeliefQuery) -> Self {
        self.push(Task::new(TaskKind::Cond { query }))
    }

    pub fn cond_fn(
        self,
        func: impl Fn(&BeliefContext) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.cond(BeliefQuery::from_fn(func))
    }

    pub fn yield_until(self, query: BeliefQuery) -> Self {
        self.push(Task::new(TaskKind::YieldUntil { query }))
    }

    pub fn yield_until_fn(
        self,
        func: impl Fn(&BeliefContext) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.yield_until(BeliefQuery::from_fn(func))
    }

    /// Mark the most recently added task as fire-and-forget.
    pub fn nowait(mut self) -> Self {
        if let Some(task) = self.tasks.last_mut() {
            task.nowait = true;
        }
        self
    }

    /// Bind a literal parameter on the most recently added task.
    pub fn param(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        if let Some(task) = self.tasks.last_mut() {
            task.params.push(ParamBinding {
                field: field.into(),
                source: ParamSource::Literal(value.into()),
            });
        }
        self
    }

    /// Bind a parameter resolved from the belief context at dispatch.
    pub fn param_from(mut self, field: impl Into<String>, path: impl Into<String>) -> Self {
        if let Some(task) = self.tasks.last_mut() {
            task.params.push(ParamBinding {
                field: field.into(),
                source: ParamSource::FromContext(path.into()),
            });
        }
        self
    }

    /// The label of the most recently added task.
    pub fn label(&self) -> i32 {
        self.current
    }

    /// Point edge calls at an earlier task.
    pub fn configure(mut self, label: i32) -> Self {
        self.current = label.max(0).min(self.tasks.len() as i32 - 1);
        self
    }

    pub fn on_success(mut self, target: i32) -> Self {
        self.success_edges.insert(self.current, target);
        self
    }

    pub fn on_fail(mut self, target: i32) -> Self {
        self.fail_edges.insert(self.current, target);
        self
    }

    pub fn build(self) -> Coroutine {
        let count = self.tasks.len() as i32;
        let clamp = |edges: HashMap<i32, i32>| {
            edges
                .into_iter()
                .map(|(from, to)| {
                    if to >= count {
                        warn!(from, to, "edge target out of range, clamping to terminal");
                        (from, TERMINAL_LABEL)
                    } else {
                        (from, to.max(TERMINAL_LABEL))
                    }
                })
                .collect()
        };
        let mut coroutine = Coroutine {
            tasks: self.tasks,
            current: TERMINAL_LABEL,
            succeeded: true,
            async_outstanding: 0,
            async_failed: false,
            success_edges: clamp(self.success_edges),
            fail_edges: clamp(self.fail_edges),
        };
        coroutine.reset();
        coroutine
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn harness() -> (BeliefContext, EventQueue<Event>, AgentHandle, GoalHandle) {
        (
            BeliefContext::new(),
            EventQueue::new(),
            AgentHandle::new("a", UniqueId::random()),
            GoalHandle::new("g", UniqueId::random()),
        )
    }

    fn tick(
        coroutine: &mut Coroutine,
        beliefs: &mut BeliefContext,
        queue: &EventQueue<Event>,
        agent: &AgentHandle,
        goal: &GoalHandle,
    ) -> bool {
        let mut log = Vec::new();
        let mut ctx = TaskContext {
            beliefs,
            queue,
            agent,
            clock_ms: 0,
            goal,
            intention_id: UniqueId::random(),
            plan: "p",
            bdi_log: &mut log,
        };
        coroutine.tick(&mut ctx)
    }

    #[test]
    fn test_empty_body_finishes_successfully() {
        let (mut beliefs, queue, agent, goal) = harness();
        let mut coroutine = CoroutineBuilder::new().build();
        assert!(tick(&mut coroutine, &mut beliefs, &queue, &agent, &goal));
        assert!(coroutine.succeeded());
    }

    #[test]
    fn test_print_chain_runs_in_one_tick() {
        let (mut beliefs, queue, agent, goal) = harness();
        let mut coroutine = CoroutineBuilder::new().print("a").print("b").build();
        assert!(tick(&mut coroutine, &mut beliefs, &queue, &agent, &goal));
        assert!(coroutine.succeeded());
    }

    #[test]
    fn test_cond_fail_edge_defaults_to_terminal_failure() {
        let (mut beliefs, queue, agent, goal) = harness();
        let mut coroutine = CoroutineBuilder::new()
            .cond_fn(|_| false)
            .print("unreachable")
            .build();
        assert!(tick(&mut coroutine, &mut beliefs, &queue, &agent, &goal));
        assert!(!coroutine.succeeded());
    }

    #[test]
    fn test_cond_fail_edge_can_recover() {
        let (mut beliefs, queue, agent, goal) = harness();
        // cond fails -> jump to the recovery print -> success.
        let mut coroutine = CoroutineBuilder::new()
            .cond_fn(|_| false)
            .on_fail(1)
            .print("recover")
            .build();
        assert!(tick(&mut coroutine, &mut beliefs, &queue, &agent, &goal));
        assert!(coroutine.succeeded());
    }

    #[test]
    fn test_action_suspends_until_completion() {
        let (mut beliefs, queue, agent, goal) = harness();
        let mut coroutine = CoroutineBuilder::new().action("A1").build();
        assert!(!tick(&mut coroutine, &mut beliefs, &queue, &agent, &goal));
        assert!(coroutine.waiting());
        assert_eq!(queue.len(), 1);

        let task_id = coroutine.tasks()[0].id;
        assert!(coroutine.on_task_complete(task_id, true));
        assert!(tick(&mut coroutine, &mut beliefs, &queue, &agent, &goal));
        assert!(coroutine.succeeded());
    }

    #[test]
    fn test_nowait_tasks_dispatch_together_and_join_at_blocking_task() {
        let (mut beliefs, queue, agent, goal) = harness();
        let mut coroutine = CoroutineBuilder::new()
            .action("A1")
            .nowait()
            .action("A2")
            .nowait()
            .print("done")
            .build();

        // Both actions dispatch in one tick; the print joins.
        assert!(!tick(&mut coroutine, &mut beliefs, &queue, &agent, &goal));
        assert_eq!(queue.len(), 2);

        let a1 = coroutine.tasks()[0].id;
        let a2 = coroutine.tasks()[1].id;
        assert!(coroutine.on_task_complete(a2, true));
        assert!(!tick(&mut coroutine, &mut beliefs, &queue, &agent, &goal));
        assert!(coroutine.on_task_complete(a1, true));
        assert!(tick(&mut coroutine, &mut beliefs, &queue, &agent, &goal));
        assert!(coroutine.succeeded());
    }

    #[test]
    fn test_async_failure_fails_the_coroutine() {
        let (mut beliefs, queue, agent, goal) = harness();
        let mut coroutine = CoroutineBuilder::new().action("A1").nowait().build();
        assert!(!tick(&mut coroutine, &mut beliefs, &queue, &agent, &goal));
        let a1 = coroutine.tasks()[0].id;
        coroutine.on_task_complete(a1, false);
        assert!(tick(&mut coroutine, &mut beliefs, &queue, &agent, &goal));
        assert!(!coroutine.succeeded());
    }

    #[test]
    fn test_yield_until_reevaluates_each_tick() {
        let (mut beliefs, queue, agent, goal) = harness();
        let mut coroutine = CoroutineBuilder::new()
            .yield_until(BeliefQuery::parse("flags.ready == true").unwrap())
            .build();
        assert!(!tick(&mut coroutine, &mut beliefs, &queue, &agent, &goal));
        assert!(!tick(&mut coroutine, &mut beliefs, &queue, &agent, &goal));
        beliefs.set_message(volition_core::Message::new("flags").with("ready", true));
        assert!(tick(&mut coroutine, &mut beliefs, &queue, &agent, &goal));
        assert!(coroutine.succeeded());
    }

    #[test]
    fn test_missing_context_param_fails_the_task() {
        let (mut beliefs, queue, agent, goal) = harness();
        let mut coroutine = CoroutineBuilder::new()
            .action("A1")
            .param_from("x", "nosuch.path")
            .build();
        assert!(tick(&mut coroutine, &mut beliefs, &queue, &agent, &goal));
        assert!(!coroutine.succeeded());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_reset_clears_state() {
        let (mut beliefs, queue, agent, goal) = harness();
        let mut coroutine = CoroutineBuilder::new().cond_fn(|_| true).build();
        assert!(tick(&mut coroutine, &mut beliefs, &queue, &agent, &goal));
        coroutine.reset();
        assert!(!coroutine.finished());
        assert!(tick(&mut coroutine, &mut beliefs, &queue, &agent, &goal));
    }
}
