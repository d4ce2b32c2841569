use std::fmt;
use std::sync::Arc;

use volition_beliefs::{BeliefContext, BeliefQuery, ParseError};

use crate::coroutine::{Coroutine, CoroutineBuilder};

pub type Effects = Arc<dyn Fn(&mut BeliefContext) + Send + Sync>;

/// A plan template: a coroutine body bound to the goal it handles, with
/// selection constraints and declared resource locks. The engine registers
/// templates; each intention executes its own clone.
#[derive(Clone, Default)]
pub struct Plan {
    pub name: String,
    pub goal: String,
    pub body: Coroutine,
    pub drop_coroutine: Option<Coroutine>,
    pub precondition: Option<BeliefQuery>,
    pub drop_when: Option<BeliefQuery>,
    pub effects: Option<Effects>,
    /// Sorted at commit so locks are always acquired in a deterministic
    /// order.
    pub resource_locks: Vec<String>,
}

impl Plan {
    /// No precondition means the plan is always applicable.
    pub fn applicable(&self, ctx: &BeliefContext) -> bool {
        self.precondition.as_ref().map(|q| q.eval(ctx)).unwrap_or(true)
    }

    pub fn should_drop(&self, ctx: &BeliefContext) -> bool {
        self.drop_when.as_ref().map(|q| q.eval(ctx)).unwrap_or(false)
    }

    /// Applied exactly once when the body succeeds, before locks release.
    pub fn apply_effects(&self, ctx: &mut BeliefContext) {
        if let Some(effects) = &self.effects {
            effects(ctx);
        }
    }

    /// Fresh clone for a new intention, with coroutines reset.
    pub fn instantiate(&self) -> Plan {
        let mut plan = self.clone();
        plan.body.reset();
        if let Some(drop) = &mut plan.drop_coroutine {
            drop.reset();
        }
        plan
    }
}

impl fmt::Debug for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Plan")
            .field("name", &self.name)
            .field("goal", &self.goal)
            .field("tasks", &self.body.tasks().len())
            .field("resource_locks", &self.resource_locks)
            .finish()
    }
}

#[derive(Clone, Default)]
pub struct PlanBuilder {
    plan: Plan,
}

impl PlanBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            plan: Plan {
                name: name.into(),
                ..Plan::default()
            },
        }
    }

    /// Name the goal this plan handles.
    pub fn handles(mut self, goal: impl Into<String>) -> Self {
        self.plan.goal = goal.into();
        self
    }

    pub fn pre(mut self, func: impl Fn(&BeliefContext) -> bool + Send + Sync + 'static) -> Self {
        self.plan.precondition = Some(BeliefQuery::from_fn(func));
        self
    }

    pub fn pre_expr(mut self, query: &str) -> Result<Self, ParseError> {
        self.plan.precondition = Some(BeliefQuery::parse(query)?);
        Ok(self)
    }

    pub fn drop_when(
        mut self,
        func: impl Fn(&BeliefContext) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.plan.drop_when = Some(BeliefQuery::from_fn(func));
        self
    }

    pub fn drop_when_expr(mut self, query: &str) -> Result<Self, ParseError> {
        self.plan.drop_when = Some(BeliefQuery::parse(query)?);
        Ok(self)
    }

    pub fn body(mut self, body: CoroutineBuilder) -> Self {
        self.plan.body = body.build();
        self
    }

    /// Coroutine run when the intention is dropped mid-execution.
    pub fn on_drop(mut self, body: CoroutineBuilder) -> Self {
        self.plan.drop_coroutine = Some(body.build());
        self
    }

    pub fn effects(mut self, func: impl Fn(&mut BeliefContext) + Send + Sync + 'static) -> Self {
        self.plan.effects = Some(Arc::new(func));
        self
    }

    pub fn locks<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.plan
            .resource_locks
            .extend(names.into_iter().map(Into::into));
        self
    }

    pub fn build(mut self) -> Plan {
        self.plan.resource_locks.sort();
        self.plan.resource_locks.dedup();
        self.plan
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locks_sorted_and_deduped() {
        let plan = PlanBuilder::new("P")
            .handles("G")
            .locks(["winch", "battery", "winch"])
            .build();
        assert_eq!(plan.resource_locks, ["battery", "winch"]);
    }

    #[test]
    fn test_applicable_defaults_true() {
        let plan = PlanBuilder::new("P").handles("G").build();
        assert!(plan.applicable(&BeliefContext::new()));
    }

    #[test]
    fn test_instantiate_resets_body() {
        let template = PlanBuilder::new("P")
            .handles("G")
            .body(CoroutineBuilder::new().print("hi"))
            .build();
        let clone = template.instantiate();
        assert!(!clone.body.finished());
        assert_eq!(clone.body.tasks().len(), 1);
    }

    #[test]
    fn test_effects_apply() {
        let plan = PlanBuilder::new("P")
            .handles("G")
            .effects(|ctx| {
                ctx.set_message(volition_core::Message::new("done").with("flag", true));
            })
            .build();
        let mut ctx = BeliefContext::new();
        plan.apply_effects(&mut ctx);
        assert_eq!(ctx.get("done", "flag").and_then(|v| v.as_bool()), Some(true));
    }
}
