use std::fmt;
use std::sync::Arc;

use volition_beliefs::{BeliefContext, BeliefQuery, ParseError};
use volition_core::{GoalHandle, Message, UniqueId};

pub type Heuristic = Arc<dyn Fn(&BeliefContext) -> f64 + Send + Sync>;

/// A goal template: a named objective with a satisfaction predicate, an
/// optional precondition and drop condition, and a scoring heuristic used by
/// best-plan selection and auction bids.
#[derive(Clone, Default)]
pub struct Goal {
    pub name: String,
    pub message_schema: Option<String>,
    pub precondition: Option<BeliefQuery>,
    pub satisfied: Option<BeliefQuery>,
    pub drop_when: Option<BeliefQuery>,
    pub priority: i32,
    pub heuristic: Option<Heuristic>,
}

impl Goal {
    /// No precondition means the goal is always valid to pursue.
    pub fn precondition_holds(&self, ctx: &BeliefContext) -> bool {
        self.precondition.as_ref().map(|q| q.eval(ctx)).unwrap_or(true)
    }

    /// No satisfaction query means the goal is never satisfied by beliefs
    /// alone.
    pub fn is_satisfied(&self, ctx: &BeliefContext) -> bool {
        self.satisfied.as_ref().map(|q| q.eval(ctx)).unwrap_or(false)
    }

    pub fn should_drop(&self, ctx: &BeliefContext) -> bool {
        self.drop_when.as_ref().map(|q| q.eval(ctx)).unwrap_or(false)
    }

    pub fn score(&self, ctx: &BeliefContext) -> f64 {
        self.heuristic.as_ref().map(|h| h(ctx)).unwrap_or(0.0)
    }
}

impl fmt::Debug for Goal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Goal")
            .field("name", &self.name)
            .field("message_schema", &self.message_schema)
            .field("priority", &self.priority)
            .field("has_heuristic", &self.heuristic.is_some())
            .finish()
    }
}

#[derive(Clone, Default)]
pub struct GoalBuilder {
    goal: Goal,
}

impl GoalBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            goal: Goal {
                name: name.into(),
                ..Goal::default()
            },
        }
    }

    /// Require pursue parameters to validate against the named schema.
    pub fn message(mut self, schema: impl Into<String>) -> Self {
        self.goal.message_schema = Some(schema.into());
        self
    }

    pub fn pre(mut self, func: impl Fn(&BeliefContext) -> bool + Send + Sync + 'static) -> Self {
        self.goal.precondition = Some(BeliefQuery::from_fn(func));
        self
    }

    pub fn pre_expr(mut self, query: &str) -> Result<Self, ParseError> {
        self.goal.precondition = Some(BeliefQuery::parse(query)?);
        Ok(self)
    }

    pub fn satisfied(
        mut self,
        func: impl Fn(&BeliefContext) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.goal.satisfied = Some(BeliefQuery::from_fn(func));
        self
    }

    pub fn satisfied_expr(mut self, query: &str) -> Result<Self, ParseError> {
        self.goal.satisfied = Some(BeliefQuery::parse(query)?);
        Ok(self)
    }

    pub fn drop_when(
        mut self,
        func: impl Fn(&BeliefContext) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.goal.drop_when = Some(BeliefQuery::from_fn(func));
        self
    }

    pub fn drop_when_expr(mut self, query: &str) -> Result<Self, ParseError> {
        self.goal.drop_when = Some(BeliefQuery::parse(query)?);
        Ok(self)
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.goal.priority = priority;
        self
    }

    pub fn heuristic(
        mut self,
        func: impl Fn(&BeliefContext) -> f64 + Send + Sync + 'static,
    ) -> Self {
        self.goal.heuristic = Some(Arc::new(func));
        self
    }

    pub fn build(self) -> Goal {
        self.goal
    }
}

/// Per-plan attempt record inside one goal instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanHistory {
    pub plan: String,
    pub success_count: u32,
    pub fail_count: u32,
    /// The pass in which the plan was last attempted; `None` if never.
    pub last_loop_iteration: Option<u32>,
}

/// Plan-selection state carried by a goal instance across attempts.
#[derive(Debug, Clone, Default)]
pub struct PlanSelection {
    pub loop_iteration: u32,
    pub plan_index: usize,
    pub history: Vec<PlanHistory>,
}

impl PlanSelection {
    pub fn find_history(&self, plan: &str) -> Option<&PlanHistory> {
        self.history.iter().find(|h| h.plan == plan)
    }

    pub fn find_or_make_history(&mut self, plan: &str) -> &mut PlanHistory {
        if let Some(index) = self.history.iter().position(|h| h.plan == plan) {
            return &mut self.history[index];
        }
        self.history.push(PlanHistory {
            plan: plan.to_string(),
            success_count: 0,
            fail_count: 0,
            last_loop_iteration: None,
        });
        self.history.last_mut().unwrap()
    }

    pub fn tried_this_pass(&self, plan: &str) -> bool {
        self.find_history(plan)
            .map(|h| h.last_loop_iteration == Some(self.loop_iteration))
            .unwrap_or(false)
    }

    pub fn reset(&mut self) {
        *self = PlanSelection::default();
    }
}

/// A goal being pursued: the template plus the pursue parameters and the
/// selection history. Created on pursue, destroyed when the goal finishes.
#[derive(Debug, Clone)]
pub struct GoalInstance {
    pub handle: GoalHandle,
    pub template: Goal,
    pub message: Option<Message>,
    pub persistent: bool,
    pub selection: PlanSelection,
}

impl GoalInstance {
    pub fn new(template: Goal, message: Option<Message>, persistent: bool) -> Self {
        let handle = GoalHandle::new(template.name.clone(), UniqueId::random());
        Self {
            handle,
            template,
            message,
            persistent,
            selection: PlanSelection::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_queries() {
        let goal = GoalBuilder::new("G").build();
        let ctx = BeliefContext::new();
        assert!(goal.precondition_holds(&ctx));
        assert!(!goal.is_satisfied(&ctx));
        assert!(!goal.should_drop(&ctx));
        assert_eq!(goal.score(&ctx), 0.0);
    }

    #[test]
    fn test_history_tracks_passes() {
        let mut selection = PlanSelection::default();
        {
            let entry = selection.find_or_make_history("P1");
            entry.fail_count += 1;
            entry.last_loop_iteration = Some(0);
        }
        assert!(selection.tried_this_pass("P1"));
        assert!(!selection.tried_this_pass("P2"));
        selection.loop_iteration = 1;
        assert!(!selection.tried_this_pass("P1"));
        assert_eq!(selection.find_history("P1").unwrap().fail_count, 1);
    }

    #[test]
    fn test_instance_handles_are_unique() {
        let goal = GoalBuilder::new("G").build();
        let a = GoalInstance::new(goal.clone(), None, false);
        let b = GoalInstance::new(goal, None, false);
        assert_eq!(a.handle.name, b.handle.name);
        assert_ne!(a.handle.id, b.handle.id);
    }
}
