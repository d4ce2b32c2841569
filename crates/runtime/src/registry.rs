use std::collections::HashMap;
use std::fmt;

use volition_core::Schema;

use crate::error::{Result, RuntimeError};
use crate::goal::Goal;
use crate::plan::Plan;
use crate::role::Role;
use crate::service::{ActionDef, ActionHandler, ServiceTemplate};
use crate::tactic::Tactic;

/// Template for a resource: the bounds instantiated into each owning agent.
#[derive(Debug, Clone)]
pub struct ResourceTemplate {
    pub name: String,
    pub min: i64,
    pub max: i64,
}

impl ResourceTemplate {
    pub fn new(name: impl Into<String>, min: i64, max: i64) -> Self {
        Self {
            name: name.into(),
            min,
            max,
        }
    }
}

/// Template an agent or team instance is cloned from.
#[derive(Clone, Default)]
pub struct AgentTemplate {
    pub name: String,
    pub team: bool,
    /// Plans this agent may select. Empty means every committed plan.
    pub plans: Vec<String>,
    pub roles: Vec<String>,
    /// Beliefsets instantiated from their schemas at creation.
    pub beliefsets: Vec<String>,
    pub resources: Vec<String>,
    pub handlers: HashMap<String, ActionHandler>,
    /// Tactic names installed at creation.
    pub tactics: Vec<String>,
    /// How long this team waits for auction bids.
    pub auction_timeout_ms: u64,
}

impl fmt::Debug for AgentTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentTemplate")
            .field("name", &self.name)
            .field("team", &self.team)
            .field("plans", &self.plans)
            .field("roles", &self.roles)
            .finish()
    }
}

/// Chained construction of an agent template.
#[derive(Clone, Default)]
pub struct AgentBuilder {
    template: AgentTemplate,
}

impl AgentBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            template: AgentTemplate {
                name: name.into(),
                auction_timeout_ms: 1_000,
                ..AgentTemplate::default()
            },
        }
    }

    pub fn team(mut self) -> Self {
        self.template.team = true;
        self
    }

    pub fn plans<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.template.plans.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn roles<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.template.roles.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn beliefsets<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.template
            .beliefsets
            .extend(names.into_iter().map(Into::into));
        self
    }

    pub fn resources<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.template
            .resources
            .extend(names.into_iter().map(Into::into));
        self
    }

    pub fn tactics<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.template
            .tactics
            .extend(names.into_iter().map(Into::into));
        self
    }

    pub fn handle_action(
        mut self,
        action: impl Into<String>,
        func: impl Fn(&mut volition_beliefs::BeliefContext, &mut crate::service::ActionCall) -> crate::service::ActionStatus
            + Send
            + Sync
            + 'static,
    ) -> Self {
        self.template
            .handlers
            .insert(action.into(), std::sync::Arc::new(func));
        self
    }

    pub fn auction_timeout_ms(mut self, timeout: u64) -> Self {
        self.template.auction_timeout_ms = timeout;
        self
    }

    pub fn build(self) -> AgentTemplate {
        self.template
    }
}

/// The engine's model registry: every committed template, by name.
///
/// Commits validate cross-references up front and leave the registry
/// untouched on failure; instances resolve names through these maps instead
/// of holding references to each other.
#[derive(Debug, Default)]
pub struct ModelRegistry {
    pub(crate) schemas: HashMap<String, Schema>,
    pub(crate) actions: HashMap<String, ActionDef>,
    pub(crate) goals: HashMap<String, Goal>,
    pub(crate) plans: HashMap<String, Plan>,
    /// Plan names in commit order; drives default plan-list ordering.
    pub(crate) plan_order: Vec<String>,
    pub(crate) roles: HashMap<String, Role>,
    pub(crate) resources: HashMap<String, ResourceTemplate>,
    pub(crate) tactics: HashMap<String, Tactic>,
    pub(crate) agent_templates: HashMap<String, AgentTemplate>,
    pub(crate) service_templates: HashMap<String, ServiceTemplate>,
}

impl ModelRegistry {
    fn check_unused(&self, name: &str, used: bool) -> Result<()> {
        if used {
            Err(RuntimeError::DuplicateTemplate(name.to_string()))
        } else {
            Ok(())
        }
    }

    pub fn commit_schema(&mut self, schema: Schema) -> Result<()> {
        self.check_unused(schema.name(), self.schemas.contains_key(schema.name()))?;
        schema.check()?;
        for field in schema.fields() {
            if let volition_core::ValueKind::Msg(nested) = &field.kind {
                if !self.schemas.contains_key(nested) {
                    return Err(RuntimeError::UnknownSchema(nested.clone()));
                }
            }
        }
        self.schemas.insert(schema.name().to_string(), schema);
        Ok(())
    }

    pub fn commit_action(&mut self, action: ActionDef) -> Result<()> {
        self.check_unused(&action.name, self.actions.contains_key(&action.name))?;
        for schema in [&action.request, &action.reply].into_iter().flatten() {
            if !self.schemas.contains_key(schema) {
                return Err(RuntimeError::UnknownSchema(schema.clone()));
            }
        }
        self.actions.insert(action.name.clone(), action);
        Ok(())
    }

    pub fn commit_goal(&mut self, goal: Goal) -> Result<()> {
        self.check_unused(&goal.name, self.goals.contains_key(&goal.name))?;
        if let Some(schema) = &goal.message_schema {
            if !self.schemas.contains_key(schema) {
                return Err(RuntimeError::UnknownSchema(schema.clone()));
            }
        }
        self.goals.insert(goal.name.clone(), goal);
        Ok(())
    }

    pub fn commit_plan(&mut self, plan: Plan) -> Result<()> {
        self.check_unused(&plan.name, self.plans.contains_key(&plan.name))?;
        if !self.goals.contains_key(&plan.goal) {
            return Err(RuntimeError::UnknownGoal(plan.goal.clone()));
        }
        // Unknown lock names are a hard commit error, not a runtime warning.
        for lock in &plan.resource_locks {
            if !self.resources.contains_key(lock) {
                return Err(RuntimeError::UnknownResource(lock.clone()));
            }
        }
        self.plan_order.push(plan.name.clone());
        self.plans.insert(plan.name.clone(), plan);
        Ok(())
    }

    pub fn commit_role(&mut self, role: Role) -> Result<()> {
        self.check_unused(&role.name, self.roles.contains_key(&role.name))?;
        for goal in &role.goals {
            if !self.goals.contains_key(goal) {
                return Err(RuntimeError::UnknownGoal(goal.clone()));
            }
        }
        self.roles.insert(role.name.clone(), role);
        Ok(())
    }

    pub fn commit_resource(&mut self, resource: ResourceTemplate) -> Result<()> {
        self.check_unused(&resource.name, self.resources.contains_key(&resource.name))?;
        self.resources.insert(resource.name.clone(), resource);
        Ok(())
    }

    pub fn commit_tactic(&mut self, tactic: Tactic) -> Result<()> {
        let name = tactic.handle.name.clone();
        self.check_unused(&name, self.tactics.contains_key(&name))?;
        if !self.goals.contains_key(&tactic.goal) {
            return Err(RuntimeError::UnknownGoal(tactic.goal.clone()));
        }
        for plan in &tactic.plans {
            let Some(committed) = self.plans.get(plan) else {
                return Err(RuntimeError::UnknownPlan(plan.clone()));
            };
            if committed.goal != tactic.goal {
                return Err(RuntimeError::PlanGoalMismatch {
                    plan: plan.clone(),
                    goal: tactic.goal.clone(),
                });
            }
        }
        self.tactics.insert(name, tactic);
        Ok(())
    }

    pub fn commit_agent_template(&mut self, template: AgentTemplate) -> Result<()> {
        self.check_unused(
            &template.name,
            self.agent_templates.contains_key(&template.name),
        )?;
        for plan in &template.plans {
            if !self.plans.contains_key(plan) {
                return Err(RuntimeError::UnknownPlan(plan.clone()));
            }
        }
        for role in &template.roles {
            if !self.roles.contains_key(role) {
                return Err(RuntimeError::UnknownRole(role.clone()));
            }
        }
        for beliefset in &template.beliefsets {
            if !self.schemas.contains_key(beliefset) {
                return Err(RuntimeError::UnknownSchema(beliefset.clone()));
            }
        }
        for resource in &template.resources {
            if !self.resources.contains_key(resource) {
                return Err(RuntimeError::UnknownResource(resource.clone()));
            }
        }
        for tactic in &template.tactics {
            if !self.tactics.contains_key(tactic) {
                return Err(RuntimeError::UnknownTactic(tactic.clone()));
            }
        }
        self.agent_templates
            .insert(template.name.clone(), template);
        Ok(())
    }

    pub fn commit_service_template(&mut self, template: ServiceTemplate) -> Result<()> {
        self.check_unused(
            &template.name,
            self.service_templates.contains_key(&template.name),
        )?;
        for action in &template.actions {
            if !self.actions.contains_key(action) {
                return Err(RuntimeError::UnknownAction(action.clone()));
            }
        }
        self.service_templates
            .insert(template.name.clone(), template);
        Ok(())
    }

    pub fn schema(&self, name: &str) -> Option<&Schema> {
        self.schemas.get(name)
    }

    pub fn action(&self, name: &str) -> Option<&ActionDef> {
        self.actions.get(name)
    }

    pub fn goal(&self, name: &str) -> Option<&Goal> {
        self.goals.get(name)
    }

    pub fn plan(&self, name: &str) -> Option<&Plan> {
        self.plans.get(name)
    }

    pub fn role(&self, name: &str) -> Option<&Role> {
        self.roles.get(name)
    }

    pub fn tactic(&self, name: &str) -> Option<&Tactic> {
        self.tactics.get(name)
    }

    /// Every committed plan handling `goal`, in commit order.
    pub fn plans_for_goal(&self, goal: &str) -> Vec<String> {
        self.plan_order
            .iter()
            .filter(|name| {
                self.plans
                    .get(*name)
                    .map(|p| p.goal == goal)
                    .unwrap_or(false)
            })
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use volition_core::ValueKind;

    use super::*;
    use crate::goal::GoalBuilder;
    use crate::plan::PlanBuilder;
    use crate::tactic::TacticBuilder;

    fn registry() -> ModelRegistry {
        let mut registry = ModelRegistry::default();
        registry
            .commit_schema(Schema::new("done").field("flag", ValueKind::Bool))
            .unwrap();
        registry.commit_goal(GoalBuilder::new("G").build()).unwrap();
        registry
            .commit_resource(ResourceTemplate::new("R", 0, 1))
            .unwrap();
        registry
    }

    #[test]
    fn test_duplicate_commit_fails_and_leaves_registry_unchanged() {
        let mut registry = registry();
        let err = registry.commit_goal(GoalBuilder::new("G").priority(5).build());
        assert!(matches!(err, Err(RuntimeError::DuplicateTemplate(_))));
        assert_eq!(registry.goal("G").unwrap().priority, 0);
    }

    #[test]
    fn test_plan_with_unknown_goal_fails() {
        let mut registry = registry();
        let err = registry.commit_plan(PlanBuilder::new("P").handles("NoSuch").build());
        assert!(matches!(err, Err(RuntimeError::UnknownGoal(_))));
        assert!(registry.plan("P").is_none());
    }

    #[test]
    fn test_plan_with_unknown_lock_fails() {
        let mut registry = registry();
        let err =
            registry.commit_plan(PlanBuilder::new("P").handles("G").locks(["NoSuch"]).build());
        assert!(matches!(err, Err(RuntimeError::UnknownResource(_))));
    }

    #[test]
    fn test_plans_for_goal_in_commit_order() {
        let mut registry = registry();
        registry
            .commit_plan(PlanBuilder::new("P2").handles("G").build())
            .unwrap();
        registry
            .commit_plan(PlanBuilder::new("P1").handles("G").build())
            .unwrap();
        assert_eq!(registry.plans_for_goal("G"), ["P2", "P1"]);
    }

    #[test]
    fn test_tactic_requires_matching_plans() {
        let mut registry = registry();
        registry
            .commit_plan(PlanBuilder::new("P1").handles("G").build())
            .unwrap();
        let err = registry.commit_tactic(
            TacticBuilder::new("t").goal("G").plans(["NoSuch"]).build(),
        );
        assert!(matches!(err, Err(RuntimeError::UnknownPlan(_))));
        registry
            .commit_tactic(TacticBuilder::new("t").goal("G").plans(["P1"]).build())
            .unwrap();
    }

    #[test]
    fn test_action_requires_known_schemas() {
        let mut registry = registry();
        let err = registry.commit_action(ActionDef::new("A").request("NoSuch"));
        assert!(matches!(err, Err(RuntimeError::UnknownSchema(_))));
        registry
            .commit_action(ActionDef::new("A").request("done"))
            .unwrap();
    }
}
