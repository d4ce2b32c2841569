use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use volition_core::{Message, Value};

use crate::error::{BeliefError, Result};
use crate::resource::{PerceptSink, Resource};

/// Per-agent in-memory store of beliefsets (messages) and resources.
///
/// The context always reflects exactly the beliefs visible after the last
/// processed event; queries evaluated for plan selection and transitions read
/// it without mutating it.
#[derive(Clone, Default)]
pub struct BeliefContext {
    messages: BTreeMap<String, Message>,
    resources: BTreeMap<String, Resource>,
    /// Parameters of the goal this context is currently evaluating in.
    goal_message: Option<Message>,
    /// Action replies buffered until the owning intention completes.
    pending_replies: Vec<Message>,
    dirty: BTreeSet<String>,
    sink: Option<Arc<dyn PerceptSink>>,
}

impl BeliefContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace or insert a beliefset, keyed by its schema name.
    pub fn set_message(&mut self, msg: Message) {
        let name = msg.schema().to_string();
        self.messages.insert(name.clone(), msg);
        self.dirty.insert(name);
    }

    /// Insert a beliefset under an explicit key. Used for beliefsets shared
    /// into a team, which are namespaced by the sharing member.
    pub fn set_named_message(&mut self, key: impl Into<String>, msg: Message) {
        let key = key.into();
        self.messages.insert(key.clone(), msg);
        self.dirty.insert(key);
    }

    pub fn message(&self, name: &str) -> Option<&Message> {
        self.messages.get(name)
    }

    pub fn messages(&self) -> impl Iterator<Item = (&str, &Message)> {
        self.messages.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn get(&self, name: &str, field: &str) -> Option<&Value> {
        self.messages.get(name).and_then(|msg| msg.get(field))
    }

    /// Set one field of an existing beliefset.
    pub fn set_field(&mut self, name: &str, field: &str, value: impl Into<Value>) -> Result<()> {
        let msg = self
            .messages
            .get_mut(name)
            .ok_or_else(|| BeliefError::UnknownMessage(name.to_string()))?;
        msg.set(field, value);
        self.dirty.insert(name.to_string());
        Ok(())
    }

    /// Resolve a dotted belief path.
    ///
    /// `"cell.alive"` reads field `alive` of beliefset `cell`, descending into
    /// nested messages for longer paths; a team-shared beliefset is addressed
    /// by its stored name, e.g. `"track@m1.pos"`. A bare name is looked up in
    /// the current goal message first, then as a field of any beliefset, then
    /// as a resource (yielding its count).
    pub fn fact(&self, path: &str) -> Option<Value> {
        if let Some((head, rest)) = path.split_once('.') {
            if let Some(msg) = self.messages.get(head) {
                return lookup_path(msg, rest).cloned();
            }
            if let Some(goal) = &self.goal_message {
                if goal.schema() == head {
                    return lookup_path(goal, rest).cloned();
                }
            }
            return None;
        }
        if let Some(value) = self.goal_message.as_ref().and_then(|msg| msg.get(path)) {
            return Some(value.clone());
        }
        for msg in self.messages.values() {
            if let Some(value) = msg.get(path) {
                return Some(value.clone());
            }
        }
        self.resources.get(path).map(|r| Value::I64(r.count()))
    }

    pub fn goal_message(&self) -> Option<&Message> {
        self.goal_message.as_ref()
    }

    pub fn set_goal_message(&mut self, msg: Option<Message>) {
        self.goal_message = msg;
    }

    pub fn add_resource(&mut self, mut resource: Resource) {
        if let Some(sink) = &self.sink {
            resource.set_sink(Arc::clone(sink));
        }
        self.resources.insert(resource.name().to_string(), resource);
    }

    pub fn resource(&self, name: &str) -> Option<&Resource> {
        self.resources.get(name)
    }

    pub fn resource_mut(&mut self, name: &str) -> Option<&mut Resource> {
        self.resources.get_mut(name)
    }

    pub fn resources(&self) -> impl Iterator<Item = &Resource> {
        self.resources.values()
    }

    /// Install the percept seam on this context and every resource it holds.
    pub fn install_sink(&mut self, sink: Arc<dyn PerceptSink>) {
        for resource in self.resources.values_mut() {
            resource.set_sink(Arc::clone(&sink));
        }
        self.sink = Some(sink);
    }

    /// Buffer an action reply message for application when the intention
    /// completes.
    pub fn push_action_reply(&mut self, msg: Message) {
        self.pending_replies.push(msg);
    }

    /// Apply the buffered action replies as beliefsets.
    pub fn flush_action_replies(&mut self) {
        for msg in std::mem::take(&mut self.pending_replies) {
            self.set_message(msg);
        }
    }

    pub fn discard_action_replies(&mut self) {
        self.pending_replies.clear();
    }

    /// Beliefset names written since the last call.
    pub fn take_dirty(&mut self) -> BTreeSet<String> {
        std::mem::take(&mut self.dirty)
    }
}

impl std::fmt::Debug for BeliefContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BeliefContext")
            .field("messages", &self.messages)
            .field("resources", &self.resources)
            .field("goal_message", &self.goal_message)
            .field("pending_replies", &self.pending_replies.len())
            .finish()
    }
}

fn lookup_path<'a>(msg: &'a Message, path: &str) -> Option<&'a Value> {
    match path.split_once('.') {
        None => msg.get(path),
        Some((field, rest)) => match msg.get(field)? {
            Value::Msg(inner) => lookup_path(inner, rest),
            _ => None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> BeliefContext {
        let mut ctx = BeliefContext::new();
        ctx.set_message(
            Message::new("cell")
                .with("alive", true)
                .with("population", 3i64),
        );
        ctx.add_resource(Resource::new("battery", 0, 5));
        ctx
    }

    #[test]
    fn test_dotted_fact() {
        let ctx = context();
        assert_eq!(ctx.fact("cell.alive"), Some(Value::Bool(true)));
        assert_eq!(ctx.fact("cell.population"), Some(Value::I64(3)));
        assert_eq!(ctx.fact("cell.missing"), None);
    }

    #[test]
    fn test_bare_fact_prefers_goal_message() {
        let mut ctx = context();
        assert_eq!(ctx.fact("population"), Some(Value::I64(3)));
        ctx.set_goal_message(Some(Message::new("params").with("population", 9i64)));
        assert_eq!(ctx.fact("population"), Some(Value::I64(9)));
    }

    #[test]
    fn test_resource_fact_reads_count() {
        let ctx = context();
        assert_eq!(ctx.fact("battery"), Some(Value::I64(5)));
    }

    #[test]
    fn test_shared_beliefset_fact_by_stored_name() {
        let mut ctx = BeliefContext::new();
        ctx.set_named_message("track@m1", Message::new("track").with("pos", 2i64));
        assert_eq!(ctx.fact("track@m1.pos"), Some(Value::I64(2)));
        assert!(ctx.message("track@m1").is_some());
    }

    #[test]
    fn test_nested_message_path() {
        let mut ctx = BeliefContext::new();
        let inner = Message::new("pos").with("x", 7i64);
        ctx.set_message(Message::new("track").with("pos", Value::Msg(Box::new(inner))));
        assert_eq!(ctx.fact("track.pos.x"), Some(Value::I64(7)));
    }

    #[test]
    fn test_action_replies_apply_on_flush() {
        let mut ctx = context();
        ctx.push_action_reply(Message::new("cell").with("alive", false));
        assert_eq!(ctx.fact("cell.alive"), Some(Value::Bool(true)));
        ctx.flush_action_replies();
        assert_eq!(ctx.fact("cell.alive"), Some(Value::Bool(false)));
    }

    #[test]
    fn test_dirty_tracking() {
        let mut ctx = context();
        ctx.take_dirty();
        ctx.set_field("cell", "alive", false).unwrap();
        let dirty = ctx.take_dirty();
        assert!(dirty.contains("cell"));
        assert!(ctx.take_dirty().is_empty());
    }
}
