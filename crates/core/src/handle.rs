use std::fmt;

use serde::{Deserialize, Serialize};

use crate::id::UniqueId;

/// Lightweight reference to a goal instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GoalHandle {
    pub name: String,
    pub id: UniqueId,
}

impl GoalHandle {
    pub fn new(name: impl Into<String>, id: UniqueId) -> Self {
        Self {
            name: name.into(),
            id,
        }
    }

    pub fn valid(&self) -> bool {
        !self.name.is_empty() && self.id.valid()
    }
}

impl fmt::Display for GoalHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "goal:{}#{}", self.name, self.id)
    }
}

/// Lightweight reference to an agent or team instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentHandle {
    pub name: String,
    pub id: UniqueId,
}

impl AgentHandle {
    pub fn new(name: impl Into<String>, id: UniqueId) -> Self {
        Self {
            name: name.into(),
            id,
        }
    }

    pub fn valid(&self) -> bool {
        !self.name.is_empty() && self.id.valid()
    }
}

impl fmt::Display for AgentHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "agent:{}#{}", self.name, self.id)
    }
}

/// Lightweight reference to a service instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceHandle {
    pub name: String,
    pub id: UniqueId,
}

impl ServiceHandle {
    pub fn new(name: impl Into<String>, id: UniqueId) -> Self {
        Self {
            name: name.into(),
            id,
        }
    }

    pub fn valid(&self) -> bool {
        !self.name.is_empty() && self.id.valid()
    }
}

impl fmt::Display for ServiceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "service:{}#{}", self.name, self.id)
    }
}

/// Lightweight reference to a committed action.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActionHandle {
    pub name: String,
}

impl ActionHandle {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn valid(&self) -> bool {
        !self.name.is_empty()
    }
}

impl fmt::Display for ActionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "action:{}", self.name)
    }
}

/// Lightweight reference to a committed tactic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TacticHandle {
    pub name: String,
    pub id: UniqueId,
}

impl TacticHandle {
    pub fn new(name: impl Into<String>, id: UniqueId) -> Self {
        Self {
            name: name.into(),
            id,
        }
    }
}

impl fmt::Display for TacticHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tactic:{}#{}", self.name, self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_validity() {
        assert!(!GoalHandle::default().valid());
        assert!(GoalHandle::new("g", UniqueId::random()).valid());
        assert!(!AgentHandle::new("a", UniqueId::NIL).valid());
    }

    #[test]
    fn test_handle_display_names_entity() {
        let h = GoalHandle::new("Patrol", UniqueId::from_halves(0, 1));
        assert!(h.to_string().starts_with("goal:Patrol#"));
    }
}
