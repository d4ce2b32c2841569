use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("A template named '{0}' already exists")]
    DuplicateTemplate(String),

    #[error("Unknown agent template '{0}'")]
    UnknownTemplate(String),

    #[error("Unknown goal '{0}'")]
    UnknownGoal(String),

    #[error("Unknown plan '{0}'")]
    UnknownPlan(String),

    #[error("Unknown message schema '{0}'")]
    UnknownSchema(String),

    #[error("Unknown resource '{0}'")]
    UnknownResource(String),

    #[error("Unknown role '{0}'")]
    UnknownRole(String),

    #[error("Unknown action '{0}'")]
    UnknownAction(String),

    #[error("Unknown tactic '{0}'")]
    UnknownTactic(String),

    #[error("Unknown agent '{0}'")]
    UnknownAgent(String),

    #[error("Plan '{plan}' does not handle goal '{goal}'")]
    PlanGoalMismatch { plan: String, goal: String },

    #[error("Agent '{0}' is not a team")]
    NotATeam(String),

    #[error("Agent '{member}' is already a member of team '{team}'")]
    AlreadyMember { team: String, member: String },

    #[error("Agent '{member}' is not a member of team '{team}'")]
    NotAMember { team: String, member: String },

    #[error("Validation failed: {0}")]
    Validation(#[from] volition_core::CoreError),

    #[error("Query parse error: {0}")]
    Parse(#[from] volition_beliefs::ParseError),
}

pub type Result<T> = std::result::Result<T, RuntimeError>;
