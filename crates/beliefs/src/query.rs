use std::fmt;
use std::sync::Arc;

use tracing::warn;

use crate::ast::Expr;
use crate::context::BeliefContext;
use crate::error::ParseError;
use crate::eval::eval;
use crate::parser::Parser;

type Predicate = Arc<dyn Fn(&BeliefContext) -> bool + Send + Sync>;

enum Source {
    /// The canonical form: a user-supplied closure.
    Predicate(Predicate),
    /// A parsed expression, retained with its text and referenced symbols.
    Expr {
        text: String,
        ast: Expr,
        symbols: Vec<String>,
    },
}

/// A predicate over a [`BeliefContext`].
///
/// Preconditions, satisfaction checks and drop conditions are all belief
/// queries. Evaluation never mutates the context; an expression that fails to
/// evaluate (unknown belief, type error) logs once per evaluation and counts
/// as false.
#[derive(Clone)]
pub struct BeliefQuery {
    source: Arc<Source>,
}

impl BeliefQuery {
    pub fn from_fn(func: impl Fn(&BeliefContext) -> bool + Send + Sync + 'static) -> Self {
        Self {
            source: Arc::new(Source::Predicate(Arc::new(func))),
        }
    }

    pub fn parse(text: &str) -> Result<Self, ParseError> {
        let ast = Parser::parse(text)?;
        let symbols = ast.symbols();
        Ok(Self {
            source: Arc::new(Source::Expr {
                text: text.to_string(),
                ast,
                symbols,
            }),
        })
    }

    pub fn is_expression(&self) -> bool {
        matches!(*self.source, Source::Expr { .. })
    }

    /// The belief paths an expression query reads; empty for predicates.
    pub fn subscribed_beliefs(&self) -> &[String] {
        match &*self.source {
            Source::Predicate(_) => &[],
            Source::Expr { symbols, .. } => symbols,
        }
    }

    pub fn eval(&self, ctx: &BeliefContext) -> bool {
        match &*self.source {
            Source::Predicate(func) => func(ctx),
            Source::Expr { text, ast, .. } => match eval(ast, ctx) {
                Ok(value) => value.is_truthy(),
                Err(err) => {
                    warn!(query = %text, error = %err, "belief query failed to evaluate");
                    false
                }
            },
        }
    }
}

impl fmt::Debug for BeliefQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.source {
            Source::Predicate(_) => write!(f, "BeliefQuery(<predicate>)"),
            Source::Expr { text, .. } => write!(f, "BeliefQuery({text:?})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use volition_core::Message;

    use super::*;

    #[test]
    fn test_predicate_query() {
        let query = BeliefQuery::from_fn(|ctx| ctx.fact("cell.alive").is_some());
        let mut ctx = BeliefContext::new();
        assert!(!query.eval(&ctx));
        ctx.set_message(Message::new("cell").with("alive", true));
        assert!(query.eval(&ctx));
        assert!(query.subscribed_beliefs().is_empty());
    }

    #[test]
    fn test_expression_query() {
        let query = BeliefQuery::parse("cell.alive == true").unwrap();
        let mut ctx = BeliefContext::new();
        ctx.set_message(Message::new("cell").with("alive", true));
        assert!(query.eval(&ctx));
        assert_eq!(query.subscribed_beliefs(), ["cell.alive"]);
    }

    #[test]
    fn test_failed_evaluation_is_false() {
        let query = BeliefQuery::parse("missing.path > 2").unwrap();
        assert!(!query.eval(&BeliefContext::new()));
    }

    #[test]
    fn test_empty_expression_rejected() {
        assert!(BeliefQuery::parse("").is_err());
    }
}
