use thiserror::Error;

#[derive(Debug, Error)]
pub enum LexError {
    #[error("Unexpected character '{0}' at position {1}")]
    UnexpectedChar(char, usize),
    #[error("Unterminated string at position {0}")]
    UnterminatedString(usize),
    #[error("Invalid number at position {0}")]
    InvalidNumber(usize),
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Unexpected token: expected {expected}, found {found}")]
    UnexpectedToken { expected: String, found: String },
    #[error("Unexpected end of input")]
    UnexpectedEof,
    #[error("Empty query")]
    EmptyQuery,
    #[error("Lexer error: {0}")]
    Lex(#[from] LexError),
}

#[derive(Debug, Error)]
pub enum EvalError {
    #[error("Unknown belief '{0}'")]
    UnknownSymbol(String),
    #[error("Unknown function '{0}'")]
    UnknownFunction(String),
    #[error("Function '{func}' expects {expected} argument(s), got {got}")]
    Arity {
        func: String,
        expected: usize,
        got: usize,
    },
    #[error("Type error: {0}")]
    Type(String),
}

#[derive(Debug, Error)]
pub enum BeliefError {
    #[error("Unknown beliefset '{0}'")]
    UnknownMessage(String),
    #[error("Unknown resource '{0}'")]
    UnknownResource(String),
    #[error("Beliefset '{message}' has no field '{field}'")]
    UnknownField { message: String, field: String },
}

pub type Result<T> = std::result::Result<T, BeliefError>;
