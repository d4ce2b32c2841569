use serde::{Deserialize, Serialize};

/// Parsed form of a belief query expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Number(f64),
    Bool(bool),
    Str(String),
    /// A dotted belief path resolved against the context.
    Symbol(String),
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Call {
        func: String,
        args: Vec<Expr>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    And,
    Or,
}

impl Expr {
    /// Collect the belief paths this expression reads. The engine uses the
    /// set to know which belief updates should re-trigger evaluation.
    pub fn symbols(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_symbols(&mut out);
        out
    }

    fn collect_symbols(&self, out: &mut Vec<String>) {
        match self {
            Expr::Symbol(name) => {
                if !out.iter().any(|s| s == name) {
                    out.push(name.clone());
                }
            }
            Expr::Unary { expr, .. } => expr.collect_symbols(out),
            Expr::Binary { lhs, rhs, .. } => {
                lhs.collect_symbols(out);
                rhs.collect_symbols(out);
            }
            Expr::Call { args, .. } => {
                for arg in args {
                    arg.collect_symbols(out);
                }
            }
            Expr::Number(_) | Expr::Bool(_) | Expr::Str(_) => {}
        }
    }
}
