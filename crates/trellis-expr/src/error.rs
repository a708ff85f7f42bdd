//! Errors raised while lexing, parsing or running an expression.

/// An expression failure. Callers of [`crate::Evaluator::evaluate`] never see
/// this: it is logged and turned into `undefined`.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExprError {
    #[error("Unexpected character '{ch}' at offset {offset}")]
    UnexpectedChar { ch: char, offset: usize },

    #[error("Unterminated string starting at offset {0}")]
    UnterminatedString(usize),

    #[error("Parse error at offset {offset}: {message}")]
    Parse { offset: usize, message: String },

    #[error("{0} is not defined")]
    UndefinedVariable(String),

    #[error("{0} is not a function")]
    NotCallable(String),

    #[error("Cannot assign to {0}")]
    InvalidAssignment(String),

    #[error("Cannot set property '{key}' of {target}")]
    CannotSetProperty { key: String, target: String },

    #[error("Assignment to constant variable '{0}'")]
    ConstAssignment(String),

    #[error("Maximum call depth exceeded")]
    StackOverflow,

    #[error("Evaluation budget exhausted")]
    BudgetExhausted,

    #[error("{0}")]
    Runtime(String),
}

pub type ExprResult<T> = Result<T, ExprError>;
