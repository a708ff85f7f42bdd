//! Trellis Expr - binding language for Trellis content
//!
//! Parses and interprets the small JavaScript-like expressions found in
//! content bindings, visibility conditions, repeat collections and custom
//! code. Only `state`, `context`, `event` and `builder` plus a fixed set of
//! built-ins are visible to evaluated code.

mod ast;
mod builtins;
mod error;
mod evaluator;
mod interpreter;
mod lexer;
mod parser;
mod value;

pub use ast::{Expr, Program, Stmt};
pub use error::{ExprError, ExprResult};
pub use evaluator::{EvalInput, EvalMode, Evaluator, Globals, StateSetter};
pub use parser::{parse_expression, parse_program};
pub use value::{Function, Value};
