//! Public evaluation entry point.

use std::num::NonZeroUsize;
use std::sync::{Arc, LazyLock, Mutex};

use lru::LruCache;
use regex::Regex;
use serde_json::{Map, Value as JsonValue};

use crate::ast::{Program, Stmt};
use crate::error::{ExprError, ExprResult};
use crate::interpreter::{Interpreter, STATE};
use crate::parser::{parse_expression, parse_program};
use crate::value::{object_from_json, Value};

const DEFAULT_CACHE_CAPACITY: usize = 1024;

/// `state.a.b.c`, optionally prefixed with `return ` and followed by `;`.
static STATE_GETTER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:return )?\s*state(?P<path>(?:\.[A-Za-z_$][\w$]*)+)\s*;?$")
        .expect("Invalid state getter regex")
});

static RETURN_KEYWORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\breturn\b").expect("Invalid return regex"));

pub type StateSetter<'s> = &'s mut dyn FnMut(Map<String, JsonValue>);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum EvalMode {
    /// Implicit `return`, unless the code contains a `return` of its own.
    #[default]
    Expression,
    /// A statement block, as used by custom code and actions.
    Statements,
}

/// Values exposed through the `builder` global.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Globals {
    pub is_editing: bool,
    pub is_previewing: bool,
}

/// One evaluation request.
#[derive(Debug, Clone, Copy)]
pub struct EvalInput<'a> {
    pub code: &'a str,
    pub root_state: &'a Map<String, JsonValue>,
    pub local_state: Option<&'a Map<String, JsonValue>>,
    pub context: Option<&'a Map<String, JsonValue>>,
    pub event: Option<&'a JsonValue>,
    pub mode: EvalMode,
}

impl<'a> EvalInput<'a> {
    pub fn new(code: &'a str, root_state: &'a Map<String, JsonValue>) -> Self {
        Self {
            code,
            root_state,
            local_state: None,
            context: None,
            event: None,
            mode: EvalMode::Expression,
        }
    }

    pub fn local(mut self, local_state: &'a Map<String, JsonValue>) -> Self {
        self.local_state = Some(local_state);
        self
    }

    pub fn context(mut self, context: &'a Map<String, JsonValue>) -> Self {
        self.context = Some(context);
        self
    }

    pub fn event(mut self, event: &'a JsonValue) -> Self {
        self.event = Some(event);
        self
    }

    pub fn statements(mut self) -> Self {
        self.mode = EvalMode::Statements;
        self
    }
}

/// Evaluates binding code against a scope.
///
/// Parsed programs are kept in a bounded LRU keyed by source text, so the
/// same binding evaluated on every render pass is parsed once. The cache
/// holds syntax only; results are never cached.
pub struct Evaluator {
    cache: Mutex<LruCache<(EvalMode, String), Arc<Program>>>,
    globals: Globals,
}

impl Default for Evaluator {
    fn default() -> Self {
        Self::new(Globals::default())
    }
}

impl Evaluator {
    pub fn new(globals: Globals) -> Self {
        Self::with_capacity(globals, DEFAULT_CACHE_CAPACITY)
    }

    pub fn with_capacity(globals: Globals, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: Mutex::new(LruCache::new(capacity)),
            globals,
        }
    }

    pub fn globals(&self) -> Globals {
        self.globals
    }

    pub fn set_globals(&mut self, globals: Globals) {
        self.globals = globals;
    }

    /// Evaluate, logging and swallowing any failure.
    ///
    /// `None` stands for `undefined`.
    pub fn evaluate(&self, input: &EvalInput<'_>) -> Option<JsonValue> {
        self.evaluate_inner(input, None)
    }

    /// Like [`Evaluator::evaluate`], delivering state writes to `setter`.
    pub fn evaluate_with_setter(
        &self,
        input: &EvalInput<'_>,
        setter: StateSetter<'_>,
    ) -> Option<JsonValue> {
        self.evaluate_inner(input, Some(setter))
    }

    fn evaluate_inner(
        &self,
        input: &EvalInput<'_>,
        setter: Option<StateSetter<'_>>,
    ) -> Option<JsonValue> {
        match self.try_evaluate(input, setter) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(code = %input.code, error = %e, "Failed code evaluation");
                None
            }
        }
    }

    /// Evaluate and report failures to the caller.
    ///
    /// Writes to `state` made by statement code are applied to a private
    /// copy. When the program completes, the touched top-level keys are
    /// handed to `setter` as one partial map.
    pub fn try_evaluate(
        &self,
        input: &EvalInput<'_>,
        setter: Option<StateSetter<'_>>,
    ) -> ExprResult<Option<JsonValue>> {
        let code = input.code.trim();
        if code.is_empty() {
            return Ok(None);
        }

        if let Some(caps) = STATE_GETTER.captures(code) {
            let path = &caps["path"][1..];
            return Ok(fast_lookup(input.root_state, input.local_state, path));
        }

        let program = self.program(code, input.mode)?;
        let mut interp = Interpreter::new(self.bindings(input));
        let result = interp.run(&program)?;

        if let Some(setter) = setter {
            if !interp.state_writes().is_empty() {
                let state = interp.global(STATE).unwrap_or_default();
                let patch: Map<String, JsonValue> = interp
                    .state_writes()
                    .iter()
                    .map(|key| {
                        let value = state.get_property(key).to_json().unwrap_or(JsonValue::Null);
                        (key.clone(), value)
                    })
                    .collect();
                setter(patch);
            }
        }

        Ok(result.to_json())
    }

    fn bindings(&self, input: &EvalInput<'_>) -> Vec<(String, Value)> {
        let mut state = object_from_json(input.root_state);
        if let Some(local) = input.local_state {
            state.extend(object_from_json(local));
        }

        let builder = [
            ("isEditing", self.globals.is_editing),
            ("isPreviewing", self.globals.is_previewing),
            ("isBrowser", false),
            ("isServer", true),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), Value::Bool(v)))
        .collect();

        vec![
            (STATE.to_string(), Value::Object(state)),
            (
                "context".to_string(),
                Value::Object(input.context.map(object_from_json).unwrap_or_default()),
            ),
            (
                "event".to_string(),
                input.event.map(Value::from_json).unwrap_or_default(),
            ),
            ("builder".to_string(), Value::Object(builder)),
        ]
    }

    fn program(&self, code: &str, mode: EvalMode) -> ExprResult<Arc<Program>> {
        let key = (mode, code.to_string());
        if let Ok(mut cache) = self.cache.lock() {
            if let Some(program) = cache.get(&key) {
                return Ok(program.clone());
            }
        }

        let program = Arc::new(compile(code, mode)?);
        if let Ok(mut cache) = self.cache.lock() {
            cache.put(key, program.clone());
        }
        Ok(program)
    }
}

fn compile(code: &str, mode: EvalMode) -> ExprResult<Program> {
    if mode == EvalMode::Statements || RETURN_KEYWORD.is_match(code) {
        return parse_program(code);
    }
    match parse_expression(code) {
        Ok(expr) => Ok(Program {
            body: vec![Stmt::Return(Some(expr))],
        }),
        // Statement code used as a binding runs for its effects.
        Err(e @ ExprError::Parse { .. }) => parse_program(code).map_err(|_| e),
        Err(e) => Err(e),
    }
}

/// Direct nested lookup on merged root and local state.
fn fast_lookup(
    root: &Map<String, JsonValue>,
    local: Option<&Map<String, JsonValue>>,
    path: &str,
) -> Option<JsonValue> {
    let keys: Vec<&str> = path.split('.').collect();
    let (first, rest) = keys.split_first()?;
    let mut current = local
        .and_then(|local| local.get(*first))
        .or_else(|| root.get(*first))?;

    for (i, key) in rest.iter().enumerate() {
        let last = i + 1 == rest.len();
        current = match current {
            JsonValue::Object(map) => map.get(*key)?,
            // `length` is a number; any property read from it is undefined
            JsonValue::Array(items) if *key == "length" => {
                return last.then(|| JsonValue::from(items.len()))
            }
            JsonValue::String(s) if *key == "length" => {
                return last.then(|| JsonValue::from(s.chars().count()))
            }
            JsonValue::Array(items) => items.get(key.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current.clone())
}
