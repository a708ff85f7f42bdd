//! Tree-walking interpreter over parsed programs.
//!
//! Only the names bound into the global frame are visible to user code.
//! Writes under `state` are applied to the interpreter's own copy and the
//! touched top-level keys are recorded so the caller can hand them to a
//! state setter afterwards.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::rc::Rc;

use crate::ast::{
    ArrowBody, AssignOp, BinaryOp, DeclKind, Expr, Literal, LogicalOp, Program, Property, Stmt,
    TemplatePart, UnaryOp,
};
use crate::builtins;
use crate::error::{ExprError, ExprResult};
use crate::value::{format_number, Function, Value};

const MAX_CALL_DEPTH: usize = 64;
const MAX_STEPS: usize = 1_000_000;

/// The name under which document state is bound.
pub const STATE: &str = "state";

#[derive(Debug, Default)]
pub struct Frame {
    vars: HashMap<String, Value>,
    consts: HashSet<String>,
    parent: Option<FrameRef>,
}

pub type FrameRef = Rc<RefCell<Frame>>;

impl Frame {
    fn child(parent: &FrameRef) -> FrameRef {
        Rc::new(RefCell::new(Frame {
            parent: Some(parent.clone()),
            ..Frame::default()
        }))
    }
}

enum Flow {
    Normal,
    Return(Value),
}

pub struct Interpreter {
    scope: FrameRef,
    depth: usize,
    steps: usize,
    state_writes: BTreeSet<String>,
}

impl Interpreter {
    /// Create an interpreter whose global frame holds the built-in
    /// namespaces plus `bindings`.
    pub fn new(bindings: impl IntoIterator<Item = (String, Value)>) -> Self {
        let mut globals = Frame::default();
        for name in builtins::NAMESPACES {
            globals
                .vars
                .insert((*name).to_string(), Value::Function(Rc::new(Function::Global(*name))));
        }
        globals.vars.extend(bindings);

        Self {
            scope: Rc::new(RefCell::new(globals)),
            depth: 0,
            steps: 0,
            state_writes: BTreeSet::new(),
        }
    }

    /// Run a program. The result is the value of the first `return`
    /// reached, or `undefined`.
    pub fn run(&mut self, program: &Program) -> ExprResult<Value> {
        match self.exec_block(&program.body)? {
            Flow::Return(value) => Ok(value),
            Flow::Normal => Ok(Value::Undefined),
        }
    }

    /// Current value of a global binding.
    pub fn global(&self, name: &str) -> Option<Value> {
        let mut frame = self.scope.clone();
        loop {
            let parent = frame.borrow().parent.clone();
            match parent {
                Some(parent) => frame = parent,
                None => return frame.borrow().vars.get(name).cloned(),
            }
        }
    }

    /// Top-level `state` keys assigned during the run.
    pub fn state_writes(&self) -> &BTreeSet<String> {
        &self.state_writes
    }

    // --- Statements ---

    fn exec_block(&mut self, body: &[Stmt]) -> ExprResult<Flow> {
        for stmt in body {
            if let Flow::Return(value) = self.exec(stmt)? {
                return Ok(Flow::Return(value));
            }
        }
        Ok(Flow::Normal)
    }

    fn exec(&mut self, stmt: &Stmt) -> ExprResult<Flow> {
        match stmt {
            Stmt::Empty => Ok(Flow::Normal),
            Stmt::Expr(expr) => {
                self.eval(expr)?;
                Ok(Flow::Normal)
            }
            Stmt::Declare { kind, name, init } => {
                let value = match init {
                    Some(expr) => self.eval(expr)?,
                    None => Value::Undefined,
                };
                let mut frame = self.scope.borrow_mut();
                frame.vars.insert(name.clone(), value);
                if *kind == DeclKind::Const {
                    frame.consts.insert(name.clone());
                }
                Ok(Flow::Normal)
            }
            Stmt::If {
                test,
                consequent,
                alternate,
            } => {
                if self.eval(test)?.is_truthy() {
                    self.exec(consequent)
                } else if let Some(alternate) = alternate {
                    self.exec(alternate)
                } else {
                    Ok(Flow::Normal)
                }
            }
            Stmt::Block(body) => {
                let outer = self.scope.clone();
                self.scope = Frame::child(&outer);
                let flow = self.exec_block(body);
                self.scope = outer;
                flow
            }
            Stmt::Return(value) => {
                let value = match value {
                    Some(expr) => self.eval(expr)?,
                    None => Value::Undefined,
                };
                Ok(Flow::Return(value))
            }
        }
    }

    // --- Expressions ---

    fn eval(&mut self, expr: &Expr) -> ExprResult<Value> {
        self.steps += 1;
        if self.steps > MAX_STEPS {
            return Err(ExprError::BudgetExhausted);
        }

        match expr {
            Expr::Literal(lit) => Ok(match lit {
                Literal::Number(n) => Value::Number(*n),
                Literal::String(s) => Value::String(s.clone()),
                Literal::Bool(b) => Value::Bool(*b),
                Literal::Null => Value::Null,
                Literal::Undefined => Value::Undefined,
            }),
            Expr::Template(parts) => {
                let mut out = String::new();
                for part in parts {
                    match part {
                        TemplatePart::Str(s) => out.push_str(s),
                        TemplatePart::Expr(expr) => out.push_str(&self.eval(expr)?.to_js_string()),
                    }
                }
                Ok(Value::String(out))
            }
            Expr::Ident(name) => self
                .lookup(name)
                .ok_or_else(|| ExprError::UndefinedVariable(name.clone())),
            Expr::Array(items) => {
                let values = items
                    .iter()
                    .map(|item| self.eval(item))
                    .collect::<ExprResult<Vec<_>>>()?;
                Ok(Value::Array(values))
            }
            Expr::Object(entries) => {
                let mut map = BTreeMap::new();
                for (key, value) in entries {
                    map.insert(key.clone(), self.eval(value)?);
                }
                Ok(Value::Object(map))
            }
            Expr::Member {
                object,
                property,
                optional,
            } => {
                let target = self.eval(object)?;
                if *optional && target.is_nullish() {
                    return Ok(Value::Undefined);
                }
                let key = self.property_key(property)?;
                Ok(member(&target, &key))
            }
            Expr::Call {
                callee,
                args,
                optional,
            } => self.eval_call(callee, args, *optional),
            Expr::Unary { op, operand } => {
                let value = self.eval(operand)?;
                Ok(match op {
                    UnaryOp::Not => Value::Bool(!value.is_truthy()),
                    UnaryOp::Neg => Value::Number(-value.to_number()),
                    UnaryOp::Plus => Value::Number(value.to_number()),
                    UnaryOp::TypeOf => Value::from(value.type_of()),
                })
            }
            Expr::Binary { op, left, right } => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                Ok(binary(*op, &left, &right))
            }
            Expr::Logical { op, left, right } => {
                let left = self.eval(left)?;
                let short_circuit = match op {
                    LogicalOp::And => !left.is_truthy(),
                    LogicalOp::Or => left.is_truthy(),
                    LogicalOp::Nullish => !left.is_nullish(),
                };
                if short_circuit {
                    Ok(left)
                } else {
                    self.eval(right)
                }
            }
            Expr::Conditional {
                test,
                consequent,
                alternate,
            } => {
                if self.eval(test)?.is_truthy() {
                    self.eval(consequent)
                } else {
                    self.eval(alternate)
                }
            }
            Expr::Arrow { params, body } => Ok(Value::Function(Rc::new(Function::Closure {
                params: params.clone(),
                body: body.clone(),
                env: self.scope.clone(),
            }))),
            Expr::Assign { op, target, value } => {
                let value = self.eval(value)?;
                let value = match op {
                    AssignOp::Assign => value,
                    AssignOp::Add => binary(BinaryOp::Add, &self.eval(target)?, &value),
                    AssignOp::Sub => binary(BinaryOp::Sub, &self.eval(target)?, &value),
                };
                self.assign(target, value.clone())?;
                Ok(value)
            }
            Expr::Update {
                increment,
                prefix,
                target,
            } => {
                let old = self.eval(target)?.to_number();
                let new = if *increment { old + 1.0 } else { old - 1.0 };
                self.assign(target, Value::Number(new))?;
                Ok(Value::Number(if *prefix { new } else { old }))
            }
        }
    }

    fn property_key(&mut self, property: &Property) -> ExprResult<String> {
        match property {
            Property::Named(name) => Ok(name.clone()),
            Property::Computed(expr) => Ok(self.eval(expr)?.to_js_string()),
        }
    }

    fn lookup(&self, name: &str) -> Option<Value> {
        let frame = self.find_frame(name)?;
        let value = frame.borrow().vars.get(name).cloned();
        value
    }

    fn find_frame(&self, name: &str) -> Option<FrameRef> {
        let mut frame = self.scope.clone();
        loop {
            if frame.borrow().vars.contains_key(name) {
                return Some(frame);
            }
            let parent = frame.borrow().parent.clone();
            frame = parent?;
        }
    }

    fn eval_call(&mut self, callee: &Expr, args: &[Expr], optional: bool) -> ExprResult<Value> {
        // `list.push(x)` mutates the list in place when it lives in a variable.
        if let Expr::Member {
            object,
            property: Property::Named(name),
            optional: false,
        } = callee
        {
            if name == "push" {
                if let Ok((root, keys)) = self.lvalue_path(object) {
                    if matches!(self.eval(object)?, Value::Array(_)) {
                        let values = self.eval_args(args)?;
                        return self.push_at(&root, &keys, values);
                    }
                }
            }
        }

        let function = self.eval(callee)?;
        if optional && function.is_nullish() {
            return Ok(Value::Undefined);
        }
        let Value::Function(function) = function else {
            return Err(ExprError::NotCallable(describe_callee(callee)));
        };
        let args = self.eval_args(args)?;
        self.call_function(&function, args)
    }

    fn eval_args(&mut self, args: &[Expr]) -> ExprResult<Vec<Value>> {
        args.iter().map(|arg| self.eval(arg)).collect()
    }

    /// Invoke a callable value.
    pub(crate) fn call_function(&mut self, function: &Function, args: Vec<Value>) -> ExprResult<Value> {
        match function {
            Function::Closure { params, body, env } => {
                if self.depth >= MAX_CALL_DEPTH {
                    return Err(ExprError::StackOverflow);
                }
                let frame = Frame::child(env);
                {
                    let mut frame = frame.borrow_mut();
                    let mut args = args.into_iter();
                    for param in params {
                        frame.vars.insert(param.clone(), args.next().unwrap_or_default());
                    }
                }

                let outer = std::mem::replace(&mut self.scope, frame);
                self.depth += 1;
                let result = match body {
                    ArrowBody::Expr(expr) => self.eval(expr),
                    ArrowBody::Block(body) => self.exec_block(body).map(|flow| match flow {
                        Flow::Return(value) => value,
                        Flow::Normal => Value::Undefined,
                    }),
                };
                self.depth -= 1;
                self.scope = outer;
                result
            }
            Function::Method { receiver, name } => {
                builtins::call_method(self, receiver, name, args)
            }
            Function::Global(name) => builtins::call_global(name, args),
        }
    }

    // --- Assignment ---

    /// Split an assignable expression into its root variable and key path.
    fn lvalue_path(&mut self, expr: &Expr) -> ExprResult<(String, Vec<String>)> {
        match expr {
            Expr::Ident(name) => Ok((name.clone(), Vec::new())),
            Expr::Member {
                object, property, ..
            } => {
                let (root, mut keys) = self.lvalue_path(object)?;
                keys.push(self.property_key(property)?);
                Ok((root, keys))
            }
            _ => Err(ExprError::InvalidAssignment(describe_callee(expr))),
        }
    }

    fn assign(&mut self, target: &Expr, value: Value) -> ExprResult<()> {
        let (root, keys) = self.lvalue_path(target)?;
        let frame = self
            .find_frame(&root)
            .ok_or_else(|| ExprError::UndefinedVariable(root.clone()))?;

        let Some((last, parents)) = keys.split_last() else {
            let mut frame = frame.borrow_mut();
            if frame.consts.contains(&root) {
                return Err(ExprError::ConstAssignment(root));
            }
            frame.vars.insert(root, value);
            return Ok(());
        };

        {
            let mut frame = frame.borrow_mut();
            let slot = frame
                .vars
                .get_mut(&root)
                .ok_or_else(|| ExprError::UndefinedVariable(root.clone()))?;
            let parent = walk_mut(slot, parents, &root)?;
            set_child(parent, last, value)?;
        }

        if root == STATE {
            self.state_writes.insert(keys[0].clone());
        }
        Ok(())
    }

    fn push_at(&mut self, root: &str, keys: &[String], values: Vec<Value>) -> ExprResult<Value> {
        let frame = self
            .find_frame(root)
            .ok_or_else(|| ExprError::UndefinedVariable(root.to_string()))?;
        let len = {
            let mut frame = frame.borrow_mut();
            let slot = frame
                .vars
                .get_mut(root)
                .ok_or_else(|| ExprError::UndefinedVariable(root.to_string()))?;
            match walk_mut(slot, keys, root)? {
                Value::Array(items) => {
                    items.extend(values);
                    items.len()
                }
                _ => return Err(ExprError::NotCallable(format!("{root}.push"))),
            }
        };
        if root == STATE {
            if let Some(first) = keys.first() {
                self.state_writes.insert(first.clone());
            }
        }
        Ok(Value::Number(len as f64))
    }
}

/// Property read with built-in method lookup. Reads on anything without
/// properties yield `undefined`.
pub(crate) fn member(target: &Value, key: &str) -> Value {
    match target {
        Value::Function(function) => match function.as_ref() {
            Function::Global(namespace) => builtins::lookup_global(namespace, key)
                .map(|name| Value::Function(Rc::new(Function::Global(name))))
                .unwrap_or_default(),
            _ => Value::Undefined,
        },
        _ => {
            let value = target.get_property(key);
            if matches!(value, Value::Undefined) && builtins::is_method(target, key) {
                return Value::Function(Rc::new(Function::Method {
                    receiver: target.clone(),
                    name: key.to_string(),
                }));
            }
            value
        }
    }
}

fn walk_mut<'v>(mut value: &'v mut Value, keys: &[String], root: &str) -> ExprResult<&'v mut Value> {
    let mut path = root.to_string();
    for key in keys {
        value = match value {
            Value::Object(map) => map.get_mut(key),
            Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get_mut(i)),
            _ => None,
        }
        .ok_or_else(|| ExprError::CannotSetProperty {
            key: key.clone(),
            target: format!("{path} (undefined)"),
        })?;
        path.push('.');
        path.push_str(key);
    }
    Ok(value)
}

/// Holes an assignment past the end of an array may create.
const MAX_ARRAY_GAP: usize = 1024;

fn set_child(parent: &mut Value, key: &str, value: Value) -> ExprResult<()> {
    match parent {
        Value::Object(map) => {
            map.insert(key.to_string(), value);
            Ok(())
        }
        Value::Array(items) => {
            let index = key
                .parse::<usize>()
                .ok()
                .filter(|&index| index <= items.len().saturating_add(MAX_ARRAY_GAP))
                .ok_or_else(|| ExprError::CannotSetProperty {
                    key: key.to_string(),
                    target: "array".to_string(),
                })?;
            if index >= items.len() {
                items.resize(index + 1, Value::Undefined);
            }
            items[index] = value;
            Ok(())
        }
        other => Err(ExprError::CannotSetProperty {
            key: key.to_string(),
            target: other.type_of().to_string(),
        }),
    }
}

fn binary(op: BinaryOp, left: &Value, right: &Value) -> Value {
    match op {
        BinaryOp::Add => {
            let stringy = |v: &Value| {
                matches!(v, Value::String(_) | Value::Array(_) | Value::Object(_))
            };
            if stringy(left) || stringy(right) {
                Value::String(left.to_js_string() + &right.to_js_string())
            } else {
                Value::Number(left.to_number() + right.to_number())
            }
        }
        BinaryOp::Sub => Value::Number(left.to_number() - right.to_number()),
        BinaryOp::Mul => Value::Number(left.to_number() * right.to_number()),
        BinaryOp::Div => Value::Number(left.to_number() / right.to_number()),
        BinaryOp::Rem => Value::Number(left.to_number() % right.to_number()),
        BinaryOp::Lt | BinaryOp::Gt | BinaryOp::Le | BinaryOp::Ge => {
            let ordering = match (left, right) {
                (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
                _ => left.to_number().partial_cmp(&right.to_number()),
            };
            let Some(ordering) = ordering else {
                return Value::Bool(false);
            };
            Value::Bool(match op {
                BinaryOp::Lt => ordering.is_lt(),
                BinaryOp::Gt => ordering.is_gt(),
                BinaryOp::Le => ordering.is_le(),
                _ => ordering.is_ge(),
            })
        }
        BinaryOp::Eq => Value::Bool(left.loose_equals(right)),
        BinaryOp::NotEq => Value::Bool(!left.loose_equals(right)),
        BinaryOp::StrictEq => Value::Bool(left.strict_equals(right)),
        BinaryOp::StrictNotEq => Value::Bool(!left.strict_equals(right)),
    }
}

fn describe_callee(expr: &Expr) -> String {
    match expr {
        Expr::Ident(name) => name.clone(),
        Expr::Member {
            object, property, ..
        } => match property {
            Property::Named(name) => format!("{}.{name}", describe_callee(object)),
            Property::Computed(key) => match key.as_ref() {
                Expr::Literal(Literal::Number(n)) => {
                    format!("{}[{}]", describe_callee(object), format_number(*n))
                }
                _ => format!("{}[...]", describe_callee(object)),
            },
        },
        _ => "expression".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{parse_expression, parse_program};
    use crate::value::object_from_json;
    use serde_json::json;

    fn with_state(state: serde_json::Value) -> Interpreter {
        let state = match state {
            serde_json::Value::Object(map) => Value::Object(object_from_json(&map)),
            _ => Value::Object(BTreeMap::new()),
        };
        Interpreter::new([(STATE.to_string(), state)])
    }

    fn eval(source: &str, state: serde_json::Value) -> ExprResult<Value> {
        let program = Program {
            body: vec![Stmt::Return(Some(parse_expression(source)?))],
        };
        with_state(state).run(&program)
    }

    fn eval_json(source: &str, state: serde_json::Value) -> Option<serde_json::Value> {
        eval(source, state).unwrap().to_json()
    }

    #[test]
    fn evaluates_arithmetic_and_strings() {
        assert_eq!(eval_json("1 + 2 * 3", json!({})), Some(json!(7)));
        assert_eq!(eval_json("'a' + 1", json!({})), Some(json!("a1")));
        assert_eq!(eval_json("`n=${state.n + 1}`", json!({"n": 1})), Some(json!("n=2")));
    }

    #[test]
    fn nullish_member_access_is_undefined() {
        assert_eq!(eval_json("state.a.b.c", json!({})), None);
        assert_eq!(eval_json("state.a?.b ?? 'x'", json!({})), Some(json!("x")));
    }

    #[test]
    fn unknown_identifiers_are_errors() {
        assert_eq!(
            eval("window.location", json!({})).unwrap_err(),
            ExprError::UndefinedVariable("window".into())
        );
    }

    #[test]
    fn calls_array_builtins_with_closures() {
        let result = eval_json(
            "state.items.filter(x => x.on).map((x, i) => x.name + i).join(',')",
            json!({"items": [{"name": "a", "on": true}, {"name": "b"}, {"name": "c", "on": 1}]}),
        );
        assert_eq!(result, Some(json!("a0,c1")));
    }

    #[test]
    fn calling_a_non_function_fails() {
        assert_eq!(
            eval("state.nope()", json!({})).unwrap_err(),
            ExprError::NotCallable("state.nope".into())
        );
    }

    #[test]
    fn statements_record_state_writes() {
        let program =
            parse_program("state.count = state.count + 1; state.items.push(3); let x = 1; x += 1")
                .unwrap();
        let mut interp = with_state(json!({"count": 1, "items": [1, 2]}));
        interp.run(&program).unwrap();

        let writes: Vec<_> = interp.state_writes().iter().cloned().collect();
        assert_eq!(writes, vec!["count".to_string(), "items".to_string()]);
        assert_eq!(
            interp.global(STATE).and_then(|s| s.to_json()),
            Some(json!({"count": 2, "items": [1, 2, 3]}))
        );
    }

    #[test]
    fn const_bindings_cannot_be_reassigned() {
        let program = parse_program("const a = 1; a = 2").unwrap();
        assert_eq!(
            with_state(json!({})).run(&program).unwrap_err(),
            ExprError::ConstAssignment("a".into())
        );
    }

    #[test]
    fn setting_through_undefined_fails() {
        let program = parse_program("state.a.b = 1").unwrap();
        assert!(matches!(
            with_state(json!({})).run(&program),
            Err(ExprError::CannotSetProperty { .. })
        ));
    }

    #[test]
    fn array_writes_past_the_end_are_bounded() {
        let program = parse_program("let a = [1]; a[2] = 3; return a").unwrap();
        assert_eq!(
            with_state(json!({})).run(&program).unwrap().to_json(),
            Some(json!([1, null, 3]))
        );

        for index in ["4000000000", "18446744073709551615"] {
            let program = parse_program(&format!("let a = []; a['{index}'] = 1")).unwrap();
            assert!(matches!(
                with_state(json!({})).run(&program),
                Err(ExprError::CannotSetProperty { .. })
            ));
        }
    }

    #[test]
    fn runaway_recursion_is_stopped() {
        let program = parse_program("const f = n => f(n + 1); return f(0)").unwrap();
        assert_eq!(
            with_state(json!({})).run(&program).unwrap_err(),
            ExprError::StackOverflow
        );
    }

    #[test]
    fn block_scopes_shadow_outer_bindings() {
        let program = parse_program("let a = 1; { let a = 2; } if (a === 1) return 'outer'").unwrap();
        let result = with_state(json!({})).run(&program).unwrap();
        assert_eq!(result.to_json(), Some(json!("outer")));
    }
}
