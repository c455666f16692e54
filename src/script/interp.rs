//! Tree-walking interpreter
//!
//! Runs a parsed [`Program`] against one [`ToolApi`]. Everything a snippet
//! can reach is resolved here: its own variables, the builtins, and the tool
//! functions. Any other name is either a denied capability or a `NameError`.

use std::collections::HashMap;
use std::fmt;

use super::ast::*;
use super::builtins;
use super::value::{Dict, Func, Value};
use super::ScriptError;
use crate::sandbox::policy::{Capability, CapabilityPolicy};
use crate::tools::{ToolApi, ToolError};

/// Receives `print` output as it happens.
pub trait OutputSink {
    fn write(&mut self, text: &str);
}

impl OutputSink for String {
    fn write(&mut self, text: &str) {
        self.push_str(text);
    }
}

/// Why a snippet stopped early.
#[derive(Debug, Clone, PartialEq)]
pub enum Fault {
    /// The snippet's own mistake (NameError, TypeError, ...)
    Script(ScriptError),
    /// A Tool API operation failed
    Tool(ToolError),
    /// The snippet reached for a denied capability
    Denied {
        capability: Capability,
        identifier: String,
    },
}

impl Fault {
    fn at_line(self, line: usize) -> Self {
        match self {
            Fault::Script(e) => Fault::Script(e.at_line(line)),
            other => other,
        }
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fault::Script(e) => write!(f, "{}", e),
            Fault::Tool(e) => write!(f, "{}", e),
            Fault::Denied { capability, identifier } => {
                write!(f, "capability '{}' denied ({})", capability, identifier)
            }
        }
    }
}

impl From<ScriptError> for Fault {
    fn from(e: ScriptError) -> Self {
        Fault::Script(e)
    }
}

impl From<ToolError> for Fault {
    fn from(e: ToolError) -> Self {
        Fault::Tool(e)
    }
}

enum Flow {
    Normal,
    Break,
    Continue,
}

/// Upper bound on elements (or characters) a single operation may produce.
pub(crate) const MAX_SEQUENCE: usize = 10_000_000;

pub struct Interpreter<'a> {
    pub(super) tools: &'a ToolApi,
    pub(super) policy: &'a CapabilityPolicy,
    pub(super) out: &'a mut dyn OutputSink,
    globals: HashMap<String, Value>,
    loop_depth: usize,
}

impl<'a> Interpreter<'a> {
    pub fn new(
        tools: &'a ToolApi,
        policy: &'a CapabilityPolicy,
        out: &'a mut dyn OutputSink,
    ) -> Self {
        Self {
            tools,
            policy,
            out,
            globals: HashMap::new(),
            loop_depth: 0,
        }
    }

    pub fn run(&mut self, program: &Program) -> Result<(), Fault> {
        self.exec_block(&program.body).map(|_| ())
    }

    /// A variable the snippet assigned, if any.
    pub fn global(&self, name: &str) -> Option<&Value> {
        self.globals.get(name)
    }

    // ── statements ──────────────────────────────────────────────────────────

    fn exec_block(&mut self, body: &[Stmt]) -> Result<Flow, Fault> {
        for stmt in body {
            match self.exec_stmt(stmt).map_err(|f| f.at_line(stmt.line))? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_stmt(&mut self, stmt: &Stmt) -> Result<Flow, Fault> {
        match &stmt.kind {
            StmtKind::Expr(expr) => {
                self.eval(expr)?;
            }
            StmtKind::Assign { targets, value } => {
                let value = self.eval(value)?;
                for target in targets {
                    self.assign(target, value.clone())?;
                }
            }
            StmtKind::AugAssign { target, op, value } => self.aug_assign(target, *op, value)?,
            StmtKind::If { branches, orelse } => {
                for (cond, block) in branches {
                    if self.eval(cond)?.truthy() {
                        return self.exec_block(block);
                    }
                }
                return self.exec_block(orelse);
            }
            StmtKind::For { target, iter, body } => {
                let items = self.eval(iter)?.iterate()?;
                self.loop_depth += 1;
                for item in items {
                    self.assign(target, item)?;
                    if let Flow::Break = self.exec_block(body)? {
                        break;
                    }
                }
                self.loop_depth -= 1;
            }
            StmtKind::While { cond, body } => {
                self.loop_depth += 1;
                while self.eval(cond)?.truthy() {
                    if let Flow::Break = self.exec_block(body)? {
                        break;
                    }
                }
                self.loop_depth -= 1;
            }
            StmtKind::Break | StmtKind::Continue if self.loop_depth == 0 => {
                return Err(ScriptError::syntax("'break' or 'continue' outside loop", stmt.line).into());
            }
            StmtKind::Break => return Ok(Flow::Break),
            StmtKind::Continue => return Ok(Flow::Continue),
            StmtKind::Pass => {}
            StmtKind::Import { module } => {
                if self.policy.is_denied(Capability::ModuleImport) {
                    return Err(Fault::Denied {
                        capability: Capability::ModuleImport,
                        identifier: module.clone(),
                    });
                }
                if let Some(capability) = self.policy.check(module) {
                    return Err(Fault::Denied { capability, identifier: module.clone() });
                }
                return Err(ScriptError::new(
                    "ImportError",
                    format!("No module named '{}' (snippets cannot import modules)", module),
                )
                .into());
            }
        }
        Ok(Flow::Normal)
    }

    fn assign(&mut self, target: &Target, value: Value) -> Result<(), Fault> {
        match target {
            Target::Name(name) => {
                self.globals.insert(name.clone(), value);
            }
            Target::Index { obj, index } => {
                let obj = self.eval(obj)?;
                let index = self.eval(index)?;
                set_item(&obj, index, value)?;
            }
            Target::Tuple(targets) => {
                let items = value.iterate()?;
                if items.len() < targets.len() {
                    return Err(ScriptError::value_error(format!(
                        "not enough values to unpack (expected {}, got {})",
                        targets.len(),
                        items.len()
                    ))
                    .into());
                }
                if items.len() > targets.len() {
                    return Err(ScriptError::value_error(format!(
                        "too many values to unpack (expected {})",
                        targets.len()
                    ))
                    .into());
                }
                for (target, item) in targets.iter().zip(items) {
                    self.assign(target, item)?;
                }
            }
        }
        Ok(())
    }

    fn aug_assign(&mut self, target: &Target, op: BinOp, value: &Expr) -> Result<(), Fault> {
        match target {
            Target::Name(name) => {
                let current = self.lookup(name)?;
                let rhs = self.eval(value)?;
                let updated = builtins::inplace_op(op, &current, &rhs)?;
                self.globals.insert(name.clone(), updated);
            }
            Target::Index { obj, index } => {
                let obj = self.eval(obj)?;
                let index = self.eval(index)?;
                let current = get_item(&obj, &index)?;
                let rhs = self.eval(value)?;
                let updated = builtins::inplace_op(op, &current, &rhs)?;
                set_item(&obj, index, updated)?;
            }
            Target::Tuple(_) => {
                return Err(ScriptError::syntax("illegal expression for augmented assignment", 0).into())
            }
        }
        Ok(())
    }

    fn lookup(&self, name: &str) -> Result<Value, Fault> {
        if let Some(value) = self.globals.get(name) {
            return Ok(value.clone());
        }
        if let Some(builtin) = builtins::builtin_name(name) {
            return Ok(Value::Func(Func::Builtin(builtin)));
        }
        if let Some(tool) = builtins::tool_name(name) {
            return Ok(Value::Func(Func::Tool(tool)));
        }
        if let Some(capability) = self.policy.check(name) {
            return Err(Fault::Denied { capability, identifier: name.to_string() });
        }
        Err(ScriptError::name_error(name).into())
    }

    // ── expressions ─────────────────────────────────────────────────────────

    pub(super) fn eval(&mut self, expr: &Expr) -> Result<Value, Fault> {
        let value = match expr {
            Expr::None => Value::None,
            Expr::Bool(b) => Value::Bool(*b),
            Expr::Int(i) => Value::Int(*i),
            Expr::Float(f) => Value::Float(*f),
            Expr::Str(s) => Value::str(s),
            Expr::FString(parts) => {
                let mut out = String::new();
                for part in parts {
                    match part {
                        FPart::Lit(text) => out.push_str(text),
                        FPart::Field { expr, spec } => {
                            let value = self.eval(expr)?;
                            out.push_str(&builtins::format_field(&value, spec.as_deref())?);
                        }
                    }
                }
                Value::str(out)
            }
            Expr::Name(name) => self.lookup(name)?,
            Expr::List(items) => Value::list(self.eval_all(items)?),
            Expr::Tuple(items) => Value::tuple(self.eval_all(items)?),
            Expr::Dict(pairs) => {
                let mut dict = Dict::new();
                for (k, v) in pairs {
                    let key = self.eval(k)?;
                    let value = self.eval(v)?;
                    dict.insert(key, value)?;
                }
                Value::dict(dict)
            }
            Expr::ListComp { elt, generator } => self.list_comp(elt, generator)?,
            Expr::Unary { op, operand } => {
                let operand = self.eval(operand)?;
                builtins::unary_op(*op, &operand)?
            }
            Expr::Binary { op, left, right } => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                builtins::binary_op(*op, &left, &right)?
            }
            Expr::BoolOp { op, left, right } => {
                let left = self.eval(left)?;
                match (op, left.truthy()) {
                    (BoolOp::And, false) | (BoolOp::Or, true) => left,
                    _ => self.eval(right)?,
                }
            }
            Expr::Compare { left, rest } => {
                let mut lhs = self.eval(left)?;
                for (op, rhs) in rest {
                    let rhs = self.eval(rhs)?;
                    if !compare(*op, &lhs, &rhs)? {
                        return Ok(Value::Bool(false));
                    }
                    lhs = rhs;
                }
                Value::Bool(true)
            }
            Expr::IfExp { cond, then, orelse } => {
                if self.eval(cond)?.truthy() {
                    self.eval(then)?
                } else {
                    self.eval(orelse)?
                }
            }
            Expr::Index { obj, index } => {
                let obj = self.eval(obj)?;
                let index = self.eval(index)?;
                get_item(&obj, &index)?
            }
            Expr::Slice { obj, lower, upper, step } => {
                let obj = self.eval(obj)?;
                let lower = self.slice_bound(lower.as_deref())?;
                let upper = self.slice_bound(upper.as_deref())?;
                let step = self.slice_bound(step.as_deref())?;
                builtins::slice(&obj, lower, upper, step)?
            }
            Expr::Attr { obj, name } => {
                if name.starts_with("__") {
                    if let Some(capability) = self.policy.check(name) {
                        return Err(Fault::Denied { capability, identifier: name.clone() });
                    }
                }
                let obj = self.eval(obj)?;
                if !builtins::has_method(&obj, name) {
                    return Err(ScriptError::attribute_error(obj.type_name(), name).into());
                }
                Value::Func(Func::Method {
                    receiver: Box::new(obj),
                    name: name.as_str().into(),
                })
            }
            Expr::Call { func, args, kwargs } => {
                let func = self.eval(func)?;
                let args = self.eval_all(args)?;
                let kwargs = kwargs
                    .iter()
                    .map(|(k, e)| Ok((k.clone(), self.eval(e)?)))
                    .collect::<Result<Vec<_>, Fault>>()?;
                self.call_value(&func, args, kwargs)?
            }
        };
        Ok(value)
    }

    fn eval_all(&mut self, exprs: &[Expr]) -> Result<Vec<Value>, Fault> {
        exprs.iter().map(|e| self.eval(e)).collect()
    }

    fn slice_bound(&mut self, expr: Option<&Expr>) -> Result<Option<i64>, Fault> {
        let Some(expr) = expr else { return Ok(None) };
        match self.eval(expr)? {
            Value::None => Ok(None),
            v => v.as_int().map(Some).ok_or_else(|| {
                ScriptError::type_error("slice indices must be integers or None").into()
            }),
        }
    }

    pub(super) fn call_value(
        &mut self,
        func: &Value,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Result<Value, Fault> {
        match func {
            Value::Func(f) => builtins::call(self, f, args, kwargs),
            other => Err(ScriptError::type_error(format!(
                "'{}' object is not callable",
                other.type_name()
            ))
            .into()),
        }
    }

    /// Comprehension variables do not leak into the enclosing scope.
    fn list_comp(&mut self, elt: &Expr, generator: &Comprehension) -> Result<Value, Fault> {
        let items = self.eval(&generator.iter)?.iterate()?;

        let mut names = Vec::new();
        target_names(&generator.target, &mut names);
        let saved: Vec<(String, Option<Value>)> = names
            .into_iter()
            .map(|n| {
                let prev = self.globals.get(&n).cloned();
                (n, prev)
            })
            .collect();

        let mut out = Vec::new();
        'items: for item in items {
            self.assign(&generator.target, item)?;
            for cond in &generator.conds {
                if !self.eval(cond)?.truthy() {
                    continue 'items;
                }
            }
            out.push(self.eval(elt)?);
        }

        for (name, prev) in saved {
            match prev {
                Some(v) => self.globals.insert(name, v),
                None => self.globals.remove(&name),
            };
        }
        Ok(Value::list(out))
    }
}

fn target_names(target: &Target, names: &mut Vec<String>) {
    match target {
        Target::Name(n) => names.push(n.clone()),
        Target::Tuple(items) => items.iter().for_each(|t| target_names(t, names)),
        Target::Index { .. } => {}
    }
}

fn compare(op: CmpOp, lhs: &Value, rhs: &Value) -> Result<bool, ScriptError> {
    use std::cmp::Ordering::*;
    Ok(match op {
        CmpOp::Eq => lhs.py_eq(rhs),
        CmpOp::NotEq => !lhs.py_eq(rhs),
        CmpOp::Lt => lhs.compare(rhs)? == Less,
        CmpOp::LtE => lhs.compare(rhs)? != Greater,
        CmpOp::Gt => lhs.compare(rhs)? == Greater,
        CmpOp::GtE => lhs.compare(rhs)? != Less,
        CmpOp::In => builtins::contains(rhs, lhs)?,
        CmpOp::NotIn => !builtins::contains(rhs, lhs)?,
        CmpOp::Is => identical(lhs, rhs),
        CmpOp::IsNot => !identical(lhs, rhs),
    })
}

fn identical(a: &Value, b: &Value) -> bool {
    use std::rc::Rc;
    match (a, b) {
        (Value::None, Value::None) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Int(x), Value::Int(y)) => x == y,
        (Value::Str(x), Value::Str(y)) => Rc::ptr_eq(x, y) || x == y,
        (Value::List(x), Value::List(y)) => Rc::ptr_eq(x, y),
        (Value::Tuple(x), Value::Tuple(y)) => Rc::ptr_eq(x, y),
        (Value::Dict(x), Value::Dict(y)) => Rc::ptr_eq(x, y),
        _ => false,
    }
}

/// Resolve a possibly negative index against `len`.
pub(super) fn normalize_index(index: i64, len: usize) -> Option<usize> {
    let len = len as i64;
    let resolved = if index < 0 { index + len } else { index };
    (0..len).contains(&resolved).then_some(resolved as usize)
}

fn get_item(obj: &Value, index: &Value) -> Result<Value, ScriptError> {
    let seq_index = |len: usize, what: &str| -> Result<usize, ScriptError> {
        let i = index.as_int().ok_or_else(|| {
            ScriptError::type_error(format!(
                "{} indices must be integers or slices, not {}",
                what,
                index.type_name()
            ))
        })?;
        normalize_index(i, len)
            .ok_or_else(|| ScriptError::index_error(format!("{} index out of range", what)))
    };

    match obj {
        Value::List(items) => {
            let items = items.borrow();
            Ok(items[seq_index(items.len(), "list")?].clone())
        }
        Value::Tuple(items) => Ok(items[seq_index(items.len(), "tuple")?].clone()),
        Value::Str(s) => {
            let count = s.chars().count();
            let i = seq_index(count, "string")?;
            Ok(Value::str(s.chars().nth(i).map(String::from).unwrap_or_default()))
        }
        Value::Dict(dict) => dict
            .borrow()
            .get(index)
            .ok_or_else(|| ScriptError::key_error(index.repr())),
        other => Err(ScriptError::type_error(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

fn set_item(obj: &Value, index: Value, value: Value) -> Result<(), ScriptError> {
    match obj {
        Value::List(items) => {
            let mut items = items.borrow_mut();
            let i = index.as_int().ok_or_else(|| {
                ScriptError::type_error(format!(
                    "list indices must be integers or slices, not {}",
                    index.type_name()
                ))
            })?;
            let slot = normalize_index(i, items.len())
                .ok_or_else(|| ScriptError::index_error("list assignment index out of range"))?;
            items[slot] = value;
            Ok(())
        }
        Value::Dict(dict) => dict.borrow_mut().insert(index, value),
        other => Err(ScriptError::type_error(format!(
            "'{}' object does not support item assignment",
            other.type_name()
        ))),
    }
}
