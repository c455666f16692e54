//! Runtime values of the snippet language

use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use super::ScriptError;
use crate::sandbox::protocol::{SafeValue, MAX_DEPTH};

#[derive(Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    List(Rc<RefCell<Vec<Value>>>),
    Tuple(Rc<Vec<Value>>),
    Dict(Rc<RefCell<Dict>>),
    Func(Func),
}

/// Something callable. Snippets cannot define functions, so these are all
/// provided by the interpreter.
#[derive(Clone)]
pub enum Func {
    Builtin(&'static str),
    Tool(&'static str),
    Method { receiver: Box<Value>, name: Rc<str> },
}

/// Insertion-ordered mapping. Keys are compared with snippet equality, so
/// `1` and `1.0` are the same key.
#[derive(Clone, Default)]
pub struct Dict {
    entries: Vec<(Value, Value)>,
}

impl Dict {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn position(&self, key: &Value) -> Option<usize> {
        self.entries.iter().position(|(k, _)| k.py_eq(key))
    }

    pub fn get(&self, key: &Value) -> Option<Value> {
        self.position(key).map(|i| self.entries[i].1.clone())
    }

    pub fn contains_key(&self, key: &Value) -> bool {
        self.position(key).is_some()
    }

    pub fn insert(&mut self, key: Value, value: Value) -> Result<(), ScriptError> {
        if !key.is_hashable() {
            return Err(ScriptError::type_error(format!(
                "unhashable type: '{}'",
                key.type_name()
            )));
        }
        match self.position(&key) {
            Some(i) => self.entries[i].1 = value,
            None => self.entries.push((key, value)),
        }
        Ok(())
    }

    pub fn remove(&mut self, key: &Value) -> Option<Value> {
        self.position(key).map(|i| self.entries.remove(i).1)
    }

    pub fn keys(&self) -> Vec<Value> {
        self.entries.iter().map(|(k, _)| k.clone()).collect()
    }

    pub fn values(&self) -> Vec<Value> {
        self.entries.iter().map(|(_, v)| v.clone()).collect()
    }

    pub fn items(&self) -> Vec<Value> {
        self.entries
            .iter()
            .map(|(k, v)| Value::tuple(vec![k.clone(), v.clone()]))
            .collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Guards recursive walks over possibly cyclic containers.
struct Visiting(Vec<usize>);

impl Visiting {
    fn enter(&mut self, ptr: usize) -> bool {
        if self.0.contains(&ptr) {
            return false;
        }
        self.0.push(ptr);
        true
    }

    fn leave(&mut self) {
        self.0.pop();
    }
}

impl Value {
    pub fn str(s: impl AsRef<str>) -> Self {
        Value::Str(Rc::from(s.as_ref()))
    }

    pub fn list(items: Vec<Value>) -> Self {
        Value::List(Rc::new(RefCell::new(items)))
    }

    pub fn tuple(items: Vec<Value>) -> Self {
        Value::Tuple(Rc::new(items))
    }

    pub fn dict(dict: Dict) -> Self {
        Value::Dict(Rc::new(RefCell::new(dict)))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "NoneType",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Tuple(_) => "tuple",
            Value::Dict(_) => "dict",
            Value::Func(Func::Method { .. }) => "method",
            Value::Func(_) => "builtin_function",
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(items) => !items.borrow().is_empty(),
            Value::Tuple(items) => !items.is_empty(),
            Value::Dict(d) => !d.borrow().is_empty(),
            Value::Func(_) => true,
        }
    }

    pub fn is_hashable(&self) -> bool {
        match self {
            Value::None | Value::Bool(_) | Value::Int(_) | Value::Float(_) | Value::Str(_) => true,
            Value::Tuple(items) => items.iter().all(Value::is_hashable),
            _ => false,
        }
    }

    /// Numeric view used by arithmetic; bools count as ints.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Bool(b) => Some(*b as i64),
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// `str(value)`: strings print without quotes, everything else as repr.
    pub fn to_display(&self) -> String {
        match self {
            Value::Str(s) => s.to_string(),
            other => other.repr(),
        }
    }

    pub fn repr(&self) -> String {
        let mut out = String::new();
        self.write_repr(&mut out, &mut Visiting(Vec::new()));
        out
    }

    fn write_repr(&self, out: &mut String, visiting: &mut Visiting) {
        match self {
            Value::None => out.push_str("None"),
            Value::Bool(true) => out.push_str("True"),
            Value::Bool(false) => out.push_str("False"),
            Value::Int(i) => out.push_str(&i.to_string()),
            Value::Float(f) => out.push_str(&format_float(*f)),
            Value::Str(s) => out.push_str(&quote(s)),
            Value::List(items) => {
                if !visiting.enter(Rc::as_ptr(items) as *const () as usize) {
                    out.push_str("[...]");
                    return;
                }
                out.push('[');
                for (i, item) in items.borrow().iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    item.write_repr(out, visiting);
                }
                out.push(']');
                visiting.leave();
            }
            Value::Tuple(items) => {
                out.push('(');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    item.write_repr(out, visiting);
                }
                if items.len() == 1 {
                    out.push(',');
                }
                out.push(')');
            }
            Value::Dict(dict) => {
                if !visiting.enter(Rc::as_ptr(dict) as *const () as usize) {
                    out.push_str("{...}");
                    return;
                }
                out.push('{');
                for (i, (k, v)) in dict.borrow().entries.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    k.write_repr(out, visiting);
                    out.push_str(": ");
                    v.write_repr(out, visiting);
                }
                out.push('}');
                visiting.leave();
            }
            Value::Func(Func::Builtin(name)) | Value::Func(Func::Tool(name)) => {
                out.push_str(&format!("<built-in function {}>", name))
            }
            Value::Func(Func::Method { receiver, name }) => out.push_str(&format!(
                "<built-in method {} of {} object>",
                name,
                receiver.type_name()
            )),
        }
    }

    /// Snippet `==`.
    pub fn py_eq(&self, other: &Value) -> bool {
        self.eq_depth(other, 0)
    }

    fn eq_depth(&self, other: &Value, depth: usize) -> bool {
        if depth > MAX_DEPTH * 4 {
            return false;
        }
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => {
                if Rc::ptr_eq(a, b) {
                    return true;
                }
                let (a, b) = (a.borrow(), b.borrow());
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.eq_depth(y, depth + 1))
            }
            (Value::Tuple(a), Value::Tuple(b)) => {
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.eq_depth(y, depth + 1))
            }
            (Value::Dict(a), Value::Dict(b)) => {
                if Rc::ptr_eq(a, b) {
                    return true;
                }
                let (a, b) = (a.borrow(), b.borrow());
                a.len() == b.len()
                    && a.entries.iter().all(|(k, v)| {
                        b.get(k).map(|bv| v.eq_depth(&bv, depth + 1)).unwrap_or(false)
                    })
            }
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (a, b) => match (a.as_number(), b.as_number()) {
                (Some(x), Some(y)) => x == y,
                _ => false,
            },
        }
    }

    /// Ordering for `<`, `sorted`, `min` and `max`.
    pub fn compare(&self, other: &Value) -> Result<Ordering, ScriptError> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Ok(a.cmp(b)),
            (Value::Str(a), Value::Str(b)) => Ok(a.cmp(b)),
            (Value::List(a), Value::List(b)) => {
                let (a, b) = (a.borrow().clone(), b.borrow().clone());
                compare_seq(&a, &b)
            }
            (Value::Tuple(a), Value::Tuple(b)) => compare_seq(a, b),
            (a, b) => match (a.as_number(), b.as_number()) {
                (Some(x), Some(y)) => x
                    .partial_cmp(&y)
                    .ok_or_else(|| ScriptError::value_error("cannot order NaN")),
                _ => Err(ScriptError::type_error(format!(
                    "'<' not supported between instances of '{}' and '{}'",
                    a.type_name(),
                    b.type_name()
                ))),
            },
        }
    }

    /// Items visited by `for`, `list()`, comprehensions and friends.
    pub fn iterate(&self) -> Result<Vec<Value>, ScriptError> {
        match self {
            Value::List(items) => Ok(items.borrow().clone()),
            Value::Tuple(items) => Ok(items.as_ref().clone()),
            Value::Str(s) => Ok(s.chars().map(|c| Value::str(c.to_string())).collect()),
            Value::Dict(d) => Ok(d.borrow().keys()),
            other => Err(ScriptError::type_error(format!(
                "'{}' object is not iterable",
                other.type_name()
            ))),
        }
    }

    /// Convert to the boundary schema. Errors describe why the value cannot cross.
    pub fn to_safe(&self) -> Result<SafeValue, String> {
        self.safe_at(0, &mut Visiting(Vec::new()))
    }

    fn safe_at(&self, depth: usize, visiting: &mut Visiting) -> Result<SafeValue, String> {
        if depth > MAX_DEPTH {
            return Err(format!("value nested deeper than {} levels", MAX_DEPTH));
        }
        match self {
            Value::None => Ok(SafeValue::Null),
            Value::Bool(b) => Ok(SafeValue::Bool(*b)),
            Value::Int(i) => Ok(SafeValue::Int(*i)),
            Value::Float(f) if f.is_finite() => Ok(SafeValue::Float(*f)),
            Value::Float(f) => Err(format!("float {} is not finite", format_float(*f))),
            Value::Str(s) => Ok(SafeValue::Str(s.to_string())),
            Value::List(items) => {
                if !visiting.enter(Rc::as_ptr(items) as *const () as usize) {
                    return Err("list contains itself".to_string());
                }
                let converted = items
                    .borrow()
                    .iter()
                    .map(|v| v.safe_at(depth + 1, visiting))
                    .collect::<Result<Vec<_>, _>>()?;
                visiting.leave();
                Ok(SafeValue::List(converted))
            }
            Value::Tuple(items) => Ok(SafeValue::List(
                items
                    .iter()
                    .map(|v| v.safe_at(depth + 1, visiting))
                    .collect::<Result<Vec<_>, _>>()?,
            )),
            Value::Dict(dict) => {
                if !visiting.enter(Rc::as_ptr(dict) as *const () as usize) {
                    return Err("dict contains itself".to_string());
                }
                let mut map = BTreeMap::new();
                for (k, v) in dict.borrow().entries.iter() {
                    let Value::Str(key) = k else {
                        return Err(format!("dict key {} is not a string", k.repr()));
                    };
                    map.insert(key.to_string(), v.safe_at(depth + 1, visiting)?);
                }
                visiting.leave();
                Ok(SafeValue::Map(map))
            }
            Value::Func(_) => Err(format!("{} cannot leave the sandbox", self.repr())),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.repr())
    }
}

fn compare_seq(a: &[Value], b: &[Value]) -> Result<Ordering, ScriptError> {
    for (x, y) in a.iter().zip(b.iter()) {
        if !x.py_eq(y) {
            return x.compare(y);
        }
    }
    Ok(a.len().cmp(&b.len()))
}

pub fn format_float(f: f64) -> String {
    if f.is_nan() {
        "nan".to_string()
    } else if f.is_infinite() {
        if f > 0.0 { "inf".to_string() } else { "-inf".to_string() }
    } else if f.fract() == 0.0 && f.abs() < 1e16 {
        format!("{:.1}", f)
    } else {
        format!("{}", f)
    }
}

fn quote(s: &str) -> String {
    let q = if s.contains('\'') && !s.contains('"') { '"' } else { '\'' };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(q);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c if c == q => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out.push(q);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repr() {
        let v = Value::list(vec![
            Value::Int(1),
            Value::Float(2.0),
            Value::str("it's"),
            Value::None,
            Value::tuple(vec![Value::Bool(true)]),
        ]);
        assert_eq!(v.repr(), r#"[1, 2.0, "it's", None, (True,)]"#);
        assert_eq!(Value::str("a\nb").repr(), r"'a\nb'");
        assert_eq!(Value::str("plain").to_display(), "plain");
    }

    #[test]
    fn test_numeric_equality_across_types() {
        assert!(Value::Int(1).py_eq(&Value::Float(1.0)));
        assert!(Value::Bool(true).py_eq(&Value::Int(1)));
        assert!(!Value::str("1").py_eq(&Value::Int(1)));
    }

    #[test]
    fn test_dict_keys_and_order() {
        let mut d = Dict::new();
        d.insert(Value::str("b"), Value::Int(1)).unwrap();
        d.insert(Value::str("a"), Value::Int(2)).unwrap();
        d.insert(Value::str("b"), Value::Int(3)).unwrap();
        assert_eq!(d.len(), 2);
        assert_eq!(Value::dict(d).repr(), "{'b': 3, 'a': 2}");

        let mut d = Dict::new();
        assert!(d.insert(Value::list(vec![]), Value::None).is_err());
    }

    #[test]
    fn test_to_safe() {
        let mut d = Dict::new();
        d.insert(Value::str("n"), Value::tuple(vec![Value::Int(1), Value::Float(0.5)]))
            .unwrap();
        let mut expected = BTreeMap::new();
        expected.insert(
            "n".to_string(),
            SafeValue::List(vec![SafeValue::Int(1), SafeValue::Float(0.5)]),
        );
        assert_eq!(Value::dict(d).to_safe().unwrap(), SafeValue::Map(expected));
    }

    #[test]
    fn test_to_safe_rejections() {
        assert!(Value::Float(f64::NAN).to_safe().is_err());
        assert!(Value::Func(Func::Builtin("len")).to_safe().is_err());

        let mut d = Dict::new();
        d.insert(Value::Int(1), Value::None).unwrap();
        assert!(Value::dict(d).to_safe().unwrap_err().contains("not a string"));

        let cyclic = Value::list(vec![]);
        if let Value::List(items) = &cyclic {
            items.borrow_mut().push(cyclic.clone());
        }
        assert!(cyclic.to_safe().unwrap_err().contains("itself"));
        assert_eq!(cyclic.repr(), "[[...]]");
    }

    #[test]
    fn test_to_safe_depth() {
        let mut v = Value::None;
        for _ in 0..=MAX_DEPTH + 1 {
            v = Value::list(vec![v]);
        }
        assert!(v.to_safe().unwrap_err().contains("deeper"));
    }

    #[test]
    fn test_compare() {
        assert_eq!(Value::Int(1).compare(&Value::Float(1.5)).unwrap(), Ordering::Less);
        assert_eq!(Value::str("b").compare(&Value::str("a")).unwrap(), Ordering::Greater);
        assert!(Value::str("a").compare(&Value::Int(1)).is_err());
    }

    #[test]
    fn test_format_float() {
        assert_eq!(format_float(3.0), "3.0");
        assert_eq!(format_float(0.25), "0.25");
        assert_eq!(format_float(f64::INFINITY), "inf");
    }
}
