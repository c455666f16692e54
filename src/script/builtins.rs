//! Builtin functions, tool bindings, methods and operators

use std::cmp::Ordering;

use super::ast::{BinOp, UnaryOp};
use super::interp::{normalize_index, Fault, Interpreter, MAX_SEQUENCE};
use super::value::{format_float, Dict, Func, Value};
use super::ScriptError;

const BUILTINS: &[&str] = &[
    "print", "len", "str", "int", "float", "bool", "list", "dict", "range", "sorted", "reversed",
    "min", "max", "sum", "abs", "round", "enumerate", "zip",
];

/// Tool functions: name, parameter names, number of required parameters.
const TOOLS: &[(&str, &[&str], usize)] = &[
    ("list_files", &["path"], 0),
    ("read_file", &["file_path"], 1),
    ("create_file", &["file_path", "content"], 1),
    ("create_dir", &["dir_path"], 1),
    ("update_file", &["file_path", "old_content", "new_content"], 3),
    ("delete_file", &["file_path"], 1),
    ("check_if_file_exists", &["file_path"], 1),
    ("check_if_dir_exists", &["dir_path"], 1),
    ("exists", &["path"], 1),
    ("go_to_link", &["link_string"], 1),
    ("get_size", &["file_or_dir_path"], 0),
];

const STR_METHODS: &[&str] = &[
    "upper", "lower", "strip", "lstrip", "rstrip", "split", "splitlines", "join", "replace",
    "startswith", "endswith", "find", "rfind", "index", "count", "format", "title", "capitalize",
    "isdigit", "isalpha", "isalnum", "isspace", "islower", "isupper", "partition",
];
const LIST_METHODS: &[&str] = &[
    "append", "extend", "insert", "pop", "remove", "index", "count", "sort", "reverse", "clear",
    "copy",
];
const DICT_METHODS: &[&str] = &[
    "get", "keys", "values", "items", "pop", "setdefault", "update", "clear", "copy",
];
const TUPLE_METHODS: &[&str] = &["index", "count"];

pub(super) fn builtin_name(name: &str) -> Option<&'static str> {
    BUILTINS.iter().copied().find(|b| *b == name)
}

pub(super) fn tool_name(name: &str) -> Option<&'static str> {
    TOOLS.iter().map(|(n, _, _)| *n).find(|n| *n == name)
}

pub(super) fn has_method(value: &Value, name: &str) -> bool {
    let table = match value {
        Value::Str(_) => STR_METHODS,
        Value::List(_) => LIST_METHODS,
        Value::Dict(_) => DICT_METHODS,
        Value::Tuple(_) => TUPLE_METHODS,
        _ => return false,
    };
    table.contains(&name)
}

type Kwargs = Vec<(String, Value)>;

/// Match positional and keyword arguments against parameter names.
fn bind(
    func: &str,
    params: &[&str],
    required: usize,
    args: Vec<Value>,
    kwargs: Kwargs,
) -> Result<Vec<Option<Value>>, ScriptError> {
    if args.len() > params.len() {
        return Err(ScriptError::type_error(format!(
            "{}() takes at most {} argument{} ({} given)",
            func,
            params.len(),
            if params.len() == 1 { "" } else { "s" },
            args.len()
        )));
    }
    let mut slots: Vec<Option<Value>> = args.into_iter().map(Some).collect();
    slots.resize(params.len(), None);

    for (key, value) in kwargs {
        let Some(i) = params.iter().position(|p| *p == key) else {
            return Err(ScriptError::type_error(format!(
                "{}() got an unexpected keyword argument '{}'",
                func, key
            )));
        };
        if slots[i].is_some() {
            return Err(ScriptError::type_error(format!(
                "{}() got multiple values for argument '{}'",
                func, key
            )));
        }
        slots[i] = Some(value);
    }

    if let Some(missing) = (0..required).find(|&i| slots[i].is_none()) {
        return Err(ScriptError::type_error(format!(
            "{}() missing required argument '{}'",
            func, params[missing]
        )));
    }
    Ok(slots)
}

fn str_arg(func: &str, param: &str, value: &Value) -> Result<String, ScriptError> {
    match value {
        Value::Str(s) => Ok(s.to_string()),
        other => Err(ScriptError::type_error(format!(
            "{}() argument '{}' must be str, not {}",
            func,
            param,
            other.type_name()
        ))),
    }
}

fn int_arg(func: &str, value: &Value) -> Result<i64, ScriptError> {
    value.as_int().ok_or_else(|| {
        ScriptError::type_error(format!(
            "{}() expected an integer, got {}",
            func,
            value.type_name()
        ))
    })
}

fn no_kwargs(func: &str, kwargs: &Kwargs) -> Result<(), ScriptError> {
    match kwargs.first() {
        Some((key, _)) => Err(ScriptError::type_error(format!(
            "{}() got an unexpected keyword argument '{}'",
            func, key
        ))),
        None => Ok(()),
    }
}

fn memory_error() -> ScriptError {
    ScriptError::new("MemoryError", format!("result would exceed {} elements", MAX_SEQUENCE))
}

pub(super) fn call(
    interp: &mut Interpreter<'_>,
    func: &Func,
    args: Vec<Value>,
    kwargs: Kwargs,
) -> Result<Value, Fault> {
    match func {
        Func::Builtin(name) => call_builtin(interp, *name, args, kwargs),
        Func::Tool(name) => call_tool(interp, *name, args, kwargs),
        Func::Method { receiver, name } => call_method(interp, receiver, name, args, kwargs),
    }
}

// ── tools ───────────────────────────────────────────────────────────────────

fn call_tool(
    interp: &mut Interpreter<'_>,
    name: &'static str,
    args: Vec<Value>,
    kwargs: Kwargs,
) -> Result<Value, Fault> {
    let Some((_, params, required)) = TOOLS.iter().find(|(n, _, _)| *n == name) else {
        return Err(ScriptError::name_error(name).into());
    };
    let slots = bind(name, params, *required, args, kwargs)?;
    let arg = |i: usize, default: &str| -> Result<String, ScriptError> {
        match &slots[i] {
            Some(v) => str_arg(name, params[i], v),
            None => Ok(default.to_string()),
        }
    };

    let tools = interp.tools;
    let value = match name {
        "list_files" => Value::str(tools.list(&arg(0, ".")?)?),
        "read_file" => Value::str(tools.read(&arg(0, "")?)?),
        "create_file" => Value::Bool(tools.create(&arg(0, "")?, &arg(1, "")?)?),
        "create_dir" => Value::Bool(tools.create_dir(&arg(0, "")?)?),
        "update_file" => Value::Bool(tools.update(&arg(0, "")?, &arg(1, "")?, &arg(2, "")?)?),
        "delete_file" => Value::Bool(tools.delete(&arg(0, "")?)?),
        "check_if_file_exists" => Value::Bool(tools.is_file(&arg(0, "")?)?),
        "check_if_dir_exists" => Value::Bool(tools.is_dir(&arg(0, "")?)?),
        "exists" => Value::Bool(tools.exists(&arg(0, "")?)?),
        "go_to_link" => Value::str(tools.follow_link(&arg(0, "")?)?),
        "get_size" => Value::Int(i64::try_from(tools.size(&arg(0, ".")?)?).unwrap_or(i64::MAX)),
        _ => return Err(ScriptError::name_error(name).into()),
    };
    Ok(value)
}

// ── builtins ────────────────────────────────────────────────────────────────

fn call_builtin(
    interp: &mut Interpreter<'_>,
    name: &'static str,
    args: Vec<Value>,
    kwargs: Kwargs,
) -> Result<Value, Fault> {
    let value = match name {
        "print" => {
            let mut sep = " ".to_string();
            let mut end = "\n".to_string();
            for (key, value) in kwargs {
                let text = match &value {
                    Value::None => None,
                    v => Some(str_arg("print", &key, v)?),
                };
                match key.as_str() {
                    "sep" => sep = text.unwrap_or_else(|| " ".to_string()),
                    "end" => end = text.unwrap_or_else(|| "\n".to_string()),
                    _ => {
                        return Err(ScriptError::type_error(format!(
                            "print() got an unexpected keyword argument '{}'",
                            key
                        ))
                        .into())
                    }
                }
            }
            let mut line = args.iter().map(Value::to_display).collect::<Vec<_>>().join(&sep);
            line.push_str(&end);
            interp.out.write(&line);
            Value::None
        }
        "len" => {
            let [obj] = take::<1>(bind("len", &["obj"], 1, args, kwargs)?);
            let obj = obj.unwrap_or(Value::None);
            let n = match &obj {
                Value::Str(s) => s.chars().count(),
                Value::List(items) => items.borrow().len(),
                Value::Tuple(items) => items.len(),
                Value::Dict(d) => d.borrow().len(),
                other => {
                    return Err(ScriptError::type_error(format!(
                        "object of type '{}' has no len()",
                        other.type_name()
                    ))
                    .into())
                }
            };
            Value::Int(n as i64)
        }
        "str" => {
            let [obj] = take::<1>(bind("str", &["object"], 0, args, kwargs)?);
            Value::str(obj.map(|v| v.to_display()).unwrap_or_default())
        }
        "int" => {
            let [x, base] = take::<2>(bind("int", &["x", "base"], 0, args, kwargs)?);
            let base = base.map(|b| int_arg("int", &b)).transpose()?;
            Value::Int(to_int(x.unwrap_or(Value::Int(0)), base)?)
        }
        "float" => {
            let [x] = take::<1>(bind("float", &["x"], 0, args, kwargs)?);
            Value::Float(to_float(x.unwrap_or(Value::Float(0.0)))?)
        }
        "bool" => {
            let [x] = take::<1>(bind("bool", &["x"], 0, args, kwargs)?);
            Value::Bool(x.map(|v| v.truthy()).unwrap_or(false))
        }
        "list" => {
            let [x] = take::<1>(bind("list", &["iterable"], 0, args, kwargs)?);
            Value::list(x.map(|v| v.iterate()).transpose()?.unwrap_or_default())
        }
        "dict" => {
            if args.len() > 1 {
                return Err(ScriptError::type_error("dict expected at most 1 argument").into());
            }
            let mut dict = Dict::new();
            if let Some(source) = args.into_iter().next() {
                merge_into(&mut dict, &source)?;
            }
            for (k, v) in kwargs {
                dict.insert(Value::str(k), v)?;
            }
            Value::dict(dict)
        }
        "range" => {
            no_kwargs("range", &kwargs)?;
            let ints = args
                .iter()
                .map(|a| int_arg("range", a))
                .collect::<Result<Vec<_>, _>>()?;
            let (start, stop, step) = match ints.as_slice() {
                [stop] => (0, *stop, 1),
                [start, stop] => (*start, *stop, 1),
                [start, stop, step] => (*start, *stop, *step),
                _ => {
                    return Err(ScriptError::type_error(format!(
                        "range expected 1 to 3 arguments, got {}",
                        ints.len()
                    ))
                    .into())
                }
            };
            Value::list(range(start, stop, step)?)
        }
        "sorted" => {
            let [iterable, key, reverse] =
                take::<3>(bind("sorted", &["iterable", "key", "reverse"], 1, args, kwargs)?);
            let items = iterable.unwrap_or(Value::None).iterate()?;
            let reverse = reverse.map(|r| r.truthy()).unwrap_or(false);
            Value::list(sort_values(interp, items, key, reverse)?)
        }
        "reversed" => {
            let [seq] = take::<1>(bind("reversed", &["sequence"], 1, args, kwargs)?);
            let mut items = seq.unwrap_or(Value::None).iterate()?;
            items.reverse();
            Value::list(items)
        }
        "min" | "max" => min_max(interp, name, args, kwargs)?,
        "sum" => {
            let [iterable, start] = take::<2>(bind("sum", &["iterable", "start"], 1, args, kwargs)?);
            let mut total = start.unwrap_or(Value::Int(0));
            if let Value::Str(_) = total {
                return Err(ScriptError::type_error("sum() can't sum strings, use ''.join(seq) instead").into());
            }
            for item in iterable.unwrap_or(Value::None).iterate()? {
                total = binary_op(BinOp::Add, &total, &item)?;
            }
            total
        }
        "abs" => {
            let [x] = take::<1>(bind("abs", &["x"], 1, args, kwargs)?);
            match x.unwrap_or(Value::None) {
                Value::Int(i) => Value::Int(i.checked_abs().ok_or_else(overflow)?),
                Value::Bool(b) => Value::Int(b as i64),
                Value::Float(f) => Value::Float(f.abs()),
                other => {
                    return Err(ScriptError::type_error(format!(
                        "bad operand type for abs(): '{}'",
                        other.type_name()
                    ))
                    .into())
                }
            }
        }
        "round" => {
            let [number, ndigits] = take::<2>(bind("round", &["number", "ndigits"], 1, args, kwargs)?);
            let ndigits = match ndigits {
                None | Some(Value::None) => None,
                Some(n) => Some(int_arg("round", &n)?),
            };
            round(number.unwrap_or(Value::None), ndigits)?
        }
        "enumerate" => {
            let [iterable, start] =
                take::<2>(bind("enumerate", &["iterable", "start"], 1, args, kwargs)?);
            let start = start.map(|s| int_arg("enumerate", &s)).transpose()?.unwrap_or(0);
            let items = iterable.unwrap_or(Value::None).iterate()?;
            Value::list(
                items
                    .into_iter()
                    .enumerate()
                    .map(|(i, v)| Value::tuple(vec![Value::Int(start + i as i64), v]))
                    .collect(),
            )
        }
        "zip" => {
            no_kwargs("zip", &kwargs)?;
            let columns = args.iter().map(|a| a.iterate()).collect::<Result<Vec<_>, _>>()?;
            let len = columns.iter().map(Vec::len).min().unwrap_or(0);
            Value::list(
                (0..len)
                    .map(|i| Value::tuple(columns.iter().map(|c| c[i].clone()).collect()))
                    .collect(),
            )
        }
        _ => return Err(ScriptError::name_error(name).into()),
    };
    Ok(value)
}

/// Unpack bound argument slots into a fixed-size array.
fn take<const N: usize>(slots: Vec<Option<Value>>) -> [Option<Value>; N] {
    let mut iter = slots.into_iter();
    std::array::from_fn(|_| iter.next().flatten())
}

fn overflow() -> ScriptError {
    ScriptError::new("OverflowError", "integer result out of range")
}

fn to_int(x: Value, base: Option<i64>) -> Result<i64, ScriptError> {
    match (x, base) {
        (Value::Str(s), base) => {
            let radix = base.unwrap_or(10);
            if !(2..=36).contains(&radix) {
                return Err(ScriptError::value_error("int() base must be >= 2 and <= 36"));
            }
            let cleaned: String = s.trim().chars().filter(|c| *c != '_').collect();
            i64::from_str_radix(&cleaned, radix as u32).map_err(|_| {
                ScriptError::value_error(format!(
                    "invalid literal for int() with base {}: {}",
                    radix,
                    Value::Str(s.clone()).repr()
                ))
            })
        }
        (_, Some(_)) => Err(ScriptError::type_error("int() can't convert non-string with explicit base")),
        (Value::Int(i), None) => Ok(i),
        (Value::Bool(b), None) => Ok(b as i64),
        (Value::Float(f), None) => float_to_int(f),
        (other, None) => Err(ScriptError::type_error(format!(
            "int() argument must be a string or a number, not '{}'",
            other.type_name()
        ))),
    }
}

fn float_to_int(f: f64) -> Result<i64, ScriptError> {
    if f.is_nan() {
        return Err(ScriptError::value_error("cannot convert float NaN to integer"));
    }
    let t = f.trunc();
    if !t.is_finite() || t.abs() >= 9.223_372_036_854_775e18 {
        return Err(ScriptError::new("OverflowError", "cannot convert float to integer"));
    }
    Ok(t as i64)
}

fn to_float(x: Value) -> Result<f64, ScriptError> {
    match x {
        Value::Float(f) => Ok(f),
        Value::Int(i) => Ok(i as f64),
        Value::Bool(b) => Ok(if b { 1.0 } else { 0.0 }),
        Value::Str(s) => {
            let t = s.trim().to_ascii_lowercase();
            match t.as_str() {
                "inf" | "+inf" | "infinity" | "+infinity" => Ok(f64::INFINITY),
                "-inf" | "-infinity" => Ok(f64::NEG_INFINITY),
                "nan" | "+nan" | "-nan" => Ok(f64::NAN),
                _ => t.replace('_', "").parse::<f64>().map_err(|_| {
                    ScriptError::value_error(format!(
                        "could not convert string to float: {}",
                        Value::Str(s.clone()).repr()
                    ))
                }),
            }
        }
        other => Err(ScriptError::type_error(format!(
            "float() argument must be a string or a number, not '{}'",
            other.type_name()
        ))),
    }
}

fn range(start: i64, stop: i64, step: i64) -> Result<Vec<Value>, ScriptError> {
    if step == 0 {
        return Err(ScriptError::value_error("range() arg 3 must not be zero"));
    }
    let span = if step > 0 {
        (stop as i128 - start as i128 + step as i128 - 1) / step as i128
    } else {
        (start as i128 - stop as i128 - step as i128 - 1) / (-(step as i128))
    };
    let len = span.max(0);
    if len > MAX_SEQUENCE as i128 {
        return Err(memory_error());
    }
    Ok((0..len as i64).map(|i| Value::Int(start + i * step)).collect())
}

fn round_half_even(x: f64) -> f64 {
    if (x - x.trunc()).abs() == 0.5 {
        2.0 * (x / 2.0).round()
    } else {
        x.round()
    }
}

fn round(number: Value, ndigits: Option<i64>) -> Result<Value, ScriptError> {
    match (number, ndigits) {
        (Value::Int(i), None) => Ok(Value::Int(i)),
        (Value::Bool(b), None) => Ok(Value::Int(b as i64)),
        (Value::Int(i), Some(n)) if n >= 0 => Ok(Value::Int(i)),
        (Value::Int(i), Some(n)) => {
            let m = 10f64.powi((-n).min(18) as i32);
            Ok(Value::Int(float_to_int(round_half_even(i as f64 / m) * m)?))
        }
        (Value::Float(f), None) => Ok(Value::Int(float_to_int(round_half_even(f))?)),
        (Value::Float(f), Some(n)) => {
            let m = 10f64.powi(n.clamp(-308, 308) as i32);
            let scaled = f * m;
            if !scaled.is_finite() {
                return Ok(Value::Float(f));
            }
            Ok(Value::Float(round_half_even(scaled) / m))
        }
        (other, _) => Err(ScriptError::type_error(format!(
            "type {} doesn't define __round__ method",
            other.type_name()
        ))),
    }
}

fn min_max(
    interp: &mut Interpreter<'_>,
    name: &'static str,
    args: Vec<Value>,
    kwargs: Kwargs,
) -> Result<Value, Fault> {
    let mut key = None;
    let mut default = None;
    for (k, v) in kwargs {
        match k.as_str() {
            "key" => key = Some(v).filter(|v| !matches!(v, Value::None)),
            "default" => default = Some(v),
            _ => {
                return Err(ScriptError::type_error(format!(
                    "{}() got an unexpected keyword argument '{}'",
                    name, k
                ))
                .into())
            }
        }
    }

    let items = match args.len() {
        0 => {
            return Err(ScriptError::type_error(format!(
                "{} expected at least 1 argument, got 0",
                name
            ))
            .into())
        }
        1 => args[0].iterate()?,
        _ => args,
    };
    if items.is_empty() {
        return default.ok_or_else(|| {
            ScriptError::value_error(format!("{}() arg is an empty sequence", name)).into()
        });
    }

    let keys = match &key {
        Some(k) => items
            .iter()
            .map(|v| interp.call_value(k, vec![v.clone()], Vec::new()))
            .collect::<Result<Vec<_>, _>>()?,
        None => items.clone(),
    };

    let want = if name == "min" { Ordering::Less } else { Ordering::Greater };
    let mut best = 0;
    for i in 1..items.len() {
        if keys[i].compare(&keys[best])? == want {
            best = i;
        }
    }
    Ok(items[best].clone())
}

/// Stable sort with an optional key function.
fn sort_values(
    interp: &mut Interpreter<'_>,
    items: Vec<Value>,
    key: Option<Value>,
    reverse: bool,
) -> Result<Vec<Value>, Fault> {
    let keys = match key.filter(|k| !matches!(k, Value::None)) {
        Some(k) => items
            .iter()
            .map(|v| interp.call_value(&k, vec![v.clone()], Vec::new()))
            .collect::<Result<Vec<_>, _>>()?,
        None => items.clone(),
    };

    let mut order: Vec<usize> = (0..items.len()).collect();
    let mut failure: Option<ScriptError> = None;
    order.sort_by(|&a, &b| match keys[a].compare(&keys[b]) {
        Ok(ord) if reverse => ord.reverse(),
        Ok(ord) => ord,
        Err(e) => {
            failure.get_or_insert(e);
            Ordering::Equal
        }
    });
    if let Some(e) = failure {
        return Err(e.into());
    }
    Ok(order.into_iter().map(|i| items[i].clone()).collect())
}

fn merge_into(dict: &mut Dict, source: &Value) -> Result<(), ScriptError> {
    if let Value::Dict(other) = source {
        let pairs: Vec<(Value, Value)> = {
            let other = other.borrow();
            other.keys().into_iter().zip(other.values()).collect()
        };
        for (k, v) in pairs {
            dict.insert(k, v)?;
        }
        return Ok(());
    }
    for (i, item) in source.iterate()?.into_iter().enumerate() {
        let pair = item.iterate()?;
        let [k, v] = <[Value; 2]>::try_from(pair).map_err(|p| {
            ScriptError::value_error(format!(
                "dictionary update sequence element #{} has length {}; 2 is required",
                i,
                p.len()
            ))
        })?;
        dict.insert(k, v)?;
    }
    Ok(())
}

// ── methods ─────────────────────────────────────────────────────────────────

fn call_method(
    interp: &mut Interpreter<'_>,
    receiver: &Value,
    name: &str,
    args: Vec<Value>,
    kwargs: Kwargs,
) -> Result<Value, Fault> {
    match receiver {
        Value::Str(s) => str_method(s, name, args, kwargs).map_err(Fault::from),
        Value::List(_) => list_method(interp, receiver, name, args, kwargs),
        Value::Dict(_) => dict_method(receiver, name, args, kwargs).map_err(Fault::from),
        Value::Tuple(items) => {
            let [x] = take::<1>(bind(name, &["value"], 1, args, kwargs)?);
            let x = x.unwrap_or(Value::None);
            seq_index_or_count(items, name, &x, "tuple").map_err(Fault::from)
        }
        other => Err(ScriptError::attribute_error(other.type_name(), name).into()),
    }
}

fn seq_index_or_count(items: &[Value], name: &str, x: &Value, what: &str) -> Result<Value, ScriptError> {
    if name == "count" {
        return Ok(Value::Int(items.iter().filter(|v| v.py_eq(x)).count() as i64));
    }
    items
        .iter()
        .position(|v| v.py_eq(x))
        .map(|i| Value::Int(i as i64))
        .ok_or_else(|| ScriptError::value_error(format!("{} is not in {}", x.repr(), what)))
}

fn char_index(s: &str, byte: usize) -> i64 {
    s[..byte].chars().count() as i64
}

fn prefix_matches(s: &str, arg: &Value, method: &str, ends: bool) -> Result<bool, ScriptError> {
    let check = |p: &str| if ends { s.ends_with(p) } else { s.starts_with(p) };
    match arg {
        Value::Str(p) => Ok(check(p)),
        Value::Tuple(options) => {
            for option in options.iter() {
                if check(&str_arg(method, "prefix", option)?) {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        other => Err(ScriptError::type_error(format!(
            "{} first arg must be str or a tuple of str, not {}",
            method,
            other.type_name()
        ))),
    }
}

fn str_method(s: &str, name: &str, args: Vec<Value>, kwargs: Kwargs) -> Result<Value, ScriptError> {
    let strip_chars = |args: Vec<Value>, kwargs: Kwargs| -> Result<Option<Vec<char>>, ScriptError> {
        let [chars] = take::<1>(bind(name, &["chars"], 0, args, kwargs)?);
        match chars {
            None | Some(Value::None) => Ok(None),
            Some(v) => Ok(Some(str_arg(name, "chars", &v)?.chars().collect())),
        }
    };
    let all_chars = |pred: fn(char) -> bool| Value::Bool(!s.is_empty() && s.chars().all(pred));

    let value = match name {
        "upper" => Value::str(s.to_uppercase()),
        "lower" => Value::str(s.to_lowercase()),
        "title" => {
            let mut out = String::with_capacity(s.len());
            let mut prev_alpha = false;
            for c in s.chars() {
                if prev_alpha {
                    out.extend(c.to_lowercase());
                } else {
                    out.extend(c.to_uppercase());
                }
                prev_alpha = c.is_alphabetic();
            }
            Value::str(out)
        }
        "capitalize" => {
            let mut chars = s.chars();
            let out = match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.as_str().to_lowercase().chars()).collect(),
                None => String::new(),
            };
            Value::str(out)
        }
        "strip" | "lstrip" | "rstrip" => {
            let chars = strip_chars(args, kwargs)?;
            let pred = |c: char| match &chars {
                Some(set) => set.contains(&c),
                None => c.is_whitespace(),
            };
            Value::str(match name {
                "strip" => s.trim_matches(pred),
                "lstrip" => s.trim_start_matches(pred),
                _ => s.trim_end_matches(pred),
            })
        }
        "split" => {
            let [sep, maxsplit] = take::<2>(bind(name, &["sep", "maxsplit"], 0, args, kwargs)?);
            let maxsplit = maxsplit.map(|m| int_arg("split", &m)).transpose()?.unwrap_or(-1);
            let parts: Vec<String> = match sep {
                None | Some(Value::None) => split_whitespace(s, maxsplit),
                Some(sep) => {
                    let sep = str_arg("split", "sep", &sep)?;
                    if sep.is_empty() {
                        return Err(ScriptError::value_error("empty separator"));
                    }
                    if maxsplit < 0 {
                        s.split(sep.as_str()).map(String::from).collect()
                    } else {
                        s.splitn(maxsplit as usize + 1, sep.as_str()).map(String::from).collect()
                    }
                }
            };
            Value::list(parts.into_iter().map(Value::str).collect())
        }
        "splitlines" => Value::list(s.lines().map(Value::str).collect()),
        "join" => {
            let [iterable] = take::<1>(bind(name, &["iterable"], 1, args, kwargs)?);
            let items = iterable.unwrap_or(Value::None).iterate()?;
            let mut parts = Vec::with_capacity(items.len());
            for (i, item) in items.iter().enumerate() {
                match item {
                    Value::Str(p) => parts.push(p.to_string()),
                    other => {
                        return Err(ScriptError::type_error(format!(
                            "sequence item {}: expected str instance, {} found",
                            i,
                            other.type_name()
                        )))
                    }
                }
            }
            let joined = parts.join(s);
            if joined.len() > MAX_SEQUENCE {
                return Err(memory_error());
            }
            Value::str(joined)
        }
        "replace" => {
            let [old, new, count] = take::<3>(bind(name, &["old", "new", "count"], 2, args, kwargs)?);
            let old = str_arg("replace", "old", &old.unwrap_or(Value::None))?;
            let new = str_arg("replace", "new", &new.unwrap_or(Value::None))?;
            let count = count.map(|c| int_arg("replace", &c)).transpose()?.unwrap_or(-1);
            let out = if count < 0 {
                s.replace(&old, &new)
            } else {
                s.replacen(&old, &new, count as usize)
            };
            if out.len() > MAX_SEQUENCE {
                return Err(memory_error());
            }
            Value::str(out)
        }
        "startswith" | "endswith" => {
            let [prefix] = take::<1>(bind(name, &["prefix"], 1, args, kwargs)?);
            Value::Bool(prefix_matches(s, &prefix.unwrap_or(Value::None), name, name == "endswith")?)
        }
        "find" | "rfind" | "index" => {
            let [sub] = take::<1>(bind(name, &["sub"], 1, args, kwargs)?);
            let sub = str_arg(name, "sub", &sub.unwrap_or(Value::None))?;
            let found = if name == "rfind" { s.rfind(&sub) } else { s.find(&sub) };
            match (found, name) {
                (Some(byte), _) => Value::Int(char_index(s, byte)),
                (None, "index") => return Err(ScriptError::value_error("substring not found")),
                (None, _) => Value::Int(-1),
            }
        }
        "count" => {
            let [sub] = take::<1>(bind(name, &["sub"], 1, args, kwargs)?);
            let sub = str_arg(name, "sub", &sub.unwrap_or(Value::None))?;
            let n = if sub.is_empty() {
                s.chars().count() + 1
            } else {
                s.matches(sub.as_str()).count()
            };
            Value::Int(n as i64)
        }
        "format" => Value::str(format_template(s, &args, &kwargs)?),
        "partition" => {
            let [sep] = take::<1>(bind(name, &["sep"], 1, args, kwargs)?);
            let sep = str_arg(name, "sep", &sep.unwrap_or(Value::None))?;
            if sep.is_empty() {
                return Err(ScriptError::value_error("empty separator"));
            }
            let parts = match s.split_once(sep.as_str()) {
                Some((head, tail)) => vec![Value::str(head), Value::str(&sep), Value::str(tail)],
                None => vec![Value::str(s), Value::str(""), Value::str("")],
            };
            Value::tuple(parts)
        }
        "isdigit" => all_chars(|c| c.is_ascii_digit()),
        "isalpha" => all_chars(char::is_alphabetic),
        "isalnum" => all_chars(char::is_alphanumeric),
        "isspace" => all_chars(char::is_whitespace),
        "islower" => Value::Bool(
            s.chars().any(char::is_alphabetic) && !s.chars().any(char::is_uppercase),
        ),
        "isupper" => Value::Bool(
            s.chars().any(char::is_alphabetic) && !s.chars().any(char::is_lowercase),
        ),
        _ => return Err(ScriptError::attribute_error("str", name)),
    };
    Ok(value)
}

fn split_whitespace(s: &str, maxsplit: i64) -> Vec<String> {
    if maxsplit < 0 {
        return s.split_whitespace().map(String::from).collect();
    }
    let mut parts = Vec::new();
    let mut rest = s.trim_start();
    while !rest.is_empty() {
        if parts.len() as i64 == maxsplit {
            parts.push(rest.to_string());
            break;
        }
        match rest.find(char::is_whitespace) {
            Some(end) => {
                parts.push(rest[..end].to_string());
                rest = rest[end..].trim_start();
            }
            None => {
                parts.push(rest.to_string());
                break;
            }
        }
    }
    parts
}

fn list_method(
    interp: &mut Interpreter<'_>,
    receiver: &Value,
    name: &str,
    args: Vec<Value>,
    kwargs: Kwargs,
) -> Result<Value, Fault> {
    let Value::List(list) = receiver else {
        return Err(ScriptError::attribute_error(receiver.type_name(), name).into());
    };

    let value = match name {
        "append" => {
            let [x] = take::<1>(bind(name, &["object"], 1, args, kwargs)?);
            list.borrow_mut().push(x.unwrap_or(Value::None));
            Value::None
        }
        "extend" => {
            let [x] = take::<1>(bind(name, &["iterable"], 1, args, kwargs)?);
            let items = x.unwrap_or(Value::None).iterate()?;
            if list.borrow().len() + items.len() > MAX_SEQUENCE {
                return Err(memory_error().into());
            }
            list.borrow_mut().extend(items);
            Value::None
        }
        "insert" => {
            let [index, x] = take::<2>(bind(name, &["index", "object"], 2, args, kwargs)?);
            let index = int_arg("insert", &index.unwrap_or(Value::None))?;
            let mut items = list.borrow_mut();
            let len = items.len() as i64;
            let at = if index < 0 { (index + len).max(0) } else { index.min(len) };
            items.insert(at as usize, x.unwrap_or(Value::None));
            Value::None
        }
        "pop" => {
            let [index] = take::<1>(bind(name, &["index"], 0, args, kwargs)?);
            let index = index.map(|i| int_arg("pop", &i)).transpose()?.unwrap_or(-1);
            let mut items = list.borrow_mut();
            if items.is_empty() {
                return Err(ScriptError::index_error("pop from empty list").into());
            }
            let at = normalize_index(index, items.len())
                .ok_or_else(|| ScriptError::index_error("pop index out of range"))?;
            items.remove(at)
        }
        "remove" => {
            let [x] = take::<1>(bind(name, &["value"], 1, args, kwargs)?);
            let x = x.unwrap_or(Value::None);
            let mut items = list.borrow_mut();
            let at = items
                .iter()
                .position(|v| v.py_eq(&x))
                .ok_or_else(|| ScriptError::value_error("list.remove(x): x not in list"))?;
            items.remove(at);
            Value::None
        }
        "index" | "count" => {
            let [x] = take::<1>(bind(name, &["value"], 1, args, kwargs)?);
            let snapshot = list.borrow().clone();
            seq_index_or_count(&snapshot, name, &x.unwrap_or(Value::None), "list")?
        }
        "sort" => {
            if !args.is_empty() {
                return Err(ScriptError::type_error("sort() takes no positional arguments").into());
            }
            let [key, reverse] = take::<2>(bind(name, &["key", "reverse"], 0, args, kwargs)?);
            let snapshot = list.borrow().clone();
            let sorted = sort_values(interp, snapshot, key, reverse.map(|r| r.truthy()).unwrap_or(false))?;
            *list.borrow_mut() = sorted;
            Value::None
        }
        "reverse" => {
            list.borrow_mut().reverse();
            Value::None
        }
        "clear" => {
            list.borrow_mut().clear();
            Value::None
        }
        "copy" => Value::list(list.borrow().clone()),
        _ => return Err(ScriptError::attribute_error("list", name).into()),
    };
    Ok(value)
}

fn dict_method(receiver: &Value, name: &str, args: Vec<Value>, kwargs: Kwargs) -> Result<Value, ScriptError> {
    let Value::Dict(dict) = receiver else {
        return Err(ScriptError::attribute_error(receiver.type_name(), name));
    };

    let value = match name {
        "get" => {
            let [key, default] = take::<2>(bind(name, &["key", "default"], 1, args, kwargs)?);
            let key = key.unwrap_or(Value::None);
            dict.borrow().get(&key).or(default).unwrap_or(Value::None)
        }
        "keys" => Value::list(dict.borrow().keys()),
        "values" => Value::list(dict.borrow().values()),
        "items" => Value::list(dict.borrow().items()),
        "pop" => {
            let [key, default] = take::<2>(bind(name, &["key", "default"], 1, args, kwargs)?);
            let key = key.unwrap_or(Value::None);
            let removed = dict.borrow_mut().remove(&key);
            match (removed, default) {
                (Some(v), _) | (None, Some(v)) => v,
                (None, None) => return Err(ScriptError::key_error(key.repr())),
            }
        }
        "setdefault" => {
            let [key, default] = take::<2>(bind(name, &["key", "default"], 1, args, kwargs)?);
            let key = key.unwrap_or(Value::None);
            let existing = dict.borrow().get(&key);
            match existing {
                Some(v) => v,
                None => {
                    let v = default.unwrap_or(Value::None);
                    dict.borrow_mut().insert(key, v.clone())?;
                    v
                }
            }
        }
        "update" => {
            if args.len() > 1 {
                return Err(ScriptError::type_error("update expected at most 1 argument"));
            }
            let mut merged = dict.borrow().clone();
            if let Some(source) = args.first() {
                merge_into(&mut merged, source)?;
            }
            for (k, v) in kwargs {
                merged.insert(Value::str(k), v)?;
            }
            *dict.borrow_mut() = merged;
            Value::None
        }
        "clear" => {
            dict.borrow_mut().clear();
            Value::None
        }
        "copy" => Value::dict(dict.borrow().clone()),
        _ => return Err(ScriptError::attribute_error("dict", name)),
    };
    Ok(value)
}

// ── operators ───────────────────────────────────────────────────────────────

pub(super) fn unary_op(op: UnaryOp, operand: &Value) -> Result<Value, ScriptError> {
    match (op, operand) {
        (UnaryOp::Not, v) => Ok(Value::Bool(!v.truthy())),
        (UnaryOp::Neg, Value::Int(i)) => i.checked_neg().map(Value::Int).ok_or_else(overflow),
        (UnaryOp::Neg, Value::Bool(b)) => Ok(Value::Int(-(*b as i64))),
        (UnaryOp::Neg, Value::Float(f)) => Ok(Value::Float(-f)),
        (UnaryOp::Pos, Value::Int(_) | Value::Float(_)) => Ok(operand.clone()),
        (UnaryOp::Pos, Value::Bool(b)) => Ok(Value::Int(*b as i64)),
        (op, v) => Err(ScriptError::type_error(format!(
            "bad operand type for unary {}: '{}'",
            if op == UnaryOp::Neg { "-" } else { "+" },
            v.type_name()
        ))),
    }
}

/// `x op= y`: lists extend in place, everything else rebinds.
pub(super) fn inplace_op(op: BinOp, lhs: &Value, rhs: &Value) -> Result<Value, ScriptError> {
    if let (BinOp::Add, Value::List(list)) = (op, lhs) {
        let items = rhs.iterate()?;
        if list.borrow().len() + items.len() > MAX_SEQUENCE {
            return Err(memory_error());
        }
        list.borrow_mut().extend(items);
        return Ok(lhs.clone());
    }
    binary_op(op, lhs, rhs)
}

fn repeat<T: Clone>(items: &[T], times: i64) -> Result<Vec<T>, ScriptError> {
    let times = times.max(0) as usize;
    if items.is_empty() {
        return Ok(Vec::new());
    }
    if items.len().saturating_mul(times) > MAX_SEQUENCE {
        return Err(memory_error());
    }
    let mut out = Vec::with_capacity(items.len() * times);
    for _ in 0..times {
        out.extend_from_slice(items);
    }
    Ok(out)
}

pub(super) fn binary_op(op: BinOp, lhs: &Value, rhs: &Value) -> Result<Value, ScriptError> {
    use Value::{List, Str, Tuple};
    match (op, lhs, rhs) {
        (BinOp::Add, Str(a), Str(b)) => {
            if a.len() + b.len() > MAX_SEQUENCE {
                return Err(memory_error());
            }
            Ok(Value::str(format!("{}{}", a, b)))
        }
        (BinOp::Add, List(a), List(b)) => {
            let mut items = a.borrow().clone();
            items.extend(b.borrow().iter().cloned());
            Ok(Value::list(items))
        }
        (BinOp::Add, Tuple(a), Tuple(b)) => {
            Ok(Value::tuple(a.iter().chain(b.iter()).cloned().collect()))
        }
        (BinOp::Mul, Str(s), n) | (BinOp::Mul, n, Str(s)) if n.as_int().is_some() => {
            let chars: Vec<char> = s.chars().collect();
            Ok(Value::str(repeat(&chars, n.as_int().unwrap_or(0))?.into_iter().collect::<String>()))
        }
        (BinOp::Mul, List(items), n) | (BinOp::Mul, n, List(items)) if n.as_int().is_some() => {
            let items = items.borrow().clone();
            Ok(Value::list(repeat(&items, n.as_int().unwrap_or(0))?))
        }
        (BinOp::Mul, Tuple(items), n) | (BinOp::Mul, n, Tuple(items)) if n.as_int().is_some() => {
            Ok(Value::tuple(repeat(items, n.as_int().unwrap_or(0))?))
        }
        (BinOp::Mod, Str(fmt), args) => Ok(Value::str(percent_format(fmt, args)?)),
        _ => match (lhs.as_int(), rhs.as_int()) {
            (Some(a), Some(b)) => int_op(op, a, b),
            _ => match (lhs.as_number(), rhs.as_number()) {
                (Some(a), Some(b)) => float_op(op, a, b),
                _ => Err(ScriptError::type_error(format!(
                    "unsupported operand type(s) for {}: '{}' and '{}'",
                    op.symbol(),
                    lhs.type_name(),
                    rhs.type_name()
                ))),
            },
        },
    }
}

fn int_op(op: BinOp, a: i64, b: i64) -> Result<Value, ScriptError> {
    let zero = || ScriptError::zero_division("integer division or modulo by zero");
    let result = match op {
        BinOp::Add => a.checked_add(b),
        BinOp::Sub => a.checked_sub(b),
        BinOp::Mul => a.checked_mul(b),
        BinOp::Div => {
            if b == 0 {
                return Err(ScriptError::zero_division("division by zero"));
            }
            return Ok(Value::Float(a as f64 / b as f64));
        }
        BinOp::FloorDiv => {
            if b == 0 {
                return Err(zero());
            }
            a.checked_div(b).map(|q| if (a % b != 0) && ((a < 0) != (b < 0)) { q - 1 } else { q })
        }
        BinOp::Mod => {
            if b == 0 {
                return Err(zero());
            }
            a.checked_rem(b).map(|r| if r != 0 && ((r < 0) != (b < 0)) { r + b } else { r })
        }
        BinOp::Pow => {
            if b < 0 {
                return float_op(op, a as f64, b as f64);
            }
            u32::try_from(b).ok().and_then(|e| a.checked_pow(e))
        }
    };
    result.map(Value::Int).ok_or_else(overflow)
}

fn float_op(op: BinOp, a: f64, b: f64) -> Result<Value, ScriptError> {
    let value = match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div => {
            if b == 0.0 {
                return Err(ScriptError::zero_division("float division by zero"));
            }
            a / b
        }
        BinOp::FloorDiv => {
            if b == 0.0 {
                return Err(ScriptError::zero_division("float floor division by zero"));
            }
            (a / b).floor()
        }
        BinOp::Mod => {
            if b == 0.0 {
                return Err(ScriptError::zero_division("float modulo"));
            }
            a - b * (a / b).floor()
        }
        BinOp::Pow => {
            if a == 0.0 && b < 0.0 {
                return Err(ScriptError::zero_division("0.0 cannot be raised to a negative power"));
            }
            a.powf(b)
        }
    };
    Ok(Value::Float(value))
}

pub(super) fn contains(container: &Value, item: &Value) -> Result<bool, ScriptError> {
    match container {
        Value::Str(s) => match item {
            Value::Str(sub) => Ok(s.contains(&**sub)),
            other => Err(ScriptError::type_error(format!(
                "'in <string>' requires string as left operand, not {}",
                other.type_name()
            ))),
        },
        Value::List(items) => Ok(items.borrow().iter().any(|v| v.py_eq(item))),
        Value::Tuple(items) => Ok(items.iter().any(|v| v.py_eq(item))),
        Value::Dict(d) => Ok(d.borrow().contains_key(item)),
        other => Err(ScriptError::type_error(format!(
            "argument of type '{}' is not iterable",
            other.type_name()
        ))),
    }
}

fn slice_positions(len: usize, lower: Option<i64>, upper: Option<i64>, step: Option<i64>) -> Result<Vec<usize>, ScriptError> {
    let step = step.unwrap_or(1);
    if step == 0 {
        return Err(ScriptError::value_error("slice step cannot be zero"));
    }
    let len = len as i64;
    let resolve = |i: i64| if i < 0 { i + len } else { i };

    let mut out = Vec::new();
    if step > 0 {
        let start = lower.map(resolve).unwrap_or(0).clamp(0, len);
        let stop = upper.map(resolve).unwrap_or(len).clamp(0, len);
        let mut i = start;
        while i < stop {
            out.push(i as usize);
            i += step;
        }
    } else {
        let start = lower.map(resolve).unwrap_or(len - 1).clamp(-1, len - 1);
        let stop = upper.map(resolve).unwrap_or(-1).clamp(-1, len - 1);
        let mut i = start;
        while i > stop {
            out.push(i as usize);
            i += step;
        }
    }
    Ok(out)
}

pub(super) fn slice(obj: &Value, lower: Option<i64>, upper: Option<i64>, step: Option<i64>) -> Result<Value, ScriptError> {
    match obj {
        Value::List(items) => {
            let items = items.borrow();
            let picked = slice_positions(items.len(), lower, upper, step)?;
            Ok(Value::list(picked.into_iter().map(|i| items[i].clone()).collect()))
        }
        Value::Tuple(items) => {
            let picked = slice_positions(items.len(), lower, upper, step)?;
            Ok(Value::tuple(picked.into_iter().map(|i| items[i].clone()).collect()))
        }
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            let picked = slice_positions(chars.len(), lower, upper, step)?;
            Ok(Value::str(picked.into_iter().map(|i| chars[i]).collect::<String>()))
        }
        other => Err(ScriptError::type_error(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

// ── formatting ──────────────────────────────────────────────────────────────

/// Format one f-string / `str.format` field. `spec` is the raw text after the
/// expression: an optional `!r`/`!s` conversion followed by an optional `:spec`.
pub(super) fn format_field(value: &Value, spec: Option<&str>) -> Result<String, ScriptError> {
    let spec = spec.unwrap_or("");
    let (conversion, format_spec) = match spec.strip_prefix('!') {
        Some(rest) => {
            let mut chars = rest.chars();
            let conv = chars.next();
            let tail = chars.as_str();
            (conv, tail.strip_prefix(':').unwrap_or(tail))
        }
        None => (None, spec.strip_prefix(':').unwrap_or(spec)),
    };

    let converted = match conversion {
        Some('r') => Value::str(value.repr()),
        Some('s') => Value::str(value.to_display()),
        Some(other) => {
            return Err(ScriptError::value_error(format!(
                "Unknown conversion specifier {}",
                other
            )))
        }
        None => value.clone(),
    };
    apply_format_spec(&converted, format_spec)
}

fn apply_format_spec(value: &Value, spec: &str) -> Result<String, ScriptError> {
    if spec.is_empty() {
        return Ok(value.to_display());
    }
    let invalid = || ScriptError::value_error(format!("Invalid format specifier '{}'", spec));
    let chars: Vec<char> = spec.chars().collect();
    let mut i = 0;

    let mut fill = ' ';
    let mut align: Option<char> = None;
    if chars.len() >= 2 && "<>^".contains(chars[1]) {
        fill = chars[0];
        align = Some(chars[1]);
        i = 2;
    } else if !chars.is_empty() && "<>^".contains(chars[0]) {
        align = Some(chars[0]);
        i = 1;
    }

    let mut sign = '-';
    if i < chars.len() && "+- ".contains(chars[i]) {
        sign = chars[i];
        i += 1;
    }

    let mut zero_pad = false;
    if i < chars.len() && chars[i] == '0' {
        zero_pad = true;
        i += 1;
    }

    let mut width = 0usize;
    while i < chars.len() && chars[i].is_ascii_digit() {
        width = width * 10 + chars[i].to_digit(10).unwrap_or(0) as usize;
        i += 1;
    }

    let mut grouping = false;
    if i < chars.len() && chars[i] == ',' {
        grouping = true;
        i += 1;
    }

    let mut precision: Option<usize> = None;
    if i < chars.len() && chars[i] == '.' {
        i += 1;
        let mut p = 0usize;
        let start = i;
        while i < chars.len() && chars[i].is_ascii_digit() {
            p = p * 10 + chars[i].to_digit(10).unwrap_or(0) as usize;
            i += 1;
        }
        if i == start {
            return Err(invalid());
        }
        precision = Some(p);
    }

    let ty = chars.get(i).copied();
    if ty.is_some() && i + 1 != chars.len() {
        return Err(invalid());
    }
    if width > 10_000 || precision.is_some_and(|p| p > 100) {
        return Err(invalid());
    }

    let is_number = matches!(value, Value::Int(_) | Value::Float(_) | Value::Bool(_));
    let body = match (ty, value) {
        (Some('s') | None, Value::Str(s)) => match precision {
            Some(p) => s.chars().take(p).collect(),
            None => s.to_string(),
        },
        (Some('s'), other) => other.to_display(),
        (Some('d'), Value::Int(_) | Value::Bool(_)) => value.as_int().unwrap_or(0).to_string(),
        (Some('f' | 'F'), v) if is_number => {
            format!("{:.*}", precision.unwrap_or(6), v.as_number().unwrap_or(0.0))
        }
        (Some('%'), v) if is_number => {
            format!("{:.*}%", precision.unwrap_or(6), v.as_number().unwrap_or(0.0) * 100.0)
        }
        (Some('e'), v) if is_number => {
            let raw = format!("{:.*e}", precision.unwrap_or(6), v.as_number().unwrap_or(0.0));
            match raw.split_once('e') {
                Some((mantissa, exp)) => {
                    let exp: i32 = exp.parse().unwrap_or(0);
                    format!("{}e{}{:02}", mantissa, if exp < 0 { '-' } else { '+' }, exp.abs())
                }
                None => raw,
            }
        }
        (Some('g') | None, Value::Float(f)) if precision.is_some() => {
            general_format(*f, precision.unwrap_or(6))
        }
        (None, v) => v.to_display(),
        (Some(t), v) => {
            return Err(ScriptError::value_error(format!(
                "Unknown format code '{}' for object of type '{}'",
                t,
                v.type_name()
            )))
        }
    };

    let (negative, digits) = match body.strip_prefix('-') {
        Some(rest) if is_number => (true, rest.to_string()),
        _ => (false, body),
    };
    let digits = if grouping && is_number { group_thousands(&digits) } else { digits };
    let sign_text = match (negative, sign) {
        (true, _) => "-",
        (false, '+') if is_number => "+",
        (false, ' ') if is_number => " ",
        _ => "",
    };

    let content_len = sign_text.chars().count() + digits.chars().count();
    if content_len >= width {
        return Ok(format!("{}{}", sign_text, digits));
    }
    let pad = width - content_len;

    if zero_pad && align.is_none() && is_number {
        return Ok(format!("{}{}{}", sign_text, "0".repeat(pad), digits));
    }

    let fill_str = |n: usize| std::iter::repeat(fill).take(n).collect::<String>();
    let content = format!("{}{}", sign_text, digits);
    let align = align.unwrap_or(if is_number { '>' } else { '<' });
    Ok(match align {
        '>' => format!("{}{}", fill_str(pad), content),
        '^' => format!("{}{}{}", fill_str(pad / 2), content, fill_str(pad - pad / 2)),
        _ => format!("{}{}", content, fill_str(pad)),
    })
}

/// `{:.Ng}`: N significant digits, trailing zeros removed.
fn general_format(f: f64, precision: usize) -> String {
    if f == 0.0 || !f.is_finite() {
        return format_float(f).trim_end_matches(".0").to_string();
    }
    let precision = precision.max(1) as i32;
    let exponent = f.abs().log10().floor() as i32;
    if exponent < -4 || exponent >= precision {
        let raw = format!("{:.*e}", (precision - 1) as usize, f);
        return match raw.split_once('e') {
            Some((mantissa, exp)) => {
                let mantissa = trim_fraction(mantissa);
                let exp: i32 = exp.parse().unwrap_or(0);
                format!("{}e{}{:02}", mantissa, if exp < 0 { '-' } else { '+' }, exp.abs())
            }
            None => raw,
        };
    }
    let decimals = (precision - 1 - exponent).max(0) as usize;
    trim_fraction(&format!("{:.*}", decimals, f))
}

fn trim_fraction(s: &str) -> String {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        s.to_string()
    }
}

fn group_thousands(digits: &str) -> String {
    let (int_part, rest) = match digits.find('.') {
        Some(dot) => digits.split_at(dot),
        None => (digits, ""),
    };
    if !int_part.chars().all(|c| c.is_ascii_digit()) {
        return digits.to_string();
    }
    let mut grouped = String::new();
    for (i, c) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    grouped.push_str(rest);
    grouped
}

/// `str.format` with `{}`, `{0}`, `{name}` and format specs.
fn format_template(template: &str, args: &[Value], kwargs: &Kwargs) -> Result<String, ScriptError> {
    let mut out = String::new();
    let mut chars = template.chars().peekable();
    let mut auto_index = 0usize;

    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '}' => return Err(ScriptError::value_error("Single '}' encountered in format string")),
            '{' => {
                let mut field = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(ch) => field.push(ch),
                        None => {
                            return Err(ScriptError::value_error("Single '{' encountered in format string"))
                        }
                    }
                }
                let split = field.find(['!', ':']).unwrap_or(field.len());
                let (name, spec) = field.split_at(split);
                let value = if name.is_empty() {
                    let v = args.get(auto_index).cloned();
                    auto_index += 1;
                    v.ok_or_else(|| {
                        ScriptError::index_error(format!(
                            "Replacement index {} out of range for positional args tuple",
                            auto_index - 1
                        ))
                    })?
                } else if let Ok(i) = name.parse::<usize>() {
                    args.get(i).cloned().ok_or_else(|| {
                        ScriptError::index_error(format!(
                            "Replacement index {} out of range for positional args tuple",
                            i
                        ))
                    })?
                } else {
                    kwargs
                        .iter()
                        .find(|(k, _)| k == name)
                        .map(|(_, v)| v.clone())
                        .ok_or_else(|| ScriptError::key_error(format!("'{}'", name)))?
                };
                out.push_str(&format_field(&value, Some(spec))?);
            }
            other => out.push(other),
        }
    }
    Ok(out)
}

/// printf-style `"%s" % value`.
fn percent_format(fmt: &str, args: &Value) -> Result<String, ScriptError> {
    let values: Vec<Value> = match args {
        Value::Tuple(items) => items.as_ref().clone(),
        other => vec![other.clone()],
    };
    let mut next = values.into_iter();
    let mut out = String::new();
    let mut chars = fmt.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        let mut spec = String::new();
        let conv = loop {
            match chars.next() {
                Some(ch) if ch.is_ascii_digit() || ch == '.' || ch == '-' || ch == '+' => spec.push(ch),
                Some(ch) => break ch,
                None => return Err(ScriptError::value_error("incomplete format")),
            }
        };
        if conv == '%' {
            out.push('%');
            continue;
        }
        let value = next
            .next()
            .ok_or_else(|| ScriptError::type_error("not enough arguments for format string"))?;
        let text = match conv {
            's' => value.to_display(),
            'r' => value.repr(),
            'd' | 'i' => match value.as_number() {
                Some(n) => float_to_int(n)?.to_string(),
                None => {
                    return Err(ScriptError::type_error(format!(
                        "%d format: a number is required, not {}",
                        value.type_name()
                    )))
                }
            },
            'f' => {
                let mut precision = 6;
                if let Some((width, p)) = spec.split_once('.') {
                    precision = p.parse::<usize>().unwrap_or(6);
                    spec = width.to_string();
                }
                match value.as_number() {
                    Some(n) => format!("{:.*}", precision.min(100), n),
                    None => {
                        return Err(ScriptError::type_error(format!(
                            "must be real number, not {}",
                            value.type_name()
                        )))
                    }
                }
            }
            other => {
                return Err(ScriptError::value_error(format!(
                    "unsupported format character '{}'",
                    other
                )))
            }
        };
        let left = spec.starts_with('-');
        let width: usize = spec.trim_start_matches(['-', '+']).parse().unwrap_or(0).min(10_000);
        let pad = width.saturating_sub(text.chars().count());
        if left {
            out.push_str(&text);
            out.push_str(&" ".repeat(pad));
        } else {
            out.push_str(&" ".repeat(pad));
            out.push_str(&text);
        }
    }

    if next.next().is_some() {
        return Err(ScriptError::type_error("not all arguments converted during string formatting"));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_specs() {
        assert_eq!(apply_format_spec(&Value::Float(3.14159), ".2f").unwrap(), "3.14");
        assert_eq!(apply_format_spec(&Value::Int(42), ">5").unwrap(), "   42");
        assert_eq!(apply_format_spec(&Value::Int(42), "05").unwrap(), "00042");
        assert_eq!(apply_format_spec(&Value::Int(1234567), ",").unwrap(), "1,234,567");
        assert_eq!(apply_format_spec(&Value::str("ab"), "*^6").unwrap(), "**ab**");
        assert_eq!(apply_format_spec(&Value::Float(0.25), ".0%").unwrap(), "25%");
        assert_eq!(apply_format_spec(&Value::Float(3.14159), ".3").unwrap(), "3.14");
        assert!(apply_format_spec(&Value::str("x"), "d").is_err());
    }

    #[test]
    fn test_sequence_repetition() {
        let three = Value::Int(3);
        let text = binary_op(BinOp::Mul, &Value::str("ab"), &three).unwrap();
        assert_eq!(text.repr(), "'ababab'");

        let list = Value::list(vec![Value::Int(1), Value::str("x")]);
        assert_eq!(binary_op(BinOp::Mul, &list, &Value::Int(2)).unwrap().repr(), "[1, 'x', 1, 'x']");
        assert_eq!(binary_op(BinOp::Mul, &Value::Int(2), &list).unwrap().repr(), "[1, 'x', 1, 'x']");
        assert_eq!(binary_op(BinOp::Mul, &list, &Value::Int(-1)).unwrap().repr(), "[]");

        let pair = Value::tuple(vec![Value::None]);
        assert_eq!(binary_op(BinOp::Mul, &pair, &three).unwrap().repr(), "(None, None, None)");

        assert!(binary_op(BinOp::Mul, &list, &Value::Int(i64::MAX)).is_err());
        let empty = Value::list(Vec::new());
        assert_eq!(binary_op(BinOp::Mul, &empty, &Value::Int(i64::MAX)).unwrap().repr(), "[]");
    }

    #[test]
    fn test_format_template() {
        let args = vec![Value::str("a"), Value::Int(2)];
        let kwargs = vec![("name".to_string(), Value::str("Ada"))];
        assert_eq!(
            format_template("{} {1:>3} {name!r} {{x}}", &args, &kwargs).unwrap(),
            "a   2 'Ada' {x}"
        );
        assert!(format_template("{5}", &args, &kwargs).is_err());
    }

    #[test]
    fn test_percent_format() {
        let args = Value::tuple(vec![Value::str("x"), Value::Int(3), Value::Float(0.5)]);
        assert_eq!(percent_format("%s=%d (%.2f) 100%%", &args).unwrap(), "x=3 (0.50) 100%");
        assert!(percent_format("%s %s", &Value::str("one")).is_err());
    }

    #[test]
    fn test_python_division_semantics() {
        assert_eq!(int_op(BinOp::FloorDiv, -7, 2).unwrap().repr(), "-4");
        assert_eq!(int_op(BinOp::Mod, -7, 2).unwrap().repr(), "1");
        assert_eq!(int_op(BinOp::Mod, 7, -2).unwrap().repr(), "-1");
        assert!(int_op(BinOp::Mul, i64::MAX, 2).is_err());
        assert_eq!(int_op(BinOp::Pow, 2, -1).unwrap().repr(), "0.5");
    }

    #[test]
    fn test_slices() {
        let s = Value::str("abcdef");
        assert_eq!(slice(&s, Some(1), Some(-1), None).unwrap().repr(), "'bcde'");
        assert_eq!(slice(&s, None, None, Some(-1)).unwrap().repr(), "'fedcba'");
        assert_eq!(slice(&s, None, None, Some(2)).unwrap().repr(), "'ace'");
        assert_eq!(slice(&s, Some(10), None, None).unwrap().repr(), "''");
        assert!(slice(&s, None, None, Some(0)).is_err());
    }

    #[test]
    fn test_round_half_even() {
        assert_eq!(round(Value::Float(2.5), None).unwrap().repr(), "2");
        assert_eq!(round(Value::Float(3.5), None).unwrap().repr(), "4");
        assert_eq!(round(Value::Float(1.2345), Some(2)).unwrap().repr(), "1.23");
    }

    #[test]
    fn test_split_whitespace_maxsplit() {
        assert_eq!(split_whitespace("  a b  c ", 1), vec!["a", "b  c "]);
        assert_eq!(split_whitespace("a b c", -1), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_repeat_is_bounded() {
        assert!(binary_op(BinOp::Mul, &Value::str("ab"), &Value::Int(i64::MAX)).is_err());
        assert_eq!(binary_op(BinOp::Mul, &Value::Int(2), &Value::str("ab")).unwrap().repr(), "'abab'");
    }

    #[test]
    fn test_range_lengths() {
        assert_eq!(range(0, 5, 2).unwrap().len(), 3);
        assert_eq!(range(5, 0, -2).unwrap().len(), 3);
        assert!(range(0, 5, 1).unwrap().len() == 5);
        assert!(range(5, 0, 1).unwrap().is_empty());
        assert!(range(0, i64::MAX, 1).is_err());
    }
}
