//! Runtime values produced while evaluating a template.

use crate::environment::Environment;
use crate::error::{Error, Result};
use indexmap::IndexMap;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// Numbers keep integer-ness so that `loop.index0 % 2` and friends stay exact.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    pub fn as_f64(self) -> f64 {
        match self {
            Number::Int(i) => i as f64,
            Number::Float(f) => f,
        }
    }

    pub fn is_zero(self) -> bool {
        match self {
            Number::Int(i) => i == 0,
            Number::Float(f) => f == 0.0,
        }
    }

    /// The value as an integer, for indices, `range` and parity tests.
    pub fn as_integer(self) -> Result<i64> {
        match self {
            Number::Int(i) => Ok(i),
            Number::Float(f) => Err(Error::runtime(format!("Expected an integer, got {}", f))),
        }
    }

    /// Numeric equality across representations (`1 == 1.0`).
    pub fn num_eq(self, other: Number) -> bool {
        match (self, other) {
            (Number::Int(a), Number::Int(b)) => a == b,
            (a, b) => a.as_f64() == b.as_f64(),
        }
    }
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Number::Int(i) => write!(f, "{}", i),
            // Python prints integral floats with a trailing `.0`.
            Number::Float(x) if x.is_finite() && x.fract() == 0.0 => write!(f, "{:.1}", x),
            Number::Float(x) => write!(f, "{}", x),
        }
    }
}

pub type Object = Rc<RefCell<IndexMap<String, Value>>>;

type NativeFn = dyn Fn(&[Value], &Environment<'_>) -> Result<Value>;

/// A callable value: builtins, bound methods and adapted host callbacks.
#[derive(Clone)]
pub struct Function(Rc<NativeFn>);

impl Function {
    pub fn new(f: impl Fn(&[Value], &Environment<'_>) -> Result<Value> + 'static) -> Self {
        Function(Rc::new(f))
    }

    pub fn call(&self, args: &[Value], env: &Environment<'_>) -> Result<Value> {
        (self.0)(args, env)
    }

    pub fn ptr_eq(&self, other: &Function) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<function>")
    }
}

/// A value seen by template code.
///
/// Everything except `Object` is a plain value and is copied when passed
/// around. Objects share their backing map so that `{% set ns.x = ... %}`
/// is visible through every handle to the same namespace.
#[derive(Debug, Clone)]
pub enum Value {
    Numeric(Number),
    Boolean(bool),
    String(String),
    Null,
    Undefined,
    Array(Vec<Value>),
    Object(Object),
    Function(Function),
}

impl Value {
    pub fn object(map: IndexMap<String, Value>) -> Self {
        Value::Object(Rc::new(RefCell::new(map)))
    }

    pub fn int(i: i64) -> Self {
        Value::Numeric(Number::Int(i))
    }

    pub fn function(f: impl Fn(&[Value], &Environment<'_>) -> Result<Value> + 'static) -> Self {
        Value::Function(Function::new(f))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Numeric(_) => "NumericValue",
            Value::Boolean(_) => "BooleanValue",
            Value::String(_) => "StringValue",
            Value::Null => "NullValue",
            Value::Undefined => "UndefinedValue",
            Value::Array(_) => "ArrayValue",
            Value::Object(_) => "ObjectValue",
            Value::Function(_) => "FunctionValue",
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Numeric(n) => !n.is_zero(),
            Value::Boolean(b) => *b,
            Value::String(s) => !s.is_empty(),
            Value::Null | Value::Undefined => false,
            Value::Array(a) => !a.is_empty(),
            Value::Object(o) => !o.borrow().is_empty(),
            Value::Function(_) => true,
        }
    }

    /// Equality that never fails: values of different kinds are simply
    /// unequal. Used by `!=`, `in` and the `equalto` test.
    pub fn loose_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Numeric(a), Value::Numeric(b)) => a.num_eq(*b),
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Null, Value::Null) | (Value::Undefined, Value::Undefined) => true,
            (Value::Array(a), Value::Array(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.loose_eq(y))
            }
            (Value::Object(a), Value::Object(b)) => {
                if Rc::ptr_eq(a, b) {
                    return true;
                }
                let (a, b) = (a.borrow(), b.borrow());
                a.len() == b.len()
                    && a.iter()
                        .all(|(k, v)| b.get(k).is_some_and(|other| v.loose_eq(other)))
            }
            (Value::Function(a), Value::Function(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    /// Instance method `name` bound to this value, e.g. `'ab'.upper`.
    pub fn builtin(&self, name: &str) -> Option<Value> {
        match self {
            Value::String(s) => string_method(s, name),
            Value::Array(items) => match name {
                "length" => {
                    let len = items.len() as i64;
                    Some(Value::function(move |_, _| Ok(Value::int(len))))
                }
                _ => None,
            },
            Value::Object(map) => object_method(map, name),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.loose_eq(other)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::int(i)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

fn string_arg<'a>(args: &'a [Value], index: usize, method: &str) -> Result<Option<&'a str>> {
    match args.get(index) {
        None | Some(Value::Undefined) | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(other) => Err(Error::runtime(format!(
            "{}() expects a string argument, got {}",
            method,
            other.type_name()
        ))),
    }
}

fn required_string_arg<'a>(args: &'a [Value], index: usize, method: &str) -> Result<&'a str> {
    string_arg(args, index, method)?
        .ok_or_else(|| Error::runtime(format!("{}() is missing a required argument", method)))
}

fn string_method(s: &str, name: &str) -> Option<Value> {
    let s = s.to_string();
    let f = match name {
        "upper" => Value::function(move |_, _| Ok(Value::String(s.to_uppercase()))),
        "lower" => Value::function(move |_, _| Ok(Value::String(s.to_lowercase()))),
        "title" => Value::function(move |_, _| Ok(Value::String(title_case(&s)))),
        "length" => Value::function(move |_, _| Ok(Value::int(s.chars().count() as i64))),
        "strip" => Value::function(move |args, _| {
            Ok(Value::String(match string_arg(args, 0, "strip")? {
                Some(chars) => s.trim_matches(|c: char| chars.contains(c)).to_string(),
                None => s.trim().to_string(),
            }))
        }),
        "lstrip" => Value::function(move |args, _| {
            Ok(Value::String(match string_arg(args, 0, "lstrip")? {
                Some(chars) => s.trim_start_matches(|c: char| chars.contains(c)).to_string(),
                None => s.trim_start().to_string(),
            }))
        }),
        "rstrip" => Value::function(move |args, _| {
            Ok(Value::String(match string_arg(args, 0, "rstrip")? {
                Some(chars) => s.trim_end_matches(|c: char| chars.contains(c)).to_string(),
                None => s.trim_end().to_string(),
            }))
        }),
        "startswith" => Value::function(move |args, _| {
            Ok(Value::Boolean(s.starts_with(required_string_arg(args, 0, "startswith")?)))
        }),
        "endswith" => Value::function(move |args, _| {
            Ok(Value::Boolean(s.ends_with(required_string_arg(args, 0, "endswith")?)))
        }),
        "split" => Value::function(move |args, _| {
            let parts: Vec<Value> = match string_arg(args, 0, "split")? {
                Some("") => return Err(Error::runtime("split() separator must not be empty")),
                Some(sep) => s.split(sep).map(Value::from).collect(),
                None => s.split_whitespace().map(Value::from).collect(),
            };
            Ok(Value::Array(parts))
        }),
        "replace" => Value::function(move |args, _| {
            let from = required_string_arg(args, 0, "replace")?;
            let to = required_string_arg(args, 1, "replace")?;
            Ok(Value::String(s.replace(from, to)))
        }),
        _ => return None,
    };
    Some(f)
}

fn object_method(map: &Object, name: &str) -> Option<Value> {
    let map = Rc::clone(map);
    let f = match name {
        "get" => Value::function(move |args, _| {
            let key = match args.first() {
                Some(Value::String(key)) => key,
                Some(other) => {
                    return Err(Error::runtime(format!(
                        "Object key must be a string: got {}",
                        other.type_name()
                    )))
                }
                None => return Err(Error::runtime("get() is missing a required argument")),
            };
            let found = map.borrow().get(key).cloned();
            Ok(found.or_else(|| args.get(1).cloned()).unwrap_or(Value::Null))
        }),
        "items" => Value::function(move |_, _| Ok(object_items(&map))),
        "keys" => Value::function(move |_, _| {
            Ok(Value::Array(map.borrow().keys().map(|k| Value::from(k.as_str())).collect()))
        }),
        "values" => Value::function(move |_, _| {
            Ok(Value::Array(map.borrow().values().cloned().collect()))
        }),
        _ => return None,
    };
    Some(f)
}

/// `[[key, value], ...]` in insertion order.
pub fn object_items(map: &Object) -> Value {
    Value::Array(
        map.borrow()
            .iter()
            .map(|(k, v)| Value::Array(vec![Value::from(k.as_str()), v.clone()]))
            .collect(),
    )
}

/// Python's `str.title()`: upper-case the first letter of every run of
/// letters, lower-case the rest.
pub fn title_case(s: &str) -> String {
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
    out
}

/// Python slice semantics: negative indices count from the end, bounds are
/// clamped, a negative step walks backwards.
pub fn slice<T: Clone>(
    items: &[T],
    start: Option<i64>,
    stop: Option<i64>,
    step: Option<i64>,
) -> Result<Vec<T>> {
    let len = items.len() as i64;
    let step = step.unwrap_or(1);
    if step == 0 {
        return Err(Error::runtime("Slice step cannot be zero"));
    }

    let (lower, upper) = if step > 0 { (0, len) } else { (-1, len - 1) };
    let clamp = |i: i64| {
        if i < 0 {
            (i + len).max(lower)
        } else {
            i.min(upper)
        }
    };
    let start = start.map(clamp).unwrap_or(if step > 0 { lower } else { upper });
    let stop = stop.map(clamp).unwrap_or(if step > 0 { upper } else { lower });

    let mut out = Vec::new();
    let mut i = start;
    while (step > 0 && i < stop) || (step < 0 && i > stop) {
        out.push(items[i as usize].clone());
        match i.checked_add(step) {
            Some(next) => i = next,
            None => break,
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEQ: [i32; 9] = [1, 2, 3, 4, 5, 6, 7, 8, 9];

    #[test]
    fn python_slicing() {
        assert_eq!(slice(&SEQ, Some(1), Some(4), None).unwrap(), vec![2, 3, 4]);
        assert_eq!(slice(&SEQ, Some(-3), None, None).unwrap(), vec![7, 8, 9]);
        assert_eq!(slice(&SEQ, None, None, Some(-1)).unwrap(), vec![9, 8, 7, 6, 5, 4, 3, 2, 1]);
        assert_eq!(slice(&SEQ, None, None, Some(3)).unwrap(), vec![1, 4, 7]);
        assert_eq!(slice(&SEQ, Some(-2), Some(2), Some(-2)).unwrap(), vec![8, 6, 4]);
    }

    #[test]
    fn slicing_clamps_out_of_range_bounds() {
        assert_eq!(slice(&SEQ, Some(7), Some(100), None).unwrap(), vec![8, 9]);
        assert_eq!(slice(&SEQ, Some(-100), Some(2), None).unwrap(), vec![1, 2]);
        assert!(slice(&SEQ, Some(5), Some(2), None).unwrap().is_empty());
        assert_eq!(slice(&SEQ, Some(100), None, Some(-4)).unwrap(), vec![9, 5, 1]);
        assert!(slice::<i32>(&[], None, None, Some(-1)).unwrap().is_empty());
        assert_eq!(slice(&SEQ, Some(1), None, Some(i64::MAX)).unwrap(), vec![2]);
        assert_eq!(slice(&SEQ, Some(-1), None, Some(i64::MIN)).unwrap(), vec![9]);
    }

    #[test]
    fn zero_step_is_an_error() {
        assert!(slice(&SEQ, None, None, Some(0)).is_err());
    }

    #[test]
    fn truthiness() {
        assert!(!Value::int(0).is_truthy());
        assert!(Value::Numeric(Number::Float(0.5)).is_truthy());
        assert!(!Value::from("").is_truthy());
        assert!(!Value::Undefined.is_truthy());
        assert!(!Value::Array(vec![]).is_truthy());
        assert!(!Value::object(IndexMap::new()).is_truthy());
        assert!(Value::function(|_, _| Ok(Value::Null)).is_truthy());
    }

    #[test]
    fn number_display() {
        assert_eq!(Number::Int(-3).to_string(), "-3");
        assert_eq!(Number::Float(2.0).to_string(), "2.0");
        assert_eq!(Number::Float(0.25).to_string(), "0.25");
    }

    #[test]
    fn loose_equality_across_kinds() {
        assert!(Value::int(1).loose_eq(&Value::Numeric(Number::Float(1.0))));
        assert!(!Value::from("1").loose_eq(&Value::int(1)));
        assert!(!Value::Null.loose_eq(&Value::Undefined));
        assert!(Value::Array(vec![Value::int(1)]).loose_eq(&Value::Array(vec![Value::int(1)])));
    }

    #[test]
    fn title_case_words() {
        assert_eq!(title_case("hello wORLD-foo"), "Hello World-Foo");
    }

    #[test]
    fn string_builtins_are_bound_to_instance() {
        let env = Environment::new();
        let s = Value::from("  Ab  ");
        let call = |name: &str, args: &[Value]| {
            let Some(Value::Function(f)) = s.builtin(name) else {
                panic!("missing builtin {}", name)
            };
            f.call(args, &env).unwrap()
        };
        assert_eq!(call("upper", &[]), Value::from("  AB  "));
        assert_eq!(call("strip", &[]), Value::from("Ab"));
        assert_eq!(call("length", &[]), Value::int(6));
        assert_eq!(call("startswith", &[Value::from("  A")]), Value::Boolean(true));
        assert_eq!(
            call("split", &[]),
            Value::Array(vec![Value::from("Ab")])
        );
        assert!(s.builtin("nope").is_none());
    }

    #[test]
    fn object_get_falls_back_to_default() {
        let env = Environment::new();
        let mut map = IndexMap::new();
        map.insert("a".to_string(), Value::int(1));
        let obj = Value::object(map);
        let Some(Value::Function(get)) = obj.builtin("get") else {
            panic!()
        };
        assert_eq!(get.call(&[Value::from("a")], &env).unwrap(), Value::int(1));
        assert_eq!(get.call(&[Value::from("b"), Value::int(7)], &env).unwrap(), Value::int(7));
        assert_eq!(get.call(&[Value::from("b")], &env).unwrap(), Value::Null);
        assert!(get.call(&[Value::int(0)], &env).is_err());
    }
}
