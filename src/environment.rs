//! Variable scopes, the test table and conversion of host data.

use crate::error::{Error, Result};
use crate::value::{Function, Number, Value};
use indexmap::IndexMap;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A named predicate used by `x is name`. Receives the operand followed by
/// any test arguments.
pub type TestFn = fn(&[Value]) -> Result<bool>;

/// One lexical scope. Child scopes borrow their parent, so a `for` body can
/// read and update outer variables while the scope it introduces is dropped
/// when the loop ends.
pub struct Environment<'p> {
    parent: Option<&'p Environment<'p>>,
    variables: RefCell<HashMap<String, Value>>,
    tests: HashMap<&'static str, TestFn>,
}

impl Environment<'static> {
    /// Root scope with `namespace` and the standard tests installed.
    pub fn new() -> Self {
        let env = Environment {
            parent: None,
            variables: RefCell::new(HashMap::new()),
            tests: default_tests(),
        };
        env.set_variable("namespace", Value::function(namespace));
        env
    }
}

impl Default for Environment<'static> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'p> Environment<'p> {
    pub fn child(&self) -> Environment<'_> {
        Environment {
            parent: Some(self),
            variables: RefCell::new(HashMap::new()),
            tests: HashMap::new(),
        }
    }

    /// Define `name` in this scope. Redefining a name in the same scope is
    /// an error.
    pub fn declare(&self, name: &str, value: Value) -> Result<()> {
        let mut vars = self.variables.borrow_mut();
        if vars.contains_key(name) {
            return Err(Error::syntax(format!("Variable already declared: {}", name)));
        }
        vars.insert(name.to_string(), value);
        Ok(())
    }

    /// Convert `value` and declare it under `name`.
    pub fn set(&self, name: &str, value: &HostValue) -> Result<()> {
        self.declare(name, Self::convert(value)?)
    }

    /// Define or overwrite `name` in this scope.
    pub fn set_variable(&self, name: &str, value: Value) {
        self.variables.borrow_mut().insert(name.to_string(), value);
    }

    /// `{% set %}` semantics: overwrite the binding in whichever scope
    /// already holds `name`, otherwise create it here.
    pub fn assign(&self, name: &str, value: Value) {
        match self.resolve(name) {
            Ok(scope) => scope.set_variable(name, value),
            Err(_) => self.set_variable(name, value),
        }
    }

    /// The nearest scope, starting from this one, that defines `name`.
    pub fn resolve(&self, name: &str) -> Result<&Environment<'p>> {
        let mut scope: &Environment<'p> = self;
        loop {
            if scope.variables.borrow().contains_key(name) {
                return Ok(scope);
            }
            match scope.parent {
                Some(parent) => scope = parent,
                None => {
                    return Err(Error::runtime(format!("Unknown variable: {}", name)));
                }
            }
        }
    }

    /// The value of `name`, or `Undefined` when no scope defines it.
    pub fn lookup(&self, name: &str) -> Value {
        match self.resolve(name) {
            Ok(scope) => scope
                .variables
                .borrow()
                .get(name)
                .cloned()
                .unwrap_or(Value::Undefined),
            Err(_) => Value::Undefined,
        }
    }

    pub fn test(&self, name: &str) -> Option<TestFn> {
        let mut scope: &Environment<'p> = self;
        loop {
            if let Some(test) = scope.tests.get(name) {
                return Some(*test);
            }
            scope = scope.parent?;
        }
    }

    pub fn add_test(&mut self, name: &'static str, test: TestFn) {
        self.tests.insert(name, test);
    }

    /// Turn host data into a runtime value.
    pub fn convert(value: &HostValue) -> Result<Value> {
        Ok(match value {
            HostValue::Null => Value::Null,
            HostValue::Bool(b) => Value::Boolean(*b),
            HostValue::Int(i) => Value::int(*i),
            HostValue::Float(f) => Value::Numeric(Number::Float(*f)),
            HostValue::String(s) => Value::String(s.clone()),
            HostValue::Array(items) => {
                Value::Array(items.iter().map(Self::convert).collect::<Result<_>>()?)
            }
            HostValue::Map(map) => {
                let mut converted = IndexMap::with_capacity(map.len());
                for (key, value) in map {
                    converted.insert(key.clone(), Self::convert(value)?);
                }
                Value::object(converted)
            }
            HostValue::Function(f) => Value::Function(f.adapt()?),
        })
    }
}

fn namespace(args: &[Value], _: &Environment<'_>) -> Result<Value> {
    match args {
        [] => Ok(Value::object(IndexMap::new())),
        [Value::Object(map)] => Ok(Value::Object(map.clone())),
        _ => Err(Error::runtime(
            "`namespace` expects either zero arguments or a single object argument",
        )),
    }
}

fn integer_operand(args: &[Value], test: &str) -> Result<i64> {
    match args.first() {
        Some(Value::Numeric(n)) => n.as_integer(),
        Some(other) => Err(Error::runtime(format!(
            "Cannot apply test '{}' to type: {}",
            test,
            other.type_name()
        ))),
        None => Err(Error::runtime(format!("Test '{}' needs an operand", test))),
    }
}

fn default_tests() -> HashMap<&'static str, TestFn> {
    let mut tests: HashMap<&'static str, TestFn> = HashMap::new();
    tests.insert("boolean", |a| Ok(matches!(a.first(), Some(Value::Boolean(_)))));
    tests.insert("callable", |a| Ok(matches!(a.first(), Some(Value::Function(_)))));
    tests.insert("odd", |a| Ok(integer_operand(a, "odd")? % 2 != 0));
    tests.insert("even", |a| Ok(integer_operand(a, "even")? % 2 == 0));
    tests.insert("false", |a| Ok(matches!(a.first(), Some(Value::Boolean(false)))));
    tests.insert("true", |a| Ok(matches!(a.first(), Some(Value::Boolean(true)))));
    tests.insert("number", |a| Ok(matches!(a.first(), Some(Value::Numeric(_)))));
    tests.insert("integer", |a| {
        Ok(matches!(a.first(), Some(Value::Numeric(Number::Int(_)))))
    });
    tests.insert("iterable", |a| {
        Ok(matches!(a.first(), Some(Value::Array(_) | Value::String(_))))
    });
    tests.insert("string", |a| Ok(matches!(a.first(), Some(Value::String(_)))));
    tests.insert("mapping", |a| Ok(matches!(a.first(), Some(Value::Object(_)))));
    tests.insert("lower", |a| {
        Ok(matches!(a.first(), Some(Value::String(s)) if *s == s.to_lowercase()))
    });
    tests.insert("upper", |a| {
        Ok(matches!(a.first(), Some(Value::String(s)) if *s == s.to_uppercase()))
    });
    tests.insert("none", |a| Ok(matches!(a.first(), Some(Value::Null))));
    tests.insert("defined", |a| Ok(!matches!(a.first(), None | Some(Value::Undefined))));
    tests.insert("undefined", |a| Ok(matches!(a.first(), None | Some(Value::Undefined))));
    tests.insert("equalto", |a| match a {
        [value, other] => Ok(value.loose_eq(other)),
        _ => Err(Error::runtime("Test 'equalto' expects exactly one argument")),
    });
    tests
}

type HostCallback = dyn Fn(&[Value]) -> Result<Value> + Send + Sync;

/// A host callback exposed to templates.
///
/// Templates may call it with fewer arguments than its arity; missing
/// trailing arguments arrive as `Value::Undefined`.
#[derive(Clone)]
pub struct HostFunction {
    arity: usize,
    callback: Arc<HostCallback>,
}

impl HostFunction {
    pub fn new(
        arity: usize,
        callback: impl Fn(&[Value]) -> Result<Value> + Send + Sync + 'static,
    ) -> Self {
        HostFunction {
            arity,
            callback: Arc::new(callback),
        }
    }

    pub fn unary(f: impl Fn(Value) -> Result<Value> + Send + Sync + 'static) -> Self {
        Self::new(1, move |args| f(args[0].clone()))
    }

    pub fn binary(f: impl Fn(Value, Value) -> Result<Value> + Send + Sync + 'static) -> Self {
        Self::new(2, move |args| f(args[0].clone(), args[1].clone()))
    }

    pub fn ternary(
        f: impl Fn(Value, Value, Value) -> Result<Value> + Send + Sync + 'static,
    ) -> Self {
        Self::new(3, move |args| {
            f(args[0].clone(), args[1].clone(), args[2].clone())
        })
    }

    pub fn arity(&self) -> usize {
        self.arity
    }

    fn adapt(&self) -> Result<Function> {
        if !(1..=3).contains(&self.arity) {
            return Err(Error::runtime(format!(
                "Unsupported function arity: {} (expected 1 to 3)",
                self.arity
            )));
        }
        let arity = self.arity;
        let callback = Arc::clone(&self.callback);
        Ok(Function::new(move |args, _| {
            if args.len() > arity {
                return Err(Error::runtime(format!(
                    "Function expects at most {} arguments, got {}",
                    arity,
                    args.len()
                )));
            }
            let mut padded = args.to_vec();
            padded.resize(arity, Value::Undefined);
            callback(&padded)
        }))
    }
}

impl fmt::Debug for HostFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<host function/{}>", self.arity)
    }
}

/// Plain data handed in by the caller. Unlike [`Value`] it is `Send + Sync`,
/// so a render context can be built on one thread and rendered on another.
#[derive(Debug, Clone)]
pub enum HostValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Array(Vec<HostValue>),
    Map(IndexMap<String, HostValue>),
    Function(HostFunction),
}

impl From<bool> for HostValue {
    fn from(b: bool) -> Self {
        HostValue::Bool(b)
    }
}

impl From<i64> for HostValue {
    fn from(i: i64) -> Self {
        HostValue::Int(i)
    }
}

impl From<i32> for HostValue {
    fn from(i: i32) -> Self {
        HostValue::Int(i64::from(i))
    }
}

impl From<f64> for HostValue {
    fn from(f: f64) -> Self {
        HostValue::Float(f)
    }
}

impl From<&str> for HostValue {
    fn from(s: &str) -> Self {
        HostValue::String(s.to_string())
    }
}

impl From<String> for HostValue {
    fn from(s: String) -> Self {
        HostValue::String(s)
    }
}

impl<T: Into<HostValue>> From<Vec<T>> for HostValue {
    fn from(items: Vec<T>) -> Self {
        HostValue::Array(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<HostValue>> From<Option<T>> for HostValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(HostValue::Null, Into::into)
    }
}

impl From<IndexMap<String, HostValue>> for HostValue {
    fn from(map: IndexMap<String, HostValue>) -> Self {
        HostValue::Map(map)
    }
}

impl From<HostFunction> for HostValue {
    fn from(f: HostFunction) -> Self {
        HostValue::Function(f)
    }
}

impl From<serde_json::Value> for HostValue {
    fn from(json: serde_json::Value) -> Self {
        use serde_json::Value as Json;
        match json {
            Json::Null => HostValue::Null,
            Json::Bool(b) => HostValue::Bool(b),
            Json::Number(n) => match n.as_i64() {
                Some(i) => HostValue::Int(i),
                None => HostValue::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Json::String(s) => HostValue::String(s),
            Json::Array(items) => HostValue::Array(items.into_iter().map(Into::into).collect()),
            Json::Object(map) => {
                HostValue::Map(map.into_iter().map(|(k, v)| (k, v.into())).collect())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn declare_rejects_redefinition_in_same_scope() {
        let env = Environment::new();
        env.declare("x", Value::int(1)).unwrap();
        let err = env.declare("x", Value::int(2)).unwrap_err();
        assert!(matches!(err, Error::Syntax(_)));

        let child = env.child();
        child.declare("x", Value::int(3)).unwrap();
        assert_eq!(child.lookup("x"), Value::int(3));
        assert_eq!(env.lookup("x"), Value::int(1));
    }

    #[test]
    fn assign_updates_the_defining_scope() {
        let env = Environment::new();
        env.declare("count", Value::int(0)).unwrap();
        {
            let child = env.child();
            child.assign("count", Value::int(5));
            child.assign("local", Value::int(1));
            assert_eq!(child.lookup("local"), Value::int(1));
        }
        assert_eq!(env.lookup("count"), Value::int(5));
        assert_eq!(env.lookup("local"), Value::Undefined);
    }

    #[test]
    fn resolve_reports_unknown_names() {
        let env = Environment::new();
        assert!(matches!(env.resolve("missing"), Err(Error::Runtime(_))));
        assert_eq!(env.lookup("missing"), Value::Undefined);
    }

    #[test]
    fn tests_are_found_through_child_scopes() {
        let env = Environment::new();
        let child = env.child();
        let odd = child.test("odd").unwrap();
        assert!(odd(&[Value::int(3)]).unwrap());
        assert!(odd(&[Value::Numeric(Number::Float(1.5))]).is_err());
        assert!(child.test("prime").is_none());

        let equalto = env.test("equalto").unwrap();
        assert!(equalto(&[Value::int(2), Value::Numeric(Number::Float(2.0))]).unwrap());
        assert!(equalto(&[Value::int(2)]).is_err());
    }

    #[test]
    fn custom_tests_can_be_added() {
        let mut env = Environment::new();
        env.add_test("empty", |a| Ok(matches!(a.first(), Some(Value::String(s)) if s.is_empty())));
        assert!(env.test("empty").unwrap()(&[Value::from("")]).unwrap());
    }

    #[test]
    fn namespace_shares_its_object() {
        let env = Environment::new();
        let Value::Function(ns) = env.lookup("namespace") else {
            panic!("namespace is not callable")
        };
        let created = ns.call(&[], &env).unwrap();
        assert!(matches!(created, Value::Object(_)));
        assert!(ns.call(&[Value::int(1)], &env).is_err());
    }

    #[test]
    fn converts_json_preserving_key_order() {
        let host = HostValue::from(json!({"b": 1, "a": [true, null, 2.5, "x"]}));
        let Value::Object(map) = Environment::convert(&host).unwrap() else {
            panic!("expected object")
        };
        let keys: Vec<String> = map.borrow().keys().cloned().collect();
        assert_eq!(keys, ["b", "a"]);
        assert_eq!(
            map.borrow()["a"],
            Value::Array(vec![
                Value::Boolean(true),
                Value::Null,
                Value::Numeric(Number::Float(2.5)),
                Value::from("x"),
            ])
        );
    }

    #[test]
    fn host_functions_pad_missing_arguments() {
        let env = Environment::new();
        let f = HostFunction::binary(|a, b| {
            Ok(Value::Boolean(matches!(b, Value::Undefined) && a == Value::int(1)))
        });
        let Value::Function(f) = Environment::convert(&f.into()).unwrap() else {
            panic!("expected function")
        };
        assert_eq!(f.call(&[Value::int(1)], &env).unwrap(), Value::Boolean(true));
        assert!(f.call(&[Value::int(1), Value::int(2), Value::int(3)], &env).is_err());
    }

    #[test]
    fn host_function_arity_is_validated() {
        let zero = HostValue::Function(HostFunction::new(0, |_| Ok(Value::Null)));
        assert!(matches!(Environment::convert(&zero), Err(Error::Runtime(_))));
        let four = HostValue::Function(HostFunction::new(4, |_| Ok(Value::Null)));
        assert!(Environment::convert(&four).is_err());
    }
}
