use crate::ast::*;
use crate::environment::Environment;
use crate::error::{Error, Result};
use crate::value::{self, object_items, title_case, Number, Value};
use indexmap::IndexMap;
use std::cmp::Ordering;

/// Walks a [`Program`] against a root [`Environment`] and produces text.
///
/// Rendering never mutates the program. All state lives in the environment
/// and the scopes created beneath it, so one program can be rendered many
/// times with fresh interpreters.
pub struct Interpreter {
    global: Environment<'static>,
}

impl Interpreter {
    pub fn new(global: Environment<'static>) -> Self {
        Self { global }
    }

    pub fn environment(&self) -> &Environment<'static> {
        &self.global
    }

    pub fn run(&self, program: &Program) -> Result<String> {
        tracing::debug!(nodes = program.body.len(), "rendering template");
        let out = self.evaluate_block(&program.body, &self.global)?;
        tracing::debug!(bytes = out.len(), "rendered template");
        Ok(out)
    }

    fn evaluate_block(&self, nodes: &[Node], env: &Environment<'_>) -> Result<String> {
        let mut out = String::new();
        for node in nodes {
            match self.evaluate_node(node, env)? {
                Value::Null | Value::Undefined => {}
                Value::String(s) => out.push_str(&s),
                Value::Numeric(n) => out.push_str(&n.to_string()),
                other => {
                    return Err(Error::runtime(format!(
                        "Cannot render value of type {}",
                        other.type_name()
                    )))
                }
            }
        }
        Ok(out)
    }

    fn evaluate_node(&self, node: &Node, env: &Environment<'_>) -> Result<Value> {
        match node {
            Node::Text(text) => Ok(Value::String(text.clone())),
            Node::Expr(expr) => self.evaluate(expr, env),
            Node::Set { assignee, value } => {
                self.evaluate_set(assignee, value, env)?;
                Ok(Value::Null)
            }
            Node::If {
                test,
                body,
                alternate,
            } => {
                let branch = if self.evaluate(test, env)?.is_truthy() {
                    body
                } else {
                    alternate
                };
                self.evaluate_block(branch, env).map(Value::String)
            }
            Node::For {
                target,
                iterable,
                body,
            } => self.evaluate_for(target, iterable, body, env),
        }
    }

    fn evaluate_set(&self, assignee: &Expr, value: &Expr, env: &Environment<'_>) -> Result<()> {
        let rhs = self.evaluate(value, env)?;
        match assignee {
            Expr::Identifier(name) => {
                env.assign(name, rhs);
                Ok(())
            }
            Expr::Member {
                object, property, ..
            } => {
                let Expr::Identifier(key) = property.as_ref() else {
                    return Err(Error::runtime(format!(
                        "Cannot assign to member with non-identifier property: {}",
                        property.kind_name()
                    )));
                };
                match self.evaluate(object, env)? {
                    Value::Object(map) => {
                        map.borrow_mut().insert(key.clone(), rhs);
                        Ok(())
                    }
                    other => Err(Error::runtime(format!(
                        "Cannot assign to member of non-object: {}",
                        other.type_name()
                    ))),
                }
            }
            other => Err(Error::runtime(format!(
                "Invalid assignee type: {}",
                other.kind_name()
            ))),
        }
    }

    fn evaluate_for(
        &self,
        target: &LoopTarget,
        iterable: &Expr,
        body: &[Node],
        env: &Environment<'_>,
    ) -> Result<Value> {
        let scope = env.child();
        let items = match self.evaluate(iterable, &scope)? {
            Value::Array(items) => items,
            other => {
                return Err(Error::runtime(format!(
                    "Expected iterable type in for loop: got {}",
                    other.type_name()
                )))
            }
        };

        let length = items.len();
        let mut out = String::new();
        for (i, current) in items.iter().enumerate() {
            let mut info = IndexMap::new();
            info.insert("index".to_string(), Value::int(i as i64 + 1));
            info.insert("index0".to_string(), Value::int(i as i64));
            info.insert("revindex".to_string(), Value::int((length - i) as i64));
            info.insert("revindex0".to_string(), Value::int((length - i - 1) as i64));
            info.insert("first".to_string(), Value::Boolean(i == 0));
            info.insert("last".to_string(), Value::Boolean(i + 1 == length));
            info.insert("length".to_string(), Value::int(length as i64));
            info.insert(
                "previtem".to_string(),
                i.checked_sub(1)
                    .map_or(Value::Undefined, |p| items[p].clone()),
            );
            info.insert(
                "nextitem".to_string(),
                items.get(i + 1).cloned().unwrap_or(Value::Undefined),
            );
            scope.set_variable("loop", Value::object(info));

            match target {
                LoopTarget::Identifier(name) => scope.set_variable(name, current.clone()),
                LoopTarget::Tuple(names) => {
                    let Value::Array(parts) = current else {
                        return Err(Error::runtime(format!(
                            "Cannot unpack non-iterable type: {}",
                            current.type_name()
                        )));
                    };
                    match names.len().cmp(&parts.len()) {
                        Ordering::Greater => {
                            return Err(Error::runtime("Too few items to unpack"))
                        }
                        Ordering::Less => return Err(Error::runtime("Too many items to unpack")),
                        Ordering::Equal => {}
                    }
                    for (name, part) in names.iter().zip(parts) {
                        scope.set_variable(name, part.clone());
                    }
                }
            }

            out.push_str(&self.evaluate_block(body, &scope)?);
        }
        Ok(Value::String(out))
    }

    fn evaluate(&self, expr: &Expr, env: &Environment<'_>) -> Result<Value> {
        match expr {
            Expr::StringLit(s) => Ok(Value::String(s.clone())),
            Expr::NumericLit(n) => Ok(Value::Numeric(*n)),
            Expr::BoolLit(b) => Ok(Value::Boolean(*b)),
            Expr::NullLit => Ok(Value::Null),
            Expr::ArrayLit(items) | Expr::TupleLit(items) => Ok(Value::Array(
                items
                    .iter()
                    .map(|item| self.evaluate(item, env))
                    .collect::<Result<_>>()?,
            )),
            Expr::ObjectLit(pairs) => {
                let mut map = IndexMap::with_capacity(pairs.len());
                for (key, value) in pairs {
                    let key = match self.evaluate(key, env)? {
                        Value::String(key) => key,
                        other => {
                            return Err(Error::runtime(format!(
                                "Object keys must be strings: got {}",
                                other.type_name()
                            )))
                        }
                    };
                    map.insert(key, self.evaluate(value, env)?);
                }
                Ok(Value::object(map))
            }
            Expr::Identifier(name) => Ok(env.lookup(name)),
            Expr::Member {
                object,
                property,
                computed,
            } => self.evaluate_member(object, property, *computed, env),
            Expr::Call { callee, args } => self.evaluate_call(callee, args, env),
            Expr::Binary { op, left, right } => self.evaluate_binary(*op, left, right, env),
            Expr::Unary { op, argument } => {
                let value = self.evaluate(argument, env)?;
                unary(*op, value)
            }
            Expr::Filter { operand, filter } => {
                let value = self.evaluate(operand, env)?;
                if let Filter::Call { name, args } = filter {
                    if !args.is_empty() {
                        return Err(Error::runtime(format!(
                            "Filter `{}` does not take arguments",
                            name
                        )));
                    }
                }
                apply_filter(filter.name(), value)
            }
            Expr::Test {
                operand,
                negate,
                name,
                args,
            } => {
                let test = env
                    .test(name)
                    .ok_or_else(|| Error::runtime(format!("Unknown test: {}", name)))?;
                let mut values = Vec::with_capacity(args.len() + 1);
                values.push(self.evaluate(operand, env)?);
                for arg in args {
                    values.push(self.evaluate(arg, env)?);
                }
                tracing::trace!(test = %name, operand = values[0].type_name(), "applying test");
                Ok(Value::Boolean(test(&values)? != *negate))
            }
            Expr::Conditional {
                test,
                then,
                otherwise,
            } => {
                if self.evaluate(test, env)?.is_truthy() {
                    self.evaluate(then, env)
                } else {
                    self.evaluate(otherwise, env)
                }
            }
            Expr::Slice { .. } | Expr::KeywordArgument { .. } => Err(Error::runtime(format!(
                "Unexpected {} outside of a subscript or call",
                expr.kind_name()
            ))),
        }
    }

    fn evaluate_member(
        &self,
        object: &Expr,
        property: &Expr,
        computed: bool,
        env: &Environment<'_>,
    ) -> Result<Value> {
        let object = self.evaluate(object, env)?;

        let key = if computed {
            if let Expr::Slice { start, stop, step } = property {
                let bound = |e: &Option<Box<Expr>>| self.slice_bound(e.as_deref(), env);
                return slice_value(&object, bound(start)?, bound(stop)?, bound(step)?);
            }
            self.evaluate(property, env)?
        } else {
            match property {
                Expr::Identifier(name) => Value::String(name.clone()),
                other => {
                    return Err(Error::runtime(format!(
                        "Expected identifier after `.`, got {}",
                        other.kind_name()
                    )))
                }
            }
        };

        let found = match (&object, &key) {
            (Value::Object(map), Value::String(name)) => {
                let field = map.borrow().get(name).cloned();
                field.or_else(|| object.builtin(name))
            }
            (Value::Object(_), other) => {
                return Err(Error::runtime(format!(
                    "Cannot access object property with non-string key: got {}",
                    other.type_name()
                )))
            }
            (Value::Array(items), Value::Numeric(n)) => {
                Some(items[resolve_index(items.len(), *n)?].clone())
            }
            (Value::String(s), Value::Numeric(n)) => {
                let chars: Vec<char> = s.chars().collect();
                Some(Value::String(chars[resolve_index(chars.len(), *n)?].to_string()))
            }
            (Value::Array(_) | Value::String(_), Value::String(name)) => object.builtin(name),
            (Value::Array(_) | Value::String(_), other) => {
                return Err(Error::runtime(format!(
                    "Cannot access {} with key of type {}",
                    object.type_name(),
                    other.type_name()
                )))
            }
            (other, _) => {
                return Err(Error::runtime(format!(
                    "Cannot access property of {}",
                    other.type_name()
                )))
            }
        };
        Ok(found.unwrap_or(Value::Undefined))
    }

    fn slice_bound(&self, bound: Option<&Expr>, env: &Environment<'_>) -> Result<Option<i64>> {
        let Some(expr) = bound else {
            return Ok(None);
        };
        match self.evaluate(expr, env)? {
            Value::Numeric(n) => n.as_integer().map(Some),
            Value::Undefined | Value::Null => Ok(None),
            other => Err(Error::runtime(format!(
                "Slice bounds must be integers: got {}",
                other.type_name()
            ))),
        }
    }

    fn evaluate_call(&self, callee: &Expr, args: &[Expr], env: &Environment<'_>) -> Result<Value> {
        let mut positional = Vec::with_capacity(args.len());
        let mut keywords = IndexMap::new();
        for arg in args {
            match arg {
                Expr::KeywordArgument { key, value } => {
                    keywords.insert(key.clone(), self.evaluate(value, env)?);
                }
                other => positional.push(self.evaluate(other, env)?),
            }
        }
        if !keywords.is_empty() {
            positional.push(Value::object(keywords));
        }

        match self.evaluate(callee, env)? {
            Value::Function(f) => f.call(&positional, env),
            other => Err(Error::runtime(format!(
                "Cannot call something that is not a function: got {}",
                other.type_name()
            ))),
        }
    }

    fn evaluate_binary(
        &self,
        op: BinaryOp,
        left: &Expr,
        right: &Expr,
        env: &Environment<'_>,
    ) -> Result<Value> {
        let left = self.evaluate(left, env)?;
        match op {
            BinaryOp::And if !left.is_truthy() => return Ok(left),
            BinaryOp::Or if left.is_truthy() => return Ok(left),
            BinaryOp::And | BinaryOp::Or => return self.evaluate(right, env),
            _ => {}
        }
        let right = self.evaluate(right, env)?;
        binary(op, &left, &right)
    }
}

fn resolve_index(len: usize, n: Number) -> Result<usize> {
    let index = n.as_integer()?;
    let resolved = if index < 0 { index + len as i64 } else { index };
    if resolved < 0 || resolved >= len as i64 {
        return Err(Error::runtime(format!(
            "Index {} out of range for length {}",
            index, len
        )));
    }
    Ok(resolved as usize)
}

fn slice_value(
    object: &Value,
    start: Option<i64>,
    stop: Option<i64>,
    step: Option<i64>,
) -> Result<Value> {
    match object {
        Value::Array(items) => Ok(Value::Array(value::slice(items, start, stop, step)?)),
        Value::String(s) => {
            let chars: Vec<char> = s.chars().collect();
            Ok(Value::String(
                value::slice(&chars, start, stop, step)?.into_iter().collect(),
            ))
        }
        other => Err(Error::runtime(format!(
            "Slice object must be an array or string: got {}",
            other.type_name()
        ))),
    }
}

fn unary(op: UnaryOp, value: Value) -> Result<Value> {
    match (op, value) {
        (UnaryOp::Not, value) => Ok(Value::Boolean(!value.is_truthy())),
        (UnaryOp::Plus, Value::Numeric(n)) => Ok(Value::Numeric(n)),
        (UnaryOp::Minus, Value::Numeric(Number::Int(i))) => i
            .checked_neg()
            .map(Value::int)
            .ok_or_else(|| Error::runtime(format!("Integer overflow in -{}", i))),
        (UnaryOp::Minus, Value::Numeric(Number::Float(f))) => Ok(Value::Numeric(Number::Float(-f))),
        (_, other) => Err(Error::runtime(format!(
            "Unary operator cannot be applied to {}",
            other.type_name()
        ))),
    }
}

fn binary(op: BinaryOp, left: &Value, right: &Value) -> Result<Value> {
    match op {
        BinaryOp::Eq => return strict_eq(left, right).map(Value::Boolean),
        BinaryOp::NotEq => return Ok(Value::Boolean(!left.loose_eq(right))),
        _ => {}
    }

    for value in [left, right] {
        match value {
            Value::Undefined => {
                return Err(Error::runtime(format!(
                    "Cannot perform operation {} on undefined values",
                    op
                )))
            }
            Value::Null => {
                return Err(Error::runtime(format!(
                    "Cannot perform operation {} on null values",
                    op
                )))
            }
            _ => {}
        }
    }

    if matches!(op, BinaryOp::In | BinaryOp::NotIn) {
        let found = contains(right, left)?;
        return Ok(Value::Boolean(found == (op == BinaryOp::In)));
    }

    match (left, right) {
        (Value::Numeric(a), Value::Numeric(b)) => numeric(op, *a, *b),
        (Value::Array(a), Value::Array(b)) if op == BinaryOp::Add => {
            Ok(Value::Array(a.iter().chain(b).cloned().collect()))
        }
        (Value::String(a), Value::String(b)) if is_comparison(op) => {
            Ok(Value::Boolean(compare(op, a.cmp(b))))
        }
        (Value::String(_), _) | (_, Value::String(_)) if op == BinaryOp::Add => {
            let mut joined = concat_text(left)?;
            joined.push_str(&concat_text(right)?);
            Ok(Value::String(joined))
        }
        _ => Err(Error::runtime(format!(
            "Unknown operator \"{}\" between {} and {}",
            op,
            left.type_name(),
            right.type_name()
        ))),
    }
}

fn strict_eq(left: &Value, right: &Value) -> Result<bool> {
    match (left, right) {
        (Value::String(a), Value::String(b)) => Ok(a == b),
        (Value::Numeric(a), Value::Numeric(b)) => Ok(a.num_eq(*b)),
        (Value::Boolean(a), Value::Boolean(b)) => Ok(a == b),
        _ => Err(Error::runtime(format!(
            "Cannot compare {} with {} using ==",
            left.type_name(),
            right.type_name()
        ))),
    }
}

fn contains(container: &Value, item: &Value) -> Result<bool> {
    match (container, item) {
        (Value::String(haystack), Value::String(needle)) => Ok(haystack.contains(needle.as_str())),
        (Value::Array(items), item) => Ok(items.iter().any(|v| v.loose_eq(item))),
        (Value::Object(map), Value::String(key)) => Ok(map.borrow().contains_key(key)),
        _ => Err(Error::runtime(format!(
            "Cannot check whether {} is in {}",
            item.type_name(),
            container.type_name()
        ))),
    }
}

fn concat_text(value: &Value) -> Result<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Numeric(n) => Ok(n.to_string()),
        Value::Boolean(b) => Ok(b.to_string()),
        other => Err(Error::runtime(format!(
            "Cannot concatenate {} to a string",
            other.type_name()
        ))),
    }
}

fn is_comparison(op: BinaryOp) -> bool {
    matches!(op, BinaryOp::Lt | BinaryOp::Gt | BinaryOp::Le | BinaryOp::Ge)
}

fn compare(op: BinaryOp, ordering: Ordering) -> bool {
    match op {
        BinaryOp::Lt => ordering == Ordering::Less,
        BinaryOp::Gt => ordering == Ordering::Greater,
        BinaryOp::Le => ordering != Ordering::Greater,
        _ => ordering != Ordering::Less,
    }
}

fn numeric(op: BinaryOp, a: Number, b: Number) -> Result<Value> {
    let overflow = || Error::runtime(format!("Integer overflow in {} {} {}", a, op, b));
    let result = match (op, a, b) {
        (BinaryOp::Div | BinaryOp::Mod, _, b) if b.is_zero() => {
            return Err(Error::runtime(if op == BinaryOp::Div {
                "Division by zero"
            } else {
                "Modulo by zero"
            }))
        }
        (BinaryOp::Div, a, b) => Number::Float(a.as_f64() / b.as_f64()),
        (BinaryOp::Add, Number::Int(x), Number::Int(y)) => {
            Number::Int(x.checked_add(y).ok_or_else(overflow)?)
        }
        (BinaryOp::Sub, Number::Int(x), Number::Int(y)) => {
            Number::Int(x.checked_sub(y).ok_or_else(overflow)?)
        }
        (BinaryOp::Mul, Number::Int(x), Number::Int(y)) => {
            Number::Int(x.checked_mul(y).ok_or_else(overflow)?)
        }
        (BinaryOp::Mod, Number::Int(x), Number::Int(y)) => {
            // Result takes the sign of the divisor.
            let r = x.checked_rem(y).ok_or_else(overflow)?;
            Number::Int(if r != 0 && (r < 0) != (y < 0) { r + y } else { r })
        }
        (BinaryOp::Add, a, b) => Number::Float(a.as_f64() + b.as_f64()),
        (BinaryOp::Sub, a, b) => Number::Float(a.as_f64() - b.as_f64()),
        (BinaryOp::Mul, a, b) => Number::Float(a.as_f64() * b.as_f64()),
        (BinaryOp::Mod, a, b) => {
            let (x, y) = (a.as_f64(), b.as_f64());
            let r = x % y;
            Number::Float(if r != 0.0 && (r < 0.0) != (y < 0.0) { r + y } else { r })
        }
        (op, Number::Int(x), Number::Int(y)) if is_comparison(op) => {
            return Ok(Value::Boolean(compare(op, x.cmp(&y))))
        }
        (op, a, b) if is_comparison(op) => {
            let (x, y) = (a.as_f64(), b.as_f64());
            return Ok(Value::Boolean(match op {
                BinaryOp::Lt => x < y,
                BinaryOp::Gt => x > y,
                BinaryOp::Le => x <= y,
                _ => x >= y,
            }));
        }
        (op, _, _) => {
            return Err(Error::runtime(format!(
                "Unknown operator \"{}\" between numbers",
                op
            )))
        }
    };
    Ok(Value::Numeric(result))
}

fn apply_filter(name: &str, value: Value) -> Result<Value> {
    tracing::trace!(filter = name, operand = value.type_name(), "applying filter");
    match (name, &value) {
        ("list", Value::Array(_)) => Ok(value.clone()),
        ("list", Value::String(s)) => Ok(Value::Array(
            s.chars().map(|c| Value::String(c.to_string())).collect(),
        )),
        ("first", Value::Array(items)) => Ok(items.first().cloned().unwrap_or(Value::Undefined)),
        ("last", Value::Array(items)) => Ok(items.last().cloned().unwrap_or(Value::Undefined)),
        ("length", Value::Array(items)) => Ok(Value::int(items.len() as i64)),
        ("reverse", Value::Array(items)) => Ok(Value::Array(items.iter().rev().cloned().collect())),
        ("sort", Value::Array(_)) => Err(Error::not_supported("the `sort` filter")),
        ("length", Value::String(s)) => Ok(Value::int(s.chars().count() as i64)),
        ("upper", Value::String(s)) => Ok(Value::String(s.to_uppercase())),
        ("lower", Value::String(s)) => Ok(Value::String(s.to_lowercase())),
        ("title" | "capitalize", Value::String(s)) => Ok(Value::String(title_case(s))),
        ("trim", Value::String(s)) => Ok(Value::String(s.trim().to_string())),
        ("abs", Value::Numeric(Number::Int(i))) => i
            .checked_abs()
            .map(Value::int)
            .ok_or_else(|| Error::runtime(format!("Integer overflow in abs({})", i))),
        ("abs", Value::Numeric(Number::Float(f))) => Ok(Value::Numeric(Number::Float(f.abs()))),
        ("items", Value::Object(map)) => Ok(object_items(map)),
        ("length", Value::Object(map)) => Ok(Value::int(map.borrow().len() as i64)),
        _ => Err(Error::runtime(format!(
            "Unknown {} filter: {}",
            value.type_name(),
            name
        ))),
    }
}
