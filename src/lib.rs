//! chatjinja: a Jinja-style template engine for LLM `chat_template` strings.
//!
//! This crate evaluates a decoded Hugging Face `chat_template` string against
//! a list of messages (plus tokens such as `bos_token`/`eos_token` and flags
//! such as `add_generation_prompt`) and returns the rendered prompt.
//!
//! The pipeline is preprocess → tokenize → parse → interpret:
//! - [`preprocess`] strips comments and applies `trim_blocks` /
//!   `lstrip_blocks` and the `-` whitespace-control markers.
//! - [`lexer`] turns the text into [`lexer::Token`]s.
//! - [`parser`] builds an immutable [`Program`].
//! - [`Interpreter`] walks the program inside a fresh [`Environment`].
//!
//! Supported subset:
//! - `{{ expr }}`, `{% set %}`, `{% if %}`/`{% elif %}`/`{% else %}`,
//!   `{% for x in xs %}` (including `for k, v in ...` unpacking) and
//!   `{# comments #}`.
//! - Arithmetic, comparisons, `and`/`or`/`not`, `in`/`not in`,
//!   `a if cond else b`, member access, calls with keyword arguments and
//!   Python-style slicing.
//! - Filters (`upper`, `lower`, `title`, `trim`, `length`, `first`, `last`,
//!   `reverse`, `list`, `abs`, `items`, ...) and tests (`defined`, `none`,
//!   `odd`, `equalto(x)`, ...).
//! - Globals `namespace()`, `range()` and `raise_exception()`.
//!
//! Not supported:
//! - Macros, `include`/`extends`, blocks and autoescaping.
//! - Filter arguments and the `sort` filter.
//!
//! Newline semantics:
//! - Newlines are only those present in the `chat_template` string itself
//!   (after JSON decoding), minus those removed by whitespace control.
//! - The engine never injects extra `\n` characters.
//!
//! ```
//! use chatjinja::{render_chat_template, ChatMessage};
//!
//! let template = "{% for message in messages %}{{ message.role }}: {{ message.content }}\n{% endfor %}";
//! let messages = vec![ChatMessage::new("user", "Hello")];
//! assert_eq!(render_chat_template(template, &messages).unwrap(), "user: Hello\n");
//! ```

pub mod ast;
pub mod environment;
mod error;
mod eval;
pub mod lexer;
pub mod parser;
pub mod preprocess;
pub mod value;

pub use ast::Program;
pub use environment::{Environment, HostFunction, HostValue, TestFn};
pub use error::{Error, Result};
pub use eval::Interpreter;
pub use preprocess::PreprocessOptions;
pub use value::{Function, Number, Value};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// A single chat message in HF-style templates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

impl From<&ChatMessage> for HostValue {
    fn from(message: &ChatMessage) -> Self {
        let mut map = IndexMap::new();
        map.insert("role".to_string(), HostValue::from(message.role.as_str()));
        map.insert("content".to_string(), HostValue::from(message.content.as_str()));
        HostValue::Map(map)
    }
}

/// Variables visible to a template render, in insertion order.
#[derive(Debug, Clone, Default)]
pub struct RenderContext {
    vars: IndexMap<String, HostValue>,
}

impl RenderContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `name`, replacing any earlier binding.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<HostValue>) -> &mut Self {
        self.vars.insert(name.into(), value.into());
        self
    }

    /// Shorthand for string variables such as `eos_token`.
    pub fn set_var(&mut self, name: &str, value: &str) -> &mut Self {
        self.set(name, value)
    }

    /// Shorthand for boolean flags such as `add_generation_prompt`.
    pub fn set_flag(&mut self, name: &str, value: bool) -> &mut Self {
        self.set(name, value)
    }

    pub fn get(&self, name: &str) -> Option<&HostValue> {
        self.vars.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &HostValue)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Build a context from a JSON object such as
    /// `{"messages": [...], "bos_token": "<s>", "add_generation_prompt": true}`.
    pub fn from_json(json: serde_json::Value) -> Result<Self> {
        match json {
            serde_json::Value::Object(map) => Ok(Self {
                vars: map.into_iter().map(|(k, v)| (k, v.into())).collect(),
            }),
            other => Err(Error::runtime(format!(
                "Render context must be a JSON object, got {}",
                json_kind(&other)
            ))),
        }
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

/// Preprocess, tokenize and parse `source` with the chat-template defaults
/// (`trim_blocks` and `lstrip_blocks` on).
pub fn compile(source: &str) -> Result<Program> {
    compile_with_options(source, PreprocessOptions::chat())
}

pub fn compile_with_options(source: &str, options: PreprocessOptions) -> Result<Program> {
    let tokens = lexer::tokenize(source, options)?;
    let program = parser::parse(&tokens)?;
    tracing::debug!(
        tokens = tokens.len(),
        nodes = program.body.len(),
        "compiled template"
    );
    Ok(program)
}

/// A compiled template. Parsing happens once; every [`Template::render`]
/// builds a fresh environment, so one template can be shared across threads
/// and rendered concurrently.
#[derive(Debug, Clone)]
pub struct Template {
    program: Program,
}

impl Template {
    pub fn new(source: &str) -> Result<Self> {
        Self::with_options(source, PreprocessOptions::chat())
    }

    pub fn with_options(source: &str, options: PreprocessOptions) -> Result<Self> {
        Ok(Self {
            program: compile_with_options(source, options)?,
        })
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn render(&self, context: &RenderContext) -> Result<String> {
        render(&self.program, context)
    }
}

/// Render an already parsed program.
pub fn render(program: &Program, context: &RenderContext) -> Result<String> {
    let env = Environment::new();
    env.declare("false", Value::Boolean(false))?;
    env.declare("true", Value::Boolean(true))?;
    env.declare("raise_exception", Value::function(raise_exception))?;
    env.declare("range", Value::function(range))?;
    for (name, value) in context.iter() {
        env.set(name, value)?;
    }
    Interpreter::new(env).run(program)
}

fn raise_exception(args: &[Value], _: &Environment<'_>) -> Result<Value> {
    let message = match args.first() {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Numeric(n)) => n.to_string(),
        Some(Value::Boolean(b)) => b.to_string(),
        _ => "raise_exception called".to_string(),
    };
    Err(Error::runtime(message))
}

fn range(args: &[Value], _: &Environment<'_>) -> Result<Value> {
    let mut ints = Vec::with_capacity(args.len());
    for arg in args {
        match arg {
            Value::Numeric(n) => ints.push(n.as_integer()?),
            other => {
                return Err(Error::runtime(format!(
                    "range() expects integer arguments, got {}",
                    other.type_name()
                )))
            }
        }
    }
    let (start, stop, step) = match *ints.as_slice() {
        [stop] => (0, stop, 1),
        [start, stop] => (start, stop, 1),
        [start, stop, step] => (start, stop, step),
        _ => {
            return Err(Error::runtime(format!(
                "range() expects 1 to 3 arguments, got {}",
                args.len()
            )))
        }
    };
    if step == 0 {
        return Err(Error::runtime("range() step must not be zero"));
    }

    let mut values = Vec::new();
    let mut i = start;
    while (step > 0 && i < stop) || (step < 0 && i > stop) {
        values.push(Value::int(i));
        i = match i.checked_add(step) {
            Some(next) => next,
            None => break,
        };
    }
    Ok(Value::Array(values))
}

/// Render an HF-style chat_template with a list of messages.
///
/// Uses the common defaults `eos_token = "</s>"` and
/// `add_generation_prompt = true`.
pub fn render_chat_template(template: &str, messages: &[ChatMessage]) -> Result<String> {
    let mut ctx = RenderContext::new();
    ctx.set_var("eos_token", "</s>");
    ctx.set_flag("add_generation_prompt", true);
    render_chat_template_with_context(template, messages, &ctx)
}

/// Render a chat_template with `messages` bound alongside the variables in
/// `ctx`. Variables missing from `ctx` are undefined, so a missing
/// `add_generation_prompt` is falsy.
pub fn render_chat_template_with_context(
    template: &str,
    messages: &[ChatMessage],
    ctx: &RenderContext,
) -> Result<String> {
    let template = Template::new(template)?;
    let mut ctx = ctx.clone();
    ctx.set(
        "messages",
        HostValue::Array(messages.iter().map(HostValue::from).collect()),
    );
    template.render(&ctx)
}
