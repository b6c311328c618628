//! Whitespace control applied to the raw template before tokenizing.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Jinja's `trim_blocks` / `lstrip_blocks` switches.
///
/// Dash markers (`{%-`, `-%}`, `{{-`, `-}}`) are always honored and are not
/// configurable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessOptions {
    /// Drop the first newline after a block or comment tag.
    pub trim_blocks: bool,
    /// Strip spaces and tabs from the start of a line up to a block or comment tag.
    pub lstrip_blocks: bool,
}

impl PreprocessOptions {
    /// Both switches on. This is what chat templates are written against.
    pub fn chat() -> Self {
        Self {
            trim_blocks: true,
            lstrip_blocks: true,
        }
    }
}

const COMMENT_MARKER: &str = "{##}";

static COMMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)\{#.*?#\}").unwrap());
static LSTRIP: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^[ \t]*(\{[#%])").unwrap());
static TRIM: Lazy<Regex> = Lazy::new(|| Regex::new(r"([#%]\})\n").unwrap());
static DASH_CLOSE_STATEMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"-%\}\s*").unwrap());
static DASH_OPEN_STATEMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s*\{%-").unwrap());
static DASH_CLOSE_EXPRESSION: Lazy<Regex> = Lazy::new(|| Regex::new(r"-\}\}\s*").unwrap());
static DASH_OPEN_EXPRESSION: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s*\{\{-").unwrap());

/// Apply comment removal and whitespace control to `source`.
///
/// Comments are collapsed first so that tags inside them never take part in
/// trimming, and the dash markers run last so they also apply to regions the
/// block options left untouched.
pub fn preprocess(source: &str, options: PreprocessOptions) -> String {
    let source = source.strip_suffix('\n').unwrap_or(source);

    let mut out = COMMENT.replace_all(source, COMMENT_MARKER).into_owned();

    if options.lstrip_blocks {
        out = LSTRIP.replace_all(&out, "$1").into_owned();
    }
    if options.trim_blocks {
        out = TRIM.replace_all(&out, "$1").into_owned();
    }

    let out = out.replace(COMMENT_MARKER, "");
    let out = DASH_CLOSE_STATEMENT.replace_all(&out, "%}");
    let out = DASH_OPEN_STATEMENT.replace_all(&out, "{%");
    let out = DASH_CLOSE_EXPRESSION.replace_all(&out, "}}");
    let out = DASH_OPEN_EXPRESSION.replace_all(&out, "{{");
    out.into_owned()
}
