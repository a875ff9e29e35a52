//! Placeholder substitution for command bodies.
//!
//! Three placeholder forms are recognised:
//!
//! - `$ARGUMENTS`: the raw argument string (empty when none was given)
//! - `$1`..`$N`: positional arguments, split on whitespace with `"..."`
//!   grouping
//! - `{{TOKEN}}`: named values, usually path tokens plus per-run values such
//!   as `FEATURE_ID` or `DATE`
//!
//! Substitution is a single left-to-right pass. Text inserted for one
//! placeholder is never scanned again, so an argument containing `$1` or
//! `{{X}}` is emitted literally.

use crate::error::{FlowError, Result};
use regex::{Captures, Regex};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::OnceLock;

static PLACEHOLDER_RE: OnceLock<Regex> = OnceLock::new();

fn placeholder_re() -> &'static Regex {
    PLACEHOLDER_RE.get_or_init(|| {
        Regex::new(r"\$ARGUMENTS|\$(\d+)|\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").unwrap()
    })
}

// ---------------------------------------------------------------------------
// Arguments
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Arguments {
    raw: String,
    positional: Vec<String>,
}

impl Arguments {
    /// Split `raw` on whitespace. A double-quoted run is one argument with
    /// the quotes removed; an unterminated quote runs to the end. `\"` and
    /// `\\` stand for a literal quote and backslash; any other backslash is
    /// kept as is.
    pub fn parse(raw: &str) -> Self {
        let mut positional = Vec::new();
        let mut current = String::new();
        let mut in_quotes = false;
        let mut has_token = false;

        let mut chars = raw.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '\\' if matches!(chars.peek(), Some('"' | '\\')) => {
                    current.extend(chars.next());
                    has_token = true;
                }
                '"' => {
                    in_quotes = !in_quotes;
                    has_token = true;
                }
                c if c.is_whitespace() && !in_quotes => {
                    if has_token {
                        positional.push(std::mem::take(&mut current));
                        has_token = false;
                    }
                }
                c => {
                    current.push(c);
                    has_token = true;
                }
            }
        }
        if has_token {
            positional.push(current);
        }

        Self {
            raw: raw.trim().to_string(),
            positional,
        }
    }

    /// Build from already-split arguments. The raw string quotes and escapes
    /// them so that [`Arguments::parse`] yields the same positionals.
    pub fn from_vec(args: &[String]) -> Self {
        let raw = args
            .iter()
            .map(|a| quote_arg(a))
            .collect::<Vec<_>>()
            .join(" ");
        Self {
            raw,
            positional: args.to_vec(),
        }
    }

    /// Replace the 1-based positional argument `n` and rebuild the raw
    /// string. Out-of-range positions are ignored.
    pub fn with_positional(self, n: usize, value: &str) -> Self {
        let mut positional = self.positional;
        match n.checked_sub(1).and_then(|i| positional.get_mut(i)) {
            Some(slot) => *slot = value.to_string(),
            None => {
                return Self {
                    raw: self.raw,
                    positional,
                }
            }
        }
        Self::from_vec(&positional)
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// 1-based positional argument.
    pub fn get(&self, n: usize) -> Option<&str> {
        n.checked_sub(1)
            .and_then(|i| self.positional.get(i))
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.positional.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positional.is_empty()
    }
}

fn quote_arg(arg: &str) -> String {
    let quoted = arg.is_empty() || arg.chars().any(char::is_whitespace);
    let mut out = String::with_capacity(arg.len() + 2);
    if quoted {
        out.push('"');
    }
    let mut chars = arg.chars().peekable();
    while let Some(c) = chars.next() {
        // a backslash is doubled only where parse would read it as an escape
        let escapes_next = matches!(chars.peek(), Some('"' | '\\'));
        match c {
            '"' => out.push_str("\\\""),
            '\\' if escapes_next || (quoted && chars.peek().is_none()) => out.push_str("\\\\"),
            c => out.push(c),
        }
    }
    if quoted {
        out.push('"');
    }
    out
}

// ---------------------------------------------------------------------------
// Context and output
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct RenderContext {
    pub arguments: Arguments,
    pub tokens: HashMap<String, String>,
}

impl RenderContext {
    pub fn new(arguments: Arguments) -> Self {
        Self {
            arguments,
            tokens: HashMap::new(),
        }
    }

    pub fn with_tokens(mut self, tokens: HashMap<String, String>) -> Self {
        self.tokens.extend(tokens);
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.tokens.insert(name.into(), value.into());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubstitutionMode {
    /// Leave unresolved placeholders verbatim and report them.
    #[default]
    Forgiving,
    /// Fail with `UnresolvedTokens` if anything is left.
    Strict,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnresolvedToken {
    pub token: String,
    /// 1-based line in the template body.
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rendered {
    pub text: String,
    pub warnings: Vec<UnresolvedToken>,
}

// ---------------------------------------------------------------------------
// render
// ---------------------------------------------------------------------------

pub fn render(body: &str, ctx: &RenderContext, mode: SubstitutionMode) -> Result<Rendered> {
    let mut warnings = Vec::new();
    let mut text = String::with_capacity(body.len());
    let mut last = 0;

    for caps in placeholder_re().captures_iter(body) {
        let Some(whole) = caps.get(0) else { continue };
        text.push_str(&body[last..whole.start()]);
        match lookup(&caps, ctx) {
            Some(value) => text.push_str(value),
            None => {
                text.push_str(whole.as_str());
                warnings.push(UnresolvedToken {
                    token: whole.as_str().to_string(),
                    line: body[..whole.start()].matches('\n').count() + 1,
                });
            }
        }
        last = whole.end();
    }
    text.push_str(&body[last..]);

    for w in &warnings {
        tracing::warn!(token = %w.token, line = w.line, "unresolved template placeholder");
    }

    if mode == SubstitutionMode::Strict && !warnings.is_empty() {
        let names: BTreeSet<String> = warnings.iter().map(|w| w.token.clone()).collect();
        return Err(FlowError::UnresolvedTokens(names.into_iter().collect()));
    }

    Ok(Rendered { text, warnings })
}

fn lookup<'a>(caps: &Captures<'_>, ctx: &'a RenderContext) -> Option<&'a str> {
    if let Some(n) = caps.get(1) {
        let n: usize = n.as_str().parse().ok()?;
        return ctx.arguments.get(n);
    }
    if let Some(name) = caps.get(2) {
        return ctx.tokens.get(name.as_str()).map(String::as_str);
    }
    Some(ctx.arguments.raw())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
