//! Text templates with conditional sections.
//!
//! Three directive forms are understood:
//! * `{{KEY}}` – replaced by the string form of the context value (or nothing).
//! * `{{#KEY}} ... {{/KEY}}` – kept when `KEY` is present in the context.
//! * `{{^KEY}} ... {{/KEY}}` – kept when `KEY` is *not* present.
//!
//! A value is present unless it is `false`, numeric zero, the empty string or
//! null/unset. Rendering never fails: unmatched or malformed tags are emitted
//! as literal text and unknown keys render as the empty string.
//!
//! Sections are resolved in passes. In each pass every `{{#KEY}}` opener,
//! leftmost first, is paired with the first `{{/KEY}}` after it and the block
//! is replaced by its inside or by nothing. Scanning resumes after the close
//! tag, so the inside of a kept block waits for the next pass. Passes repeat
//! until nothing changes, then inverted sections are resolved by one pass of
//! the same kind and variables are substituted last.
//!
//! Two engines implement this through [`RenderMode`]. The default unbounded
//! engine tokenizes once with the pest grammar in `template.pest` and runs
//! the passes over the token list with no limit, so any depth of nesting
//! resolves. Tags are recognized in the template as written: removing a
//! block never joins its neighbours into a new tag. The fixed-point engine
//! rewrites the text with regexes and stops after the pass limit, leaving
//! tags behind when sections nest deeper than that.
//!
//! Substituted values are never scanned for directives, so rendering an
//! already rendered text is not the same as rendering once.
//!
//! ```
//! use rxforms::template::{render, Context};
//! let ctx = Context::new().with("A", 0);
//! assert_eq!(render("{{#A}}yes{{/A}}{{^A}}no{{/A}}", &ctx), "no");
//! ```

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use lazy_static::lazy_static;
use pest::Parser;
use pest_derive::Parser;
use regex::Regex;
use serde::Deserialize;
use tracing::{trace, warn};

/// Number of rewrite passes the fixed-point engine makes over nested sections.
pub const DEFAULT_SECTION_PASS_LIMIT: usize = 10;

#[derive(Parser)]
#[grammar = "template.pest"]
struct TemplateParser;

// ------------- Context -------------
#[derive(Debug, Clone, PartialEq)]
pub enum ContextValue {
    Text(String),
    Number(f64),
    Bool(bool),
    Null,
}

impl ContextValue {
    /// Whether a section keyed on this value is rendered.
    pub fn is_present(&self) -> bool {
        match self {
            ContextValue::Text(s) => !s.is_empty(),
            ContextValue::Number(n) => *n != 0.0 && !n.is_nan(),
            ContextValue::Bool(b) => *b,
            ContextValue::Null => false,
        }
    }
}

impl fmt::Display for ContextValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ContextValue::Text(s) => write!(f, "{}", s),
            ContextValue::Number(n) => write!(f, "{}", format_number(*n)),
            ContextValue::Bool(b) => write!(f, "{}", b),
            ContextValue::Null => Ok(()),
        }
    }
}

// integral values print without a fractional part, the way a browser would
fn format_number(n: f64) -> String {
    if n == 0.0 {
        "0".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity".to_string() } else { "-Infinity".to_string() }
    } else {
        n.to_string()
    }
}

impl From<&str> for ContextValue {
    fn from(s: &str) -> Self { ContextValue::Text(s.to_string()) }
}
impl From<String> for ContextValue {
    fn from(s: String) -> Self { ContextValue::Text(s) }
}
impl From<&String> for ContextValue {
    fn from(s: &String) -> Self { ContextValue::Text(s.clone()) }
}
impl From<f64> for ContextValue {
    fn from(n: f64) -> Self { ContextValue::Number(n) }
}
impl From<i64> for ContextValue {
    fn from(n: i64) -> Self { ContextValue::Number(n as f64) }
}
impl From<i32> for ContextValue {
    fn from(n: i32) -> Self { ContextValue::Number(n as f64) }
}
impl From<usize> for ContextValue {
    fn from(n: usize) -> Self { ContextValue::Number(n as f64) }
}
impl From<bool> for ContextValue {
    fn from(b: bool) -> Self { ContextValue::Bool(b) }
}
impl<T: Into<ContextValue>> From<Option<T>> for ContextValue {
    fn from(o: Option<T>) -> Self {
        o.map(Into::into).unwrap_or(ContextValue::Null)
    }
}

/// Values available to a template, keyed by `UPPER_SNAKE_CASE` names.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Context {
    values: HashMap<String, ContextValue>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn with(mut self, key: impl Into<String>, value: impl Into<ContextValue>) -> Self {
        self.insert(key, value);
        self
    }
    /// Adds a text value escaped for use in HTML text and quoted attributes.
    pub fn with_escaped(mut self, key: impl Into<String>, text: &str) -> Self {
        self.insert_escaped(key, text);
        self
    }
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<ContextValue>) {
        self.values.insert(key.into(), value.into());
    }
    pub fn insert_escaped(&mut self, key: impl Into<String>, text: &str) {
        let escaped = html_escape::encode_quoted_attribute(text).into_owned();
        self.values.insert(key.into(), ContextValue::Text(escaped));
    }
    pub fn get(&self, key: &str) -> Option<&ContextValue> {
        self.values.get(key)
    }
    pub fn is_present(&self, key: &str) -> bool {
        self.values.get(key).is_some_and(ContextValue::is_present)
    }
    /// The text substituted for `{{key}}`.
    pub fn lookup(&self, key: &str) -> String {
        self.values.get(key).map(|v| v.to_string()).unwrap_or_default()
    }
    pub fn len(&self) -> usize {
        self.values.len()
    }
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
    /// Builds a context from the members of a JSON object. Arrays and nested
    /// objects are kept as their JSON text; anything but an object yields an
    /// empty context.
    pub fn from_json(json: &serde_json::Value) -> Self {
        let mut ctx = Context::new();
        if let serde_json::Value::Object(map) = json {
            for (key, value) in map {
                let value = match value {
                    serde_json::Value::Null => ContextValue::Null,
                    serde_json::Value::Bool(b) => ContextValue::Bool(*b),
                    serde_json::Value::Number(n) => n.as_f64().map(ContextValue::Number).unwrap_or(ContextValue::Null),
                    serde_json::Value::String(s) => ContextValue::Text(s.clone()),
                    other => ContextValue::Text(other.to_string()),
                };
                ctx.values.insert(key.clone(), value);
            }
        }
        ctx
    }
}

impl<K: Into<String>, V: Into<ContextValue>> FromIterator<(K, V)> for Context {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut ctx = Context::new();
        for (k, v) in iter {
            ctx.insert(k, v);
        }
        ctx
    }
}

// ------------- Renderer -------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderMode {
    /// Tokenize once and resolve sections until none can be paired.
    #[default]
    Unbounded,
    /// Rewrite section blocks until stable or the pass limit is reached.
    FixedPoint,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Renderer {
    mode: RenderMode,
    section_pass_limit: usize,
}

impl Default for Renderer {
    fn default() -> Self {
        Self { mode: RenderMode::Unbounded, section_pass_limit: DEFAULT_SECTION_PASS_LIMIT }
    }
}

impl Renderer {
    pub fn new(mode: RenderMode, section_pass_limit: usize) -> Self {
        Self { mode, section_pass_limit }
    }
    pub fn mode(&self) -> RenderMode {
        self.mode
    }
    pub fn section_pass_limit(&self) -> usize {
        self.section_pass_limit
    }
    pub fn render(&self, template: &str, context: &Context) -> String {
        trace!(mode = ?self.mode, bytes = template.len(), "render");
        match self.mode {
            RenderMode::Unbounded => match tokenize(template) {
                Some(tokens) => Resolver::new(tokens).render(context),
                None => template.to_string(),
            },
            RenderMode::FixedPoint => render_fixed_point(template, context, self.section_pass_limit),
        }
    }
}

/// Renders with the default unbounded engine.
pub fn render(template: &str, context: &Context) -> String {
    Renderer::default().render(template, context)
}

// ------------- Unbounded engine -------------
#[derive(Debug, Clone, Copy, PartialEq)]
enum Token<'t> {
    Text(&'t str),
    Variable(&'t str),
    Open { key: &'t str, raw: &'t str, inverted: bool },
    Close { key: &'t str, raw: &'t str },
}

fn tokenize(template: &str) -> Option<Vec<Token<'_>>> {
    let mut pairs = match TemplateParser::parse(Rule::template, template) {
        Ok(pairs) => pairs,
        Err(e) => {
            // the grammar accepts every input, so this is a grammar bug
            warn!(error = %e, "template tokenizer rejected input, emitting it verbatim");
            return None;
        }
    };
    let root = pairs.next()?;
    let mut tokens = Vec::new();
    for pair in root.into_inner() {
        let rule = pair.as_rule();
        let raw = pair.as_str();
        let key = pair.into_inner().next().map(|k| k.as_str()).unwrap_or("");
        let token = match rule {
            Rule::text => Token::Text(raw),
            Rule::variable => Token::Variable(key),
            Rule::section_open => Token::Open { key, raw, inverted: false },
            Rule::inverted_open => Token::Open { key, raw, inverted: true },
            Rule::section_close => Token::Close { key, raw },
            _ => continue,
        };
        tokens.push(token);
    }
    Some(tokens)
}

/// Resolves sections over the token list of a template.
///
/// Each section opener pairs with the first close tag of its key that
/// follows it. A pass walks the openers left to right and continues after
/// the close tag of every block it resolves, so the inside of a kept block is
/// only looked at by the next pass. Passes repeat until no opener can be
/// paired. Inverted sections are then resolved in one pass the same way.
///
/// Tokens live in a linked list so removing a block costs its own length.
/// Openers deferred to a later pass are skipped with a range query instead of
/// being rescanned, which keeps deep nesting at `O(n log n)`.
struct Resolver<'t> {
    tokens: Vec<Token<'t>>,
    // index `tokens.len()` is the list head and tail
    next: Vec<usize>,
    prev: Vec<usize>,
    live: Vec<bool>,
    openers: BTreeMap<usize, &'t str>,
    closes: HashMap<&'t str, BTreeSet<usize>>,
}

impl<'t> Resolver<'t> {
    fn new(tokens: Vec<Token<'t>>) -> Self {
        let n = tokens.len();
        let mut openers = BTreeMap::new();
        let mut closes: HashMap<&str, BTreeSet<usize>> = HashMap::new();
        for (i, token) in tokens.iter().enumerate() {
            match *token {
                Token::Open { key, inverted: false, .. } => {
                    openers.insert(i, key);
                }
                Token::Close { key, .. } => {
                    closes.entry(key).or_default().insert(i);
                }
                _ => (),
            }
        }
        let mut next: Vec<usize> = (1..=n + 1).collect();
        next[n] = 0;
        Self {
            next,
            prev: (0..=n).map(|i| if i == 0 { n } else { i - 1 }).collect(),
            live: vec![true; n],
            tokens,
            openers,
            closes,
        }
    }

    fn first_close(&self, key: &str, after: usize) -> Option<usize> {
        self.closes.get(key)?.range(after + 1..).next().copied()
    }

    fn unlink(&mut self, i: usize) {
        let (p, q) = (self.prev[i], self.next[i]);
        self.next[p] = q;
        self.prev[q] = p;
        self.live[i] = false;
        match self.tokens[i] {
            Token::Open { inverted: false, .. } => {
                self.openers.remove(&i);
            }
            Token::Close { key, .. } => {
                if let Some(set) = self.closes.get_mut(key) {
                    set.remove(&i);
                }
            }
            _ => (),
        }
    }

    /// Removes the live tokens from `from` through `to`.
    fn remove_block(&mut self, from: usize, to: usize) {
        let mut i = from;
        loop {
            let following = self.next[i];
            self.unlink(i);
            if i == to {
                break;
            }
            i = following;
        }
    }

    /// Keeps or drops the block `open..=close` and returns where scanning resumes.
    fn resolve(&mut self, open: usize, close: usize, keep: bool) -> usize {
        if keep {
            self.unlink(open);
            self.unlink(close);
        } else {
            self.remove_block(open, close);
        }
        close + 1
    }

    fn resolve_sections(&mut self, context: &Context) {
        let mut passes = 0;
        while !self.openers.is_empty() {
            passes += 1;
            let mut cursor = 0;
            while let Some((open, key)) = self.openers.range(cursor..).next().map(|(&i, &k)| (i, k)) {
                cursor = match self.first_close(key, open) {
                    Some(close) => self.resolve(open, close, context.is_present(key)),
                    None => {
                        // nothing can pair with it any more
                        self.openers.remove(&open);
                        open + 1
                    }
                };
            }
        }
        trace!(passes, "sections resolved");
    }

    fn resolve_inverted(&mut self, context: &Context) {
        let inverted: Vec<(usize, &str)> = self
            .tokens
            .iter()
            .enumerate()
            .filter_map(|(i, t)| match *t {
                Token::Open { key, inverted: true, .. } if self.live[i] => Some((i, key)),
                _ => None,
            })
            .collect();
        let mut cursor = 0;
        for (open, key) in inverted {
            if open < cursor || !self.live[open] {
                continue;
            }
            cursor = match self.first_close(key, open) {
                Some(close) => self.resolve(open, close, !context.is_present(key)),
                None => open + 1,
            };
        }
    }

    fn render(mut self, context: &Context) -> String {
        self.resolve_sections(context);
        self.resolve_inverted(context);
        let head = self.tokens.len();
        let mut out = String::new();
        let mut i = self.next[head];
        while i != head {
            match self.tokens[i] {
                Token::Text(text) => out.push_str(text),
                Token::Variable(key) => out.push_str(&context.lookup(key)),
                Token::Open { raw, .. } | Token::Close { raw, .. } => out.push_str(raw),
            }
            i = self.next[i];
        }
        out
    }
}

// ------------- Fixed-point engine -------------
lazy_static! {
    static ref SECTION_OPEN: Regex = Regex::new(r"\{\{#([A-Za-z0-9_]+)\}\}").unwrap();
    static ref INVERTED_OPEN: Regex = Regex::new(r"\{\{\^([A-Za-z0-9_]+)\}\}").unwrap();
    static ref VARIABLE: Regex = Regex::new(r"\{\{([A-Za-z0-9_]+)\}\}").unwrap();
}

fn render_fixed_point(template: &str, context: &Context, pass_limit: usize) -> String {
    let mut text = template.to_string();
    for pass in 0..pass_limit {
        let next = resolve_blocks(&text, &SECTION_OPEN, context, false);
        if next == text {
            trace!(passes = pass, "sections stable");
            break;
        }
        text = next;
    }
    let text = resolve_blocks(&text, &INVERTED_OPEN, context, true);
    VARIABLE
        .replace_all(&text, |caps: &regex::Captures| context.lookup(&caps[1]))
        .into_owned()
}

// One left-to-right pass: each opener is paired with the first close tag of
// the same key after it; openers without one stay as they are.
fn resolve_blocks(text: &str, opener: &Regex, context: &Context, inverted: bool) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pos = 0;
    while let Some(caps) = opener.captures_at(text, pos) {
        let (Some(whole), Some(key)) = (caps.get(0), caps.get(1)) else { break };
        let close = format!("{{{{/{}}}}}", key.as_str());
        match text[whole.end()..].find(&close) {
            Some(offset) => {
                let inner = &text[whole.end()..whole.end() + offset];
                out.push_str(&text[pos..whole.start()]);
                if context.is_present(key.as_str()) != inverted {
                    out.push_str(inner);
                }
                pos = whole.end() + offset + close.len();
            }
            None => {
                out.push_str(&text[pos..whole.end()]);
                pos = whole.end();
            }
        }
    }
    out.push_str(&text[pos..]);
    out
}
