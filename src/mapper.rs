//! Mapping between the schema tree, flat form submissions and nested values.
//!
//! Form inputs are named by [`FieldPath::form_name`]. Decoding a submission
//! never splits those names: for every leaf of the schema the expected name is
//! derived again and looked up, so codes may contain the separator.

use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};
use std::hash::BuildHasher;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use tracing::{debug, warn};

use crate::cache::{TemplateCache, TemplateSource};
use crate::error::Result;
use crate::schema::{Category, FieldPath, Layout, SchemaNode, SchemaTree};
use crate::template::{Context, Renderer};

/// Returned by display rendering when no leaf has a value.
pub const NO_DATA_MARKER: &str = "<span class=\"no-data\">No pricing data</span>";

// ------------- ValueTree -------------
/// Nested values keyed by category, subcategory (when the category has them) and field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValueTree {
    root: Map<String, Value>,
}

impl ValueTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps stored JSON. Anything but an object yields an empty tree.
    pub fn from_json(json: Value) -> Self {
        match json {
            Value::Object(root) => Self { root },
            Value::Null => Self::new(),
            other => {
                warn!(kind = json_kind(&other), "stored pricing values are not an object, ignoring them");
                Self::new()
            }
        }
    }

    pub fn parse(json: &str) -> Result<Self> {
        Ok(Self::from_json(serde_json::from_str(json)?))
    }

    pub fn to_json(&self) -> Value {
        Value::Object(self.root.clone())
    }

    /// The numeric value at `path`, if one is stored. Numeric strings count.
    pub fn get(&self, path: &FieldPath) -> Option<f64> {
        let mut node = self.root.get(path.category())?;
        if let Some(sub) = path.subcategory() {
            node = node.as_object()?.get(sub)?;
        }
        match node.as_object()?.get(path.field())? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => parse_number(s),
            _ => None,
        }
    }

    /// Stores `value` at `path`, writing an explicit null for `None`.
    pub fn set(&mut self, path: &FieldPath, value: Option<f64>) {
        let mut node = self.root.entry(path.category()).or_insert(Value::Null);
        if let Some(sub) = path.subcategory() {
            node = child(node, sub);
        }
        *child(node, path.field()) = value.and_then(Number::from_f64).map(Value::Number).unwrap_or(Value::Null);
    }

    /// A tree holding exactly the leaves of `schema`, with values carried over
    /// from `self` and null everywhere else.
    pub fn conform(&self, schema: &SchemaTree) -> ValueTree {
        let mut tree = ValueTree::new();
        for leaf in schema.leaves() {
            tree.set(&leaf.path, self.get(&leaf.path));
        }
        tree
    }
}

// the member `key` of `node`, replacing a non-object node with an empty object
fn child<'v>(node: &'v mut Value, key: &str) -> &'v mut Value {
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    &mut node[key]
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// A trimmed, finite number, or nothing.
pub fn parse_number(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<f64>().ok().filter(|n| n.is_finite())
}

// ------------- Form submissions -------------
/// Anything a submitted form can be read from.
pub trait FormSource {
    fn field(&self, name: &str) -> Option<Cow<'_, str>>;
}

impl<S: BuildHasher> FormSource for HashMap<String, String, S> {
    fn field(&self, name: &str) -> Option<Cow<'_, str>> {
        self.get(name).map(|v| Cow::Borrowed(v.as_str()))
    }
}

impl FormSource for BTreeMap<String, String> {
    fn field(&self, name: &str) -> Option<Cow<'_, str>> {
        self.get(name).map(|v| Cow::Borrowed(v.as_str()))
    }
}

/// Url-encoded pairs; the first occurrence of a name wins.
impl FormSource for [(String, String)] {
    fn field(&self, name: &str) -> Option<Cow<'_, str>> {
        self.iter().find(|(k, _)| k == name).map(|(_, v)| Cow::Borrowed(v.as_str()))
    }
}

impl FormSource for Vec<(String, String)> {
    fn field(&self, name: &str) -> Option<Cow<'_, str>> {
        self.as_slice().field(name)
    }
}

/// JSON bodies, where numbers may arrive unquoted.
impl FormSource for Map<String, Value> {
    fn field(&self, name: &str) -> Option<Cow<'_, str>> {
        self.get(name).map(|v| match v {
            Value::String(s) => Cow::Borrowed(s.as_str()),
            Value::Null => Cow::Borrowed(""),
            other => Cow::Owned(other.to_string()),
        })
    }
}

/// Reads every leaf of `schema` from a submitted form. Missing, blank and
/// unparseable inputs all become null, so the result always holds every leaf.
pub fn build_from_form<F: FormSource + ?Sized>(flat_values: &F, schema: &SchemaTree) -> ValueTree {
    let mut tree = ValueTree::new();
    for leaf in schema.leaves() {
        let name = leaf.path.form_name();
        let value = match flat_values.field(&name) {
            Some(raw) => {
                let parsed = parse_number(&raw);
                if parsed.is_none() && !raw.trim().is_empty() {
                    debug!(field = %name, "unparseable numeric input stored as null");
                }
                parsed
            }
            None => None,
        };
        tree.set(&leaf.path, value);
    }
    tree
}

// ------------- Markup -------------
/// Fragment templates used to build form and display markup.
///
/// Every value placed into a fragment is HTML-escaped except `BODY`, which
/// carries markup already rendered from inner fragments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkupTemplates {
    /// `CODE`, `NAME`, `BODY`
    pub form_category: String,
    /// `CODE`, `NAME`, `BODY`
    pub form_subcategory: String,
    /// `NAME`, `LABEL`, `VALUE`, `PERCENT`
    pub form_field: String,
    /// `CODE`, `NAME`, `BODY`
    pub display_category: String,
    /// `CODE`, `NAME`, `BODY`
    pub display_subcategory: String,
    /// `LABEL`, `VALUE`
    pub display_field: String,
}

impl Default for MarkupTemplates {
    fn default() -> Self {
        Self {
            form_category: concat!(
                "<fieldset class=\"pricing-category\" data-category=\"{{CODE}}\">",
                "<legend>{{NAME}}</legend>{{BODY}}</fieldset>"
            )
            .to_string(),
            form_subcategory: concat!(
                "<div class=\"pricing-subcategory\" data-subcategory=\"{{CODE}}\">",
                "<h4>{{NAME}}</h4>{{BODY}}</div>"
            )
            .to_string(),
            form_field: concat!(
                "<label class=\"pricing-field\">{{LABEL}}",
                "<input type=\"number\" step=\"any\" name=\"{{NAME}}\" value=\"{{VALUE}}\"",
                "{{#PERCENT}} data-unit=\"percent\"{{/PERCENT}}{{^PERCENT}} data-unit=\"currency\"{{/PERCENT}}>",
                "</label>"
            )
            .to_string(),
            display_category: concat!(
                "<div class=\"pricing-summary\" data-category=\"{{CODE}}\">",
                "<strong>{{NAME}}</strong>{{BODY}}</div>"
            )
            .to_string(),
            display_subcategory: "<div class=\"pricing-summary-group\"><em>{{NAME}}:</em>{{BODY}}</div>".to_string(),
            display_field: "<div class=\"pricing-summary-line\">{{LABEL}}: {{VALUE}}</div>".to_string(),
        }
    }
}

impl MarkupTemplates {
    /// Keys under which the fragments are looked up in a template source.
    pub const KEYS: [&'static str; 6] = [
        "form_category.html",
        "form_subcategory.html",
        "form_field.html",
        "display_category.html",
        "display_subcategory.html",
        "display_field.html",
    ];

    /// Loads fragments through `cache`; fragments the source does not have keep their defaults.
    pub async fn load<S: TemplateSource>(cache: &TemplateCache<S>) -> Result<Self> {
        let mut templates = MarkupTemplates::default();
        for (key, slot) in templates.slots() {
            match cache.get(key).await? {
                Some(text) => *slot = text.to_string(),
                None => debug!(key, "no override for markup fragment, using default"),
            }
        }
        Ok(templates)
    }

    fn slots(&mut self) -> [(&'static str, &mut String); 6] {
        let [form_category, form_subcategory, form_field, display_category, display_subcategory, display_field] =
            Self::KEYS;
        [
            (form_category, &mut self.form_category),
            (form_subcategory, &mut self.form_subcategory),
            (form_field, &mut self.form_field),
            (display_category, &mut self.display_category),
            (display_subcategory, &mut self.display_subcategory),
            (display_field, &mut self.display_field),
        ]
    }
}

/// Percent when the display name says so, currency otherwise.
pub fn is_percent(display_name: &str) -> bool {
    display_name.contains('%') || display_name.to_lowercase().contains("discount")
}

/// Formats a stored value with the unit its display name implies.
pub fn format_value(display_name: &str, value: f64) -> String {
    if is_percent(display_name) {
        format!("{}%", crate::template::ContextValue::Number(value))
    } else if value < 0.0 {
        format!("-${:.2}", -value)
    } else {
        format!("${:.2}", value)
    }
}

/// Renders schema-driven markup with a [`Renderer`] and [`MarkupTemplates`].
#[derive(Debug, Clone, Default)]
pub struct FormMapper {
    renderer: Renderer,
    templates: MarkupTemplates,
}

impl FormMapper {
    pub fn new(renderer: Renderer, templates: MarkupTemplates) -> Self {
        Self { renderer, templates }
    }

    pub fn templates(&self) -> &MarkupTemplates {
        &self.templates
    }

    pub fn build_from_form<F: FormSource + ?Sized>(&self, flat_values: &F, schema: &SchemaTree) -> ValueTree {
        build_from_form(flat_values, schema)
    }

    /// One group per category, sub-groups per subcategory, one numeric input per leaf.
    pub fn form_html(&self, schema: &SchemaTree, current_values: &ValueTree) -> String {
        let mut out = String::new();
        for category in schema.categories() {
            let body = match &category.layout {
                Layout::Fields(fields) => self.form_inputs(category, None, fields, current_values),
                Layout::Subcategories(subs) => subs
                    .iter()
                    .map(|sub| {
                        let inputs = self.form_inputs(category, Some(&sub.node), &sub.fields, current_values);
                        self.group(&self.templates.form_subcategory, &sub.node, inputs)
                    })
                    .collect(),
            };
            out.push_str(&self.group(&self.templates.form_category, &category.node, body));
        }
        out
    }

    fn form_inputs(
        &self,
        category: &Category,
        subcategory: Option<&SchemaNode>,
        fields: &[SchemaNode],
        values: &ValueTree,
    ) -> String {
        fields
            .iter()
            .map(|field| {
                let path = FieldPath::new(&category.node, subcategory, field);
                let value = values.get(&path).map(|v| crate::template::ContextValue::Number(v).to_string()).unwrap_or_default();
                let ctx = Context::new()
                    .with_escaped("NAME", &path.form_name())
                    .with_escaped("LABEL", &field.display_name)
                    .with_escaped("VALUE", &value)
                    .with("PERCENT", is_percent(&field.display_name));
                self.renderer.render(&self.templates.form_field, &ctx)
            })
            .collect()
    }

    fn group(&self, template: &str, node: &SchemaNode, body: String) -> String {
        let ctx = Context::new()
            .with_escaped("CODE", &node.code)
            .with_escaped("NAME", &node.display_name)
            .with("BODY", body);
        self.renderer.render(template, &ctx)
    }

    /// A summary of populated leaves. Categories without values are left out;
    /// when nothing is populated the result is [`NO_DATA_MARKER`].
    pub fn display_html(&self, schema: &SchemaTree, values: &ValueTree) -> String {
        let mut out = String::new();
        for category in schema.categories() {
            let body = match &category.layout {
                Layout::Fields(fields) => self.display_lines(category, None, fields, values),
                Layout::Subcategories(subs) => {
                    let groups: Vec<String> = subs
                        .iter()
                        .filter_map(|sub| {
                            let lines = self.display_lines(category, Some(&sub.node), &sub.fields, values)?;
                            Some(self.group(&self.templates.display_subcategory, &sub.node, lines))
                        })
                        .collect();
                    if groups.is_empty() { None } else { Some(groups.concat()) }
                }
            };
            if let Some(body) = body {
                out.push_str(&self.group(&self.templates.display_category, &category.node, body));
            }
        }
        if out.is_empty() {
            NO_DATA_MARKER.to_string()
        } else {
            out
        }
    }

    fn display_lines(
        &self,
        category: &Category,
        subcategory: Option<&SchemaNode>,
        fields: &[SchemaNode],
        values: &ValueTree,
    ) -> Option<String> {
        let lines: Vec<String> = fields
            .iter()
            .filter_map(|field| {
                let value = values.get(&FieldPath::new(&category.node, subcategory, field))?;
                let ctx = Context::new()
                    .with_escaped("LABEL", &field.display_name)
                    .with_escaped("VALUE", &format_value(&field.display_name, value));
                Some(self.renderer.render(&self.templates.display_field, &ctx))
            })
            .collect();
        if lines.is_empty() { None } else { Some(lines.concat()) }
    }
}

/// Form markup with the default renderer and fragments.
pub fn generate_form_html(schema: &SchemaTree, current_values: &ValueTree) -> String {
    FormMapper::default().form_html(schema, current_values)
}

/// Display markup with the default renderer and fragments.
pub fn generate_display_html(schema: &SchemaTree, values: &ValueTree) -> String {
    FormMapper::default().display_html(schema, values)
}
