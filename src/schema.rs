//! The pricing structure schema.
//!
//! Configuration rows arrive flat, each one tagged as a category, subcategory
//! or field and linked to its parent through `parent_code`. [`SchemaTree::from_rows`]
//! normalizes them into an ordered tree where every category holds either
//! subcategories of fields or fields directly, never both.
//!
//! Leaves are addressed by [`FieldPath`], which can only be obtained by walking
//! the tree.

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::Result;

/// Joins the components of a [`FieldPath`] into a flat form field name.
pub const FIELD_SEPARATOR: &str = "__";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RowLevel {
    Category,
    Subcategory,
    Field,
    #[serde(other)]
    Unknown,
}

/// One row of the configuration table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigRow {
    pub config_code: String,
    pub display_name: String,
    #[serde(default)]
    pub display_order: i64,
    #[serde(default)]
    pub parent_code: Option<String>,
    #[serde(alias = "level_or_type", alias = "config_type", deserialize_with = "deserialize_level")]
    pub level: RowLevel,
}

impl ConfigRow {
    pub fn new(level: RowLevel, code: &str, name: &str, order: i64, parent: Option<&str>) -> Self {
        Self {
            config_code: code.to_string(),
            display_name: name.to_string(),
            display_order: order,
            parent_code: parent.map(str::to_string),
            level,
        }
    }
}

// levels are matched case-insensitively
fn deserialize_level<'de, D>(deserializer: D) -> std::result::Result<RowLevel, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    Ok(match raw.trim().to_ascii_lowercase().as_str() {
        "category" => RowLevel::Category,
        "subcategory" => RowLevel::Subcategory,
        "field" => RowLevel::Field,
        _ => RowLevel::Unknown,
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaNode {
    pub code: String,
    pub display_name: String,
    pub order: i64,
}

impl SchemaNode {
    fn from_row(row: &ConfigRow) -> Self {
        Self { code: row.config_code.clone(), display_name: row.display_name.clone(), order: row.display_order }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Subcategory {
    pub node: SchemaNode,
    pub fields: Vec<SchemaNode>,
}

/// How a category holds its fields, decided per category when loading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Layout {
    Fields(Vec<SchemaNode>),
    Subcategories(Vec<Subcategory>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Category {
    pub node: SchemaNode,
    pub layout: Layout,
}

impl Category {
    pub fn has_subcategories(&self) -> bool {
        matches!(self.layout, Layout::Subcategories(_))
    }
    /// Every leaf of this category in display order.
    pub fn leaves(&self) -> Vec<Leaf<'_>> {
        let mut leaves = Vec::new();
        match &self.layout {
            Layout::Fields(fields) => {
                for field in fields {
                    leaves.push(Leaf { path: FieldPath::new(&self.node, None, field), node: field });
                }
            }
            Layout::Subcategories(subs) => {
                for sub in subs {
                    for field in &sub.fields {
                        leaves.push(Leaf { path: FieldPath::new(&self.node, Some(&sub.node), field), node: field });
                    }
                }
            }
        }
        leaves
    }
}

/// Address of a single leaf value: category, optional subcategory and field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldPath {
    category: String,
    subcategory: Option<String>,
    field: String,
}

impl FieldPath {
    // only the tree hands these out
    pub(crate) fn new(category: &SchemaNode, subcategory: Option<&SchemaNode>, field: &SchemaNode) -> Self {
        Self {
            category: category.code.clone(),
            subcategory: subcategory.map(|s| s.code.clone()),
            field: field.code.clone(),
        }
    }
    pub fn category(&self) -> &str {
        &self.category
    }
    pub fn subcategory(&self) -> Option<&str> {
        self.subcategory.as_deref()
    }
    pub fn field(&self) -> &str {
        &self.field
    }
    /// The defined components in order.
    pub fn components(&self) -> Vec<&str> {
        let mut parts = vec![self.category.as_str()];
        if let Some(sub) = &self.subcategory {
            parts.push(sub);
        }
        parts.push(&self.field);
        parts
    }
    /// The flat form field name. Never split this back into a path.
    pub fn form_name(&self) -> String {
        self.components().join(FIELD_SEPARATOR)
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.form_name())
    }
}

/// A leaf together with the path that reaches it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Leaf<'s> {
    pub path: FieldPath,
    pub node: &'s SchemaNode,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchemaTree {
    categories: Vec<Category>,
}

impl SchemaTree {
    pub fn new(categories: Vec<Category>) -> Self {
        Self { categories }
    }

    /// Parses a JSON array of configuration rows and normalizes it.
    pub fn from_json(json: &str) -> Result<SchemaTree> {
        let rows: Vec<ConfigRow> = serde_json::from_str(json)?;
        Ok(SchemaTree::from_rows(&rows))
    }

    pub fn from_rows(rows: &[ConfigRow]) -> SchemaTree {
        let mut categories: Vec<&ConfigRow> = Vec::new();
        let mut subcategories: Vec<&ConfigRow> = Vec::new();
        let mut fields: Vec<&ConfigRow> = Vec::new();
        let mut seen: HashSet<(RowLevel, Option<&str>, &str)> = HashSet::new();
        for row in rows {
            if row.level == RowLevel::Unknown {
                warn!(code = %row.config_code, "dropping configuration row with unknown level");
                continue;
            }
            // category codes are unique on their own
            let parent = if row.level == RowLevel::Category { None } else { row.parent_code.as_deref() };
            if !seen.insert((row.level, parent, row.config_code.as_str())) {
                warn!(code = %row.config_code, level = ?row.level, "dropping duplicate configuration row");
                continue;
            }
            match row.level {
                RowLevel::Category => categories.push(row),
                RowLevel::Subcategory => subcategories.push(row),
                RowLevel::Field => fields.push(row),
                RowLevel::Unknown => (),
            }
        }

        // group by declared parent
        let mut subs_by_parent: HashMap<&str, Vec<&ConfigRow>> = HashMap::new();
        let mut fields_by_parent: HashMap<&str, Vec<&ConfigRow>> = HashMap::new();
        for &sub in &subcategories {
            match sub.parent_code.as_deref() {
                Some(parent) => subs_by_parent.entry(parent).or_default().push(sub),
                None => warn!(code = %sub.config_code, "dropping subcategory without parent"),
            }
        }
        for &field in &fields {
            match field.parent_code.as_deref() {
                Some(parent) => fields_by_parent.entry(parent).or_default().push(field),
                None => warn!(code = %field.config_code, "dropping field without parent"),
            }
        }

        categories.sort_by_key(|c| c.display_order);
        let category_codes: HashSet<&str> = categories.iter().map(|&c| c.config_code.as_str()).collect();
        let mut claimed: HashSet<&str> = HashSet::new();
        let mut owners: HashMap<&str, &str> = HashMap::new();
        let mut tree = Vec::with_capacity(categories.len());
        for &category in &categories {
            let code = category.config_code.as_str();
            claimed.insert(code);
            let mut subs = subs_by_parent.get(code).cloned().unwrap_or_default();
            subs.sort_by_key(|s| s.display_order);
            let direct = fields_by_parent.get(code).cloned().unwrap_or_default();
            let via_subs = subs.iter().any(|s| fields_by_parent.get(s.config_code.as_str()).is_some_and(|f| !f.is_empty()));
            for &sub in &subs {
                let sub_code = sub.config_code.as_str();
                claimed.insert(sub_code);
                if let Some(first) = owners.insert(sub_code, code) {
                    warn!(subcategory = %sub_code, first = %first, category = %code, "subcategory code claimed by more than one category, its fields are shared");
                }
            }
            let layout = if via_subs {
                if !direct.is_empty() {
                    warn!(category = %code, count = direct.len(), "dropping fields attached directly to a category that has subcategories");
                }
                Layout::Subcategories(
                    subs.iter()
                        .map(|sub| Subcategory {
                            node: SchemaNode::from_row(sub),
                            fields: sorted_nodes(fields_by_parent.get(sub.config_code.as_str())),
                        })
                        .collect(),
                )
            } else {
                Layout::Fields(sorted_nodes(Some(&direct)))
            };
            debug!(category = %code, subcategories = matches!(layout, Layout::Subcategories(_)), "normalized category");
            tree.push(Category { node: SchemaNode::from_row(category), layout });
        }

        for (parent, orphans) in subs_by_parent.iter() {
            if !category_codes.contains(parent) {
                warn!(parent = %parent, count = orphans.len(), "dropping subcategories with unknown parent");
            }
        }
        for (parent, orphans) in fields_by_parent.iter() {
            if !claimed.contains(parent) {
                warn!(parent = %parent, count = orphans.len(), "dropping fields with unknown parent");
            }
        }
        SchemaTree { categories: tree }
    }

    pub fn categories(&self) -> &[Category] {
        &self.categories
    }

    pub fn category(&self, code: &str) -> Option<&Category> {
        self.categories.iter().find(|c| c.node.code == code)
    }

    /// Every leaf of the tree in display order.
    pub fn leaves(&self) -> Vec<Leaf<'_>> {
        self.categories.iter().flat_map(Category::leaves).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }
}

fn sorted_nodes(rows: Option<&Vec<&ConfigRow>>) -> Vec<SchemaNode> {
    let mut rows = rows.cloned().unwrap_or_default();
    rows.sort_by_key(|r| r.display_order);
    rows.into_iter().map(SchemaNode::from_row).collect()
}
