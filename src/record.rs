use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::error::{FlowError, Result};

/// Named categorical values of one row. `None` means "not applicable".
///
/// A `BTreeMap` keeps the key hashable and its iteration order independent
/// of insertion order, so two rows with the same values always compare and
/// hash equal.
pub type AttributeKey = BTreeMap<String, Option<String>>;

// ─────────────────────────────────────────────────────────────
//  ROW-LEVEL RECORD
// ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Record {
    pub id: u64,
    pub discriminator: i64,
    pub attributes: AttributeKey,
}

impl Record {
    pub fn new(id: u64, discriminator: i64) -> Self {
        Self {
            id,
            discriminator,
            attributes: AttributeKey::new(),
        }
    }

    /// Builder-style setter, mostly for tests and hand-made datasets.
    pub fn with(mut self, name: &str, value: Option<&str>) -> Self {
        self.attributes
            .insert(name.to_string(), value.map(str::to_string));
        self
    }

    /// Value of `name`, flattening "absent" and "null" into `None`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).and_then(|v| v.as_deref())
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        self.attributes.contains_key(name)
    }
}

// ─────────────────────────────────────────────────────────────
//  AGGREGATED FLOW ROW
// ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlowRow {
    pub attributes: AttributeKey,
    pub count: u64,
}

impl FlowRow {
    pub fn new(attributes: AttributeKey, count: u64) -> Self {
        Self { attributes, count }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).and_then(|v| v.as_deref())
    }
}

impl fmt::Display for FlowRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FlowRow(")?;
        for (name, value) in &self.attributes {
            write!(f, "{}={}, ", name, value.as_deref().unwrap_or("-"))?;
        }
        write!(f, "count={})", self.count)
    }
}

// ─────────────────────────────────────────────────────────────
//  FLOW TABLE = schema + unique groups
// ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlowTable {
    attributes: Vec<String>,
    rows: Vec<FlowRow>,
}

impl FlowTable {
    /// Builds a table from rows produced elsewhere.
    ///
    /// Attributes a row does not mention are filled in as null. A row that
    /// names an attribute outside the schema, or a tuple that appears twice,
    /// is rejected.
    pub fn from_rows(attributes: Vec<String>, rows: Vec<FlowRow>) -> Result<Self> {
        let mut seen = ahash::AHashSet::with_capacity(rows.len());
        let mut out = Vec::with_capacity(rows.len());

        for mut row in rows {
            if let Some(extra) = row
                .attributes
                .keys()
                .find(|k| !attributes.iter().any(|a| a == *k))
            {
                return Err(FlowError::UnknownAttribute {
                    name: extra.clone(),
                    context: "flow row".to_string(),
                });
            }
            for name in &attributes {
                row.attributes.entry(name.clone()).or_insert(None);
            }
            if !seen.insert(row.attributes.clone()) {
                return Err(FlowError::DuplicateGroup(format!("{:?}", row.attributes)));
            }
            out.push(row);
        }

        Ok(Self {
            attributes,
            rows: out,
        })
    }

    /// Caller guarantees rows are unique and match `attributes`.
    pub(crate) fn from_unique(attributes: Vec<String>, rows: Vec<FlowRow>) -> Self {
        Self { attributes, rows }
    }

    pub fn attributes(&self) -> &[String] {
        &self.attributes
    }

    pub fn rows(&self) -> &[FlowRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Sum of all counts; equals the number of aggregated records.
    pub fn total(&self) -> u64 {
        self.rows.iter().map(|r| r.count).sum()
    }

    /// Fails with context when `name` is not a column of this table.
    pub fn require(&self, name: &str, context: &str) -> Result<()> {
        if self.attributes.iter().any(|a| a == name) {
            Ok(())
        } else {
            Err(FlowError::UnknownAttribute {
                name: name.to_string(),
                context: context.to_string(),
            })
        }
    }

    /// Rows ordered by their attribute tuple.
    pub fn sorted(mut self) -> Self {
        self.rows.sort_by(|a, b| a.attributes.cmp(&b.attributes));
        self
    }
}
