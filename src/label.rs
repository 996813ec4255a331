use crate::error::{FlowError, Result};
use crate::record::{FlowRow, FlowTable};

pub const DEFAULT_SEPARATOR: &str = ", ";

/// Joins attribute values into display labels and cleans up what is left
/// over when some of them are null.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelNormalizer {
    separator: String,
    null_markers: Vec<String>,
}

impl Default for LabelNormalizer {
    fn default() -> Self {
        Self {
            separator: DEFAULT_SEPARATOR.to_string(),
            null_markers: Vec::new(),
        }
    }
}

impl LabelNormalizer {
    pub fn new(separator: &str) -> Result<Self> {
        if separator.is_empty() {
            return Err(FlowError::EmptySeparator);
        }
        Ok(Self {
            separator: separator.to_string(),
            null_markers: Vec::new(),
        })
    }

    /// Placeholder strings (for example a source's "NA") to treat as null.
    pub fn with_null_markers(mut self, markers: Vec<String>) -> Self {
        self.null_markers = markers;
        self
    }

    pub fn separator(&self) -> &str {
        &self.separator
    }

    fn is_marker(&self, segment: &str) -> bool {
        self.null_markers.iter().any(|m| m == segment)
    }

    /// Joins the non-null values in order, then cleans the result.
    pub fn normalize<'a, I>(&self, values: I) -> String
    where
        I: IntoIterator<Item = Option<&'a str>>,
    {
        let joined = values
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(self.separator.as_str());
        self.clean(&joined)
    }

    /// Splits on the separator, trims whitespace off each segment, drops
    /// segments that are blank, placeholders, or nothing but separator
    /// characters, and joins the rest back. Characters inside a value are
    /// kept, so "55+" survives a " + " separator. Applying it to its own
    /// output changes nothing.
    pub fn clean(&self, text: &str) -> String {
        text.split(self.separator.as_str())
            .map(str::trim)
            .filter(|seg| !self.is_stray(seg) && !self.is_marker(seg))
            .collect::<Vec<_>>()
            .join(self.separator.as_str())
    }

    fn is_stray(&self, segment: &str) -> bool {
        segment
            .chars()
            .all(|c| c.is_whitespace() || self.separator.contains(c))
    }

    /// Label of one flow row. Attributes the row lacks count as null.
    pub fn label(&self, row: &FlowRow, attributes: &[String]) -> String {
        self.normalize(attributes.iter().map(|a| row.get(a)))
    }

    /// Labels for every row of `table`, in row order.
    pub fn labels(&self, table: &FlowTable, attributes: &[String]) -> Result<Vec<String>> {
        for name in attributes {
            table.require(name, "label attributes")?;
        }
        Ok(table.rows().iter().map(|r| self.label(r, attributes)).collect())
    }
}
