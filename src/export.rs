use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::error::{FlowError, Result};
use crate::record::FlowTable;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Node {
    pub name: String,
    /// Set only when nodes are qualified by axis.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub axis: Option<String>,
}

/// Weighted edge between two node indices. `hop` is the index of the left
/// axis of the adjacent pair the link was built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Link {
    pub source: usize,
    pub target: usize,
    pub value: u64,
    pub hop: usize,
}

/// Node/link structure for Sankey-style renderers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FlowGraph {
    pub nodes: Vec<Node>,
    pub links: Vec<Link>,
}

impl FlowGraph {
    /// Index of the node named `name`. With qualified nodes the same name
    /// can sit on several axes. Pass `axis` to pick one, or `None` for the
    /// first match in node order.
    pub fn node_index(&self, name: &str, axis: Option<&str>) -> Option<usize> {
        self.nodes
            .iter()
            .position(|n| n.name == name && axis.map_or(true, |a| n.axis.as_deref() == Some(a)))
    }

    /// Sum of link values built from axis pair (`hop`, `hop + 1`).
    pub fn hop_total(&self, hop: usize) -> u64 {
        self.links.iter().filter(|l| l.hop == hop).map(|l| l.value).sum()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportOptions {
    /// Treat the same value on two axes as two distinct nodes.
    #[serde(default)]
    pub qualify_nodes: bool,
}

/// Rejects axis lists a flow export cannot use: fewer than two axes, a
/// repeated axis, or a name missing from `schema`.
pub fn check_axes(schema: &[String], axes: &[String]) -> Result<()> {
    if axes.len() < 2 {
        return Err(FlowError::TooFewAxes { got: axes.len() });
    }
    for (i, axis) in axes.iter().enumerate() {
        if axes[..i].contains(axis) {
            return Err(FlowError::DuplicateAxis(axis.clone()));
        }
        if !schema.contains(axis) {
            return Err(FlowError::UnknownAttribute {
                name: axis.clone(),
                context: "axis list".to_string(),
            });
        }
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────
//  FLOW TABLE → NODES + LINKS
// ─────────────────────────────────────────────────────────────

/// Builds the node/link graph for `axes`.
///
/// Nodes are numbered in first-seen order walking axis by axis, each axis
/// in row order. For every adjacent axis pair, rows with a value at both
/// ends add their count to the link between those two nodes. A null at
/// either end means the row contributes nothing to that hop.
#[instrument(skip(table), fields(rows = table.len()))]
pub fn to_graph(table: &FlowTable, axes: &[String], options: ExportOptions) -> Result<FlowGraph> {
    check_axes(table.attributes(), axes)?;

    let node_key = |axis: &str, value: &str| -> (Option<String>, String) {
        let axis = options.qualify_nodes.then(|| axis.to_string());
        (axis, value.to_string())
    };

    let mut graph = FlowGraph::default();
    let mut node_ids: AHashMap<(Option<String>, String), usize> = AHashMap::new();

    for axis in axes {
        for row in table.rows() {
            let Some(value) = row.get(axis) else { continue };
            let key = node_key(axis.as_str(), value);
            if !node_ids.contains_key(&key) {
                node_ids.insert(key.clone(), graph.nodes.len());
                graph.nodes.push(Node {
                    name: key.1,
                    axis: key.0,
                });
            }
        }
    }

    let mut link_ids: AHashMap<(usize, usize, usize), usize> = AHashMap::new();

    for (hop, pair) in axes.windows(2).enumerate() {
        for row in table.rows() {
            let (Some(from), Some(to)) = (row.get(&pair[0]), row.get(&pair[1])) else {
                continue;
            };
            let source = node_ids[&node_key(pair[0].as_str(), from)];
            let target = node_ids[&node_key(pair[1].as_str(), to)];

            match link_ids.get(&(hop, source, target)) {
                Some(&i) => graph.links[i].value += row.count,
                None => {
                    link_ids.insert((hop, source, target), graph.links.len());
                    graph.links.push(Link {
                        source,
                        target,
                        value: row.count,
                        hop,
                    });
                }
            }
        }
    }

    info!(nodes = graph.nodes.len(), links = graph.links.len(), "exported flow graph");
    Ok(graph)
}

// ─────────────────────────────────────────────────────────────
//  FLOW TABLE → AXIS TABLE (alluvial-style input)
// ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AxisRow {
    pub values: Vec<Option<String>>,
    pub count: u64,
}

/// Flow rows projected onto the axis columns; `values[i]` belongs to
/// `axes[i]`. Rows that only differed outside the axes are merged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AxisTable {
    pub axes: Vec<String>,
    pub rows: Vec<AxisRow>,
}

impl AxisTable {
    pub fn total(&self) -> u64 {
        self.rows.iter().map(|r| r.count).sum()
    }
}

pub fn to_axis_table(table: &FlowTable, axes: &[String]) -> Result<AxisTable> {
    check_axes(table.attributes(), axes)?;

    let mut index: AHashMap<Vec<Option<String>>, usize> = AHashMap::new();
    let mut rows: Vec<AxisRow> = Vec::new();

    for row in table.rows() {
        let values: Vec<Option<String>> = axes
            .iter()
            .map(|a| row.get(a).map(str::to_string))
            .collect();
        match index.get(&values) {
            Some(&i) => rows[i].count += row.count,
            None => {
                index.insert(values.clone(), rows.len());
                rows.push(AxisRow {
                    values,
                    count: row.count,
                });
            }
        }
    }

    Ok(AxisTable {
        axes: axes.to_vec(),
        rows,
    })
}
