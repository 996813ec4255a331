//! Categorical flow tables for Sankey and alluvial renderers.
//!
//! Row-level survey records (simulated or read from XML) get derived status
//! attributes from ordered rule lists, are grouped into a flow table with one
//! count per unique attribute tuple, and are exported as display labels, a
//! node/link graph, an axis table or a Parquet file.

pub mod aggregate;
pub mod columnar;
pub mod config;
pub mod error;
pub mod export;
pub mod label;
pub mod log;
pub mod pipeline;
pub mod record;
pub mod rules;
pub mod simulator;
pub mod xml_source;

pub use error::{FlowError, Result};
pub use export::{AxisTable, ExportOptions, FlowGraph, Link, Node};
pub use label::LabelNormalizer;
pub use pipeline::{Pipeline, PipelineOutput};
pub use record::{AttributeKey, FlowRow, FlowTable, Record};
