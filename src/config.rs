use std::path::Path;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::export::ExportOptions;
use crate::label::DEFAULT_SEPARATOR;
use crate::rules::{Condition, DerivedAttribute, Rule};
use crate::simulator::{AttributeSpec, CategoryValue, DiscriminatorRange, SimulationConfig};

/// Prefix for environment overrides, e.g. `FLOW_SIMULATION__SEED=7`.
pub const ENV_PREFIX: &str = "FLOW";

fn default_separator() -> String {
    DEFAULT_SEPARATOR.to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelConfig {
    #[serde(default)]
    pub attributes: Vec<String>,
    #[serde(default = "default_separator")]
    pub separator: String,
    #[serde(default)]
    pub null_markers: Vec<String>,
}

impl Default for LabelConfig {
    fn default() -> Self {
        Self {
            attributes: Vec::new(),
            separator: default_separator(),
            null_markers: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub simulation: SimulationConfig,
    #[serde(default)]
    pub derived: Vec<DerivedAttribute>,
    pub axes: Vec<String>,
    #[serde(default)]
    pub label: LabelConfig,
    #[serde(default)]
    pub export: ExportOptions,
}

impl PipelineConfig {
    /// Reads `path` (any format the `config` crate knows by extension) and
    /// applies `FLOW_*` environment overrides on top. Without a path the
    /// built-in survey is the base layer.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let builder = match path {
            Some(p) => Config::builder().add_source(File::from(p)),
            None => Config::builder().add_source(Config::try_from(&Self::default_survey())?),
        };

        let cfg = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        Ok(cfg.try_deserialize()?)
    }

    /// Parses a TOML document without touching the environment.
    pub fn from_toml(text: &str) -> Result<Self> {
        let cfg = Config::builder()
            .add_source(File::from_str(text, config::FileFormat::Toml))
            .build()?;
        Ok(cfg.try_deserialize()?)
    }

    /// Car ownership survey: who owns a car, how they bought it, and whether
    /// non-owners are considering buying one.
    pub fn default_survey() -> Self {
        let owns = |v: &str| Condition::equals("owns_car", v);
        let at_least = |value: i64| Condition::DiscriminatorAtLeast { value };

        PipelineConfig {
            simulation: SimulationConfig {
                rows: 500,
                seed: 2024,
                discriminator: DiscriminatorRange { min: 1, max: 10 },
                attributes: vec![
                    AttributeSpec::new(
                        "age_group",
                        vec![
                            CategoryValue::new("18-34", 0.35),
                            CategoryValue::new("35-54", 0.40),
                            CategoryValue::new("55+", 0.25),
                        ],
                    ),
                    AttributeSpec::new(
                        "owns_car",
                        vec![CategoryValue::new("Yes", 0.6), CategoryValue::new("No", 0.4)],
                    ),
                ],
            },
            derived: vec![
                DerivedAttribute::new(
                    "purchase_channel",
                    vec![
                        Rule::new(Condition::all(vec![owns("Yes"), at_least(7)]), "Dealer (new)"),
                        Rule::new(Condition::all(vec![owns("Yes"), at_least(4)]), "Dealer (used)"),
                        Rule::new(owns("Yes"), "Private sale"),
                    ],
                ),
                DerivedAttribute::new(
                    "consideration",
                    vec![
                        Rule::new(Condition::all(vec![owns("No"), at_least(6)]), "Considering"),
                        Rule::new(owns("No"), "Not considering"),
                    ],
                ),
            ],
            axes: vec![
                "age_group".to_string(),
                "owns_car".to_string(),
                "purchase_channel".to_string(),
            ],
            label: LabelConfig {
                attributes: vec![
                    "owns_car".to_string(),
                    "purchase_channel".to_string(),
                    "consideration".to_string(),
                ],
                ..LabelConfig::default()
            },
            export: ExportOptions::default(),
        }
    }
}
