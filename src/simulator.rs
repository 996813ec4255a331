use rand::distr::weighted::WeightedIndex;
use rand::distr::Distribution;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::error::{FlowError, Result};
use crate::record::Record;

/// Allowed drift of a probability sum away from 1.0.
pub const PROBABILITY_TOLERANCE: f64 = 1e-6;

/// One possible value of a categorical attribute. A missing `value` is the
/// "not applicable" category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryValue {
    #[serde(default)]
    pub value: Option<String>,
    pub probability: f64,
}

impl CategoryValue {
    pub fn new(value: &str, probability: f64) -> Self {
        Self {
            value: Some(value.to_string()),
            probability,
        }
    }

    pub fn null(probability: f64) -> Self {
        Self {
            value: None,
            probability,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeSpec {
    pub name: String,
    pub values: Vec<CategoryValue>,
}

impl AttributeSpec {
    pub fn new(name: &str, values: Vec<CategoryValue>) -> Self {
        Self {
            name: name.to_string(),
            values,
        }
    }
}

/// Inclusive range the per-record discriminator is drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscriminatorRange {
    pub min: i64,
    pub max: i64,
}

impl Default for DiscriminatorRange {
    fn default() -> Self {
        Self { min: 1, max: 10 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    pub rows: usize,
    pub seed: u64,
    #[serde(default)]
    pub discriminator: DiscriminatorRange,
    #[serde(default)]
    pub attributes: Vec<AttributeSpec>,
}

// ─────────────────────────────────────────────────────────────
//  VALIDATED SIMULATOR
// ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct Sampler {
    name: String,
    values: Vec<Option<String>>,
    dist: WeightedIndex<f64>,
}

/// Draws synthetic records. Construction validates every attribute, so a
/// `Simulator` that exists can always produce output.
#[derive(Debug, Clone)]
pub struct Simulator {
    samplers: Vec<Sampler>,
    discriminator: DiscriminatorRange,
    rows: usize,
    seed: u64,
}

impl Simulator {
    pub fn new(config: &SimulationConfig) -> Result<Self> {
        let range = config.discriminator;
        if range.min > range.max {
            return Err(FlowError::InvalidDiscriminatorRange {
                min: range.min,
                max: range.max,
            });
        }

        let mut samplers: Vec<Sampler> = Vec::with_capacity(config.attributes.len());
        for spec in &config.attributes {
            if samplers.iter().any(|s| s.name == spec.name) {
                return Err(FlowError::DuplicateAttribute(spec.name.clone()));
            }
            samplers.push(Sampler::new(spec)?);
        }

        Ok(Self {
            samplers,
            discriminator: range,
            rows: config.rows,
            seed: config.seed,
        })
    }

    /// Names of the simulated attributes in declaration order.
    pub fn attribute_names(&self) -> Vec<String> {
        self.samplers.iter().map(|s| s.name.clone()).collect()
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn simulate(&self) -> Vec<Record> {
        self.simulate_with(self.rows, self.seed)
    }

    /// Same attributes, different size and seed.
    ///
    /// Per record the generator is consumed in a fixed order: one draw per
    /// attribute in declaration order, then the discriminator. That order is
    /// what makes a seed reproducible.
    #[instrument(skip(self), fields(attributes = self.samplers.len()))]
    pub fn simulate_with(&self, rows: usize, seed: u64) -> Vec<Record> {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut out = Vec::with_capacity(rows);

        for i in 0..rows {
            let mut record = Record::new(i as u64 + 1, 0);
            for sampler in &self.samplers {
                let value = sampler.values[sampler.dist.sample(&mut rng)].clone();
                record.attributes.insert(sampler.name.clone(), value);
            }
            record.discriminator =
                rng.random_range(self.discriminator.min..=self.discriminator.max);
            out.push(record);
        }

        info!(rows, seed, "simulated records");
        out
    }
}

impl Sampler {
    fn new(spec: &AttributeSpec) -> Result<Self> {
        if spec.values.is_empty() {
            return Err(FlowError::EmptyValues(spec.name.clone()));
        }

        if let Some(bad) = spec.values.iter().find(|v| v.probability < 0.0) {
            return Err(FlowError::NegativeProbability {
                attribute: spec.name.clone(),
                value: bad.value.clone(),
                probability: bad.probability,
            });
        }

        let sum: f64 = spec.values.iter().map(|v| v.probability).sum();
        if (sum - 1.0).abs() > PROBABILITY_TOLERANCE || !sum.is_finite() {
            return Err(FlowError::ProbabilitySum {
                attribute: spec.name.clone(),
                expected: 1.0,
                actual: sum,
            });
        }

        // Weights are non-negative and sum to one, so this only fails on
        // values the checks above already rejected.
        let dist = WeightedIndex::new(spec.values.iter().map(|v| v.probability)).map_err(|_| {
            FlowError::ProbabilitySum {
                attribute: spec.name.clone(),
                expected: 1.0,
                actual: sum,
            }
        })?;

        debug!(attribute = %spec.name, values = spec.values.len(), "sampler ready");
        Ok(Self {
            name: spec.name.clone(),
            values: spec.values.iter().map(|v| v.value.clone()).collect(),
            dist,
        })
    }
}
