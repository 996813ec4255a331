use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use serde::Serialize;
use tracing::{info, instrument};

use crate::aggregate::aggregate_with_schema;
use crate::config::PipelineConfig;
use crate::error::{FlowError, Result};
use crate::export::{check_axes, to_axis_table, to_graph, AxisTable, ExportOptions, FlowGraph};
use crate::label::LabelNormalizer;
use crate::record::{FlowTable, Record};
use crate::rules::StatusDeriver;
use crate::simulator::Simulator;

/// Everything one run produces, stage by stage.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineOutput {
    pub seed: Option<u64>,
    pub records: Vec<Record>,
    pub table: FlowTable,
    pub labels: Vec<String>,
    pub graph: FlowGraph,
    pub axis_table: AxisTable,
}

/// simulate → derive → aggregate → label → export, validated up front.
#[derive(Debug, Clone)]
pub struct Pipeline {
    simulator: Simulator,
    deriver: StatusDeriver,
    schema: Vec<String>,
    axes: Vec<String>,
    label_attributes: Vec<String>,
    normalizer: LabelNormalizer,
    export: ExportOptions,
    seed: u64,
}

impl Pipeline {
    /// Checks the whole configuration. Nothing is simulated here, and an
    /// invalid configuration never yields a partially usable pipeline.
    pub fn new(config: PipelineConfig) -> Result<Self> {
        let simulator = Simulator::new(&config.simulation)?;
        let primary = simulator.attribute_names();
        let deriver = StatusDeriver::new(&primary, config.derived)?;

        let mut schema = primary;
        schema.extend(deriver.attribute_names());

        check_axes(&schema, &config.axes)?;

        for name in &config.label.attributes {
            if !schema.contains(name) {
                return Err(FlowError::UnknownAttribute {
                    name: name.clone(),
                    context: "label attributes".to_string(),
                });
            }
        }
        let normalizer = LabelNormalizer::new(&config.label.separator)?
            .with_null_markers(config.label.null_markers);

        info!(attributes = ?schema, axes = ?config.axes, "pipeline configured");
        Ok(Self {
            simulator,
            deriver,
            schema,
            axes: config.axes,
            label_attributes: config.label.attributes,
            normalizer,
            export: config.export,
            seed: config.simulation.seed,
        })
    }

    /// Primary attributes followed by derived ones.
    pub fn schema(&self) -> &[String] {
        &self.schema
    }

    pub fn axes(&self) -> &[String] {
        &self.axes
    }

    pub fn simulator(&self) -> &Simulator {
        &self.simulator
    }

    pub fn run(&self) -> Result<PipelineOutput> {
        self.run_seed(self.seed)
    }

    #[instrument(skip(self))]
    pub fn run_seed(&self, seed: u64) -> Result<PipelineOutput> {
        let simulated = self.simulator.simulate_with(self.simulator.rows(), seed);
        let mut out = self.process(&simulated)?;
        out.seed = Some(seed);
        Ok(out)
    }

    /// Runs the stages after simulation over records from elsewhere (an
    /// XML export, say). Their attributes must be part of the schema.
    #[instrument(skip_all, fields(records = records.len()))]
    pub fn process(&self, records: &[Record]) -> Result<PipelineOutput> {
        let derived = self.deriver.derive(records);
        let table = aggregate_with_schema(&derived, &self.schema)?;
        let labels = self.normalizer.labels(&table, &self.label_attributes)?;
        let graph = to_graph(&table, &self.axes, self.export)?;
        let axis_table = to_axis_table(&table, &self.axes)?;

        info!(
            records = derived.len(),
            groups = table.len(),
            nodes = graph.nodes.len(),
            links = graph.links.len(),
            "pipeline run complete"
        );
        Ok(PipelineOutput {
            seed: None,
            records: derived,
            table,
            labels,
            graph,
            axis_table,
        })
    }

    /// Independent runs, one per seed, spread over a rayon pool. Output
    /// keeps the order of `seeds`.
    pub fn run_many(&self, seeds: &[u64], threads: Option<usize>) -> Result<Vec<PipelineOutput>> {
        let mut builder = ThreadPoolBuilder::new();
        if let Some(n) = threads {
            builder = builder.num_threads(n);
        }
        let pool = builder.build()?;

        pool.install(|| seeds.par_iter().map(|&seed| self.run_seed(seed)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_survey_runs() {
        let pipeline = Pipeline::new(PipelineConfig::default_survey()).unwrap();
        let out = pipeline.run().unwrap();

        assert_eq!(out.records.len(), 500);
        assert_eq!(out.table.total(), 500);
        assert_eq!(out.labels.len(), out.table.len());
        assert_eq!(out.axis_table.total(), 500);
        assert_eq!(out.seed, Some(2024));
    }

    #[test]
    fn test_unknown_axis_rejected_before_running() {
        let mut cfg = PipelineConfig::default_survey();
        cfg.axes.push("favourite_colour".to_string());
        match Pipeline::new(cfg).unwrap_err() {
            FlowError::UnknownAttribute { name, context } => {
                assert_eq!(name, "favourite_colour");
                assert_eq!(context, "axis list");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_single_axis_rejected() {
        let mut cfg = PipelineConfig::default_survey();
        cfg.axes.truncate(1);
        assert!(matches!(Pipeline::new(cfg), Err(FlowError::TooFewAxes { got: 1 })));
    }

    #[test]
    fn test_bad_label_attribute_rejected() {
        let mut cfg = PipelineConfig::default_survey();
        cfg.label.attributes.push("nope".into());
        assert!(Pipeline::new(cfg).is_err());
    }

    #[test]
    fn test_bad_probabilities_rejected() {
        let mut cfg = PipelineConfig::default_survey();
        cfg.simulation.attributes[1].values[0].probability = 0.9;
        assert!(matches!(Pipeline::new(cfg), Err(FlowError::ProbabilitySum { .. })));
    }

    #[test]
    fn test_run_many_matches_single_runs() {
        let pipeline = Pipeline::new(PipelineConfig::default_survey()).unwrap();
        let many = pipeline.run_many(&[1, 2, 3], Some(2)).unwrap();

        assert_eq!(many.len(), 3);
        for (out, seed) in many.iter().zip([1u64, 2, 3]) {
            assert_eq!(out.seed, Some(seed));
            assert_eq!(out.table, pipeline.run_seed(seed).unwrap().table);
        }
    }
}
