use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

use survey_flow::columnar::write_parquet;
use survey_flow::config::PipelineConfig;
use survey_flow::pipeline::{Pipeline, PipelineOutput};
use survey_flow::xml_source::{read_records, write_records};

#[derive(Debug, Parser)]
#[command(name = "survey_flow", about = "Simulate survey records and build flow tables")]
struct Args {
    /// Pipeline configuration (TOML). Built-in survey when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the simulation seed.
    #[arg(long, conflicts_with = "input")]
    seed: Option<u64>,

    /// Override the number of simulated records.
    #[arg(long, conflicts_with = "input")]
    rows: Option<usize>,

    /// Read records from an XML file instead of simulating them.
    #[arg(long, conflicts_with = "runs")]
    input: Option<PathBuf>,

    /// Number of independent runs, seeds counting up from --seed.
    #[arg(long, default_value_t = 1)]
    runs: u64,

    /// Worker threads for multiple runs.
    #[arg(long)]
    threads: Option<usize>,

    /// Write the (derived) records as XML.
    #[arg(long)]
    records_out: Option<PathBuf>,

    /// Write the node/link graph as JSON.
    #[arg(long)]
    graph_out: Option<PathBuf>,

    /// Write the flow table as Parquet.
    #[arg(long)]
    parquet_out: Option<PathBuf>,

    #[arg(long, default_value = "logs")]
    log_dir: PathBuf,
}

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    let _guard = survey_flow::log::init(&args.log_dir).context("failed to set up logging")?;

    let mut config = PipelineConfig::load(args.config.as_deref()).context("failed to load configuration")?;
    if let Some(seed) = args.seed {
        config.simulation.seed = seed;
    }
    if let Some(rows) = args.rows {
        config.simulation.rows = rows;
    }
    let base_seed = config.simulation.seed;

    let pipeline = Pipeline::new(config).context("invalid pipeline configuration")?;
    let start = Instant::now();

    let outputs: Vec<PipelineOutput> = if let Some(input) = &args.input {
        let records = read_records(input).with_context(|| format!("reading {}", input.display()))?;
        vec![pipeline.process(&records)?]
    } else if args.runs > 1 {
        let seeds: Vec<u64> = (0..args.runs).map(|i| base_seed.wrapping_add(i)).collect();
        pipeline.run_many(&seeds, args.threads)?
    } else {
        vec![pipeline.run()?]
    };

    for (i, out) in outputs.iter().enumerate() {
        print_summary(&pipeline, out);

        // one file per run when there are several
        let suffix = |path: &PathBuf| -> PathBuf {
            if outputs.len() == 1 {
                path.clone()
            } else {
                run_path(path, i)
            }
        };

        if let Some(path) = &args.records_out {
            write_records(&out.records, &suffix(path))?;
        }
        if let Some(path) = &args.graph_out {
            let path = suffix(path);
            fs::write(&path, out.graph.to_json()?).with_context(|| format!("writing {}", path.display()))?;
        }
        if let Some(path) = &args.parquet_out {
            write_parquet(&out.table, &suffix(path))?;
        }
    }

    if outputs.iter().any(|o| o.graph.links.is_empty()) {
        warn!("at least one run produced no links; check the axis attributes for nulls");
    }

    let elapsed = start.elapsed();
    info!(runs = outputs.len(), secs = elapsed.as_secs_f64(), "done");
    Ok(())
}

/// `out/graph.json` becomes `out/graph_2.json`; `out/graph` becomes `out/graph_2`.
fn run_path(path: &Path, run: usize) -> PathBuf {
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("out");
    match path.extension().and_then(|s| s.to_str()) {
        Some(ext) => path.with_file_name(format!("{stem}_{run}.{ext}")),
        None => path.with_file_name(format!("{stem}_{run}")),
    }
}

fn print_summary(pipeline: &Pipeline, out: &PipelineOutput) {
    match out.seed {
        Some(seed) => println!("\nRun with seed {seed}: {} records", out.records.len()),
        None => println!("\nInput: {} records", out.records.len()),
    }

    println!("Flow table ({} groups):", out.table.len());
    for (row, label) in out.table.rows().iter().zip(&out.labels) {
        println!("  {:>5}  {}", row.count, if label.is_empty() { "(none)" } else { label });
    }

    println!("Axes: {}", pipeline.axes().join(" -> "));
    for link in &out.graph.links {
        println!(
            "  {} -> {}: {}",
            out.graph.nodes[link.source].name, out.graph.nodes[link.target].name, link.value
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_path_keeps_extension() {
        assert_eq!(run_path(Path::new("out/graph.json"), 2), PathBuf::from("out/graph_2.json"));
        assert_eq!(run_path(Path::new("out/records"), 0), PathBuf::from("out/records_0"));
    }

    #[test]
    fn test_overrides_conflict_with_input() {
        for flag in ["--seed", "--rows"] {
            let res = Args::try_parse_from(["survey_flow", "--input", "r.xml", flag, "3"]);
            assert!(res.is_err(), "{flag} accepted together with --input");
        }
        assert!(Args::try_parse_from(["survey_flow", "--seed", "3", "--rows", "9"]).is_ok());
    }
}
