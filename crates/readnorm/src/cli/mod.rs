mod output;
mod resolve;

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use readnorm_core::{EngineConfig, LegacyProjector, LegacySchema, Pipeline};
use tracing::debug;

#[derive(Parser)]
#[command(
    name = "readnorm",
    about = "Normalize radiology reading-session XML into flat records",
    version
)]
pub struct Cli {
    /// Engine configuration (TOML or JSON)
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,
    /// Directory of JSON profiles, loaded on top of the built-in ones
    #[arg(long, value_name = "DIR")]
    pub profiles: Option<PathBuf>,
    /// Classifier configuration (JSON) replacing the built-in signatures
    #[arg(long, value_name = "FILE")]
    pub classifier: Option<PathBuf>,
    /// Fixed output columns (JSON with metadata, fields and reading lists)
    #[arg(long, value_name = "FILE")]
    pub schema: Option<PathBuf>,
    /// Only emit the final reading of each cluster
    #[arg(long)]
    pub final_only: bool,
    /// Write the quality report as JSON to this file
    #[arg(long, value_name = "FILE")]
    pub report: Option<PathBuf>,
    /// Reading-session XML files
    #[arg(required = true)]
    pub files: Vec<PathBuf>,
}

pub fn run(cli: &Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => EngineConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => EngineConfig::default(),
    };
    let pipeline = build_pipeline(cli, &config)?;

    debug!(files = cli.files.len(), "Processing batch");
    let batch = pipeline.process_files(&cli.files);

    let stdout = std::io::stdout();
    output::write_records(
        &mut stdout.lock(),
        batch.records(),
        pipeline.projector().config(),
        cli.final_only,
    )?;
    output::report_failures(&batch.failed);
    output::report_quality(&batch.report);

    if let Some(path) = &cli.report {
        let json = serde_json::to_string_pretty(&batch.report)?;
        std::fs::write(path, json)
            .with_context(|| format!("writing report {}", path.display()))?;
    }

    if batch.all_failed() {
        bail!("all {} documents failed", batch.failure_count());
    }
    Ok(())
}

fn build_pipeline(cli: &Cli, config: &EngineConfig) -> Result<Pipeline> {
    let mut pipeline = Pipeline::builtin(config)?;

    if let Some(path) = &cli.classifier {
        pipeline = pipeline.with_classifier(resolve::classifier(path)?);
    }
    if let Some(dir) = &cli.profiles {
        let registry = resolve::registry(dir, pipeline.classifier())?;
        let schema = LegacySchema::from_profiles(registry.latest());
        pipeline = pipeline
            .with_resolver(Box::new(registry))
            .with_projector(LegacyProjector::new(config.projection.clone()).with_schema(schema));
    }
    if let Some(path) = &cli.schema {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading schema {}", path.display()))?;
        let schema: LegacySchema = serde_json::from_str(&text)
            .with_context(|| format!("parsing schema {}", path.display()))?;
        pipeline = pipeline
            .with_projector(LegacyProjector::new(config.projection.clone()).with_schema(schema));
    }
    Ok(pipeline)
}
