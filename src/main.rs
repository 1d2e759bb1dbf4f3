use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

use finsift::config::AppConfig;
use finsift::envelope::BatchEnvelope;
use finsift::observability::metrics;
use finsift::pipeline::Pipeline;
use finsift::schema::{loader, SchemaRegistry};
use finsift::sink::{self, JsonLinesSink};

#[derive(Parser)]
#[command(name = "finsift")]
#[command(about = "Validation and reconciliation pipeline for financial report extracts")]
#[command(version = "0.1.0")]
struct Cli {
    /// Path to the application config file
    #[arg(long, default_value = "config.toml")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process a batch envelope through the pipeline
    Run {
        /// Path to the batch envelope JSON file
        #[arg(long)]
        batch: PathBuf,
        /// Override the registry directory from config
        #[arg(long)]
        registry: Option<String>,
        /// Override the worker pool size from config
        #[arg(long)]
        workers: Option<usize>,
        /// Override the output directory from config
        #[arg(long)]
        output: Option<String>,
        /// Print collected metrics after the run
        #[arg(long)]
        print_metrics: bool,
    },
    /// Structurally validate a batch envelope without processing it
    ValidateBatch {
        /// Path to the batch envelope JSON file
        #[arg(long)]
        batch: PathBuf,
    },
    /// List the schema kinds and versions published in the registry
    Registry {
        /// Override the registry directory from config
        #[arg(long)]
        registry: Option<String>,
    },
}

fn load_registry(dir: &str) -> anyhow::Result<Arc<SchemaRegistry>> {
    let registry = SchemaRegistry::new();
    match loader::load_registry_dir(&registry, dir) {
        Ok(count) => {
            metrics::registry::load_success();
            info!(count, dir, "schema registry loaded");
            Ok(Arc::new(registry))
        }
        Err(e) => {
            metrics::registry::load_error();
            Err(e.into())
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    finsift::logging::init_logging();
    if let Err(e) = metrics::init() {
        error!("Failed to initialize metrics: {}", e);
    }

    let cli = Cli::parse();
    let config = AppConfig::load_or_default(&cli.config)?;

    match cli.command {
        Commands::Run {
            batch,
            registry,
            workers,
            output,
            print_metrics,
        } => {
            let registry_dir = registry.unwrap_or(config.registry.dir);
            let workers = workers.unwrap_or(config.pipeline.workers);
            let output_dir = output.unwrap_or(config.output.dir);

            let run_id = Uuid::new_v4();
            info!(%run_id, batch = %batch.display(), "starting pipeline run");

            let registry = load_registry(&registry_dir)?;
            let envelope = BatchEnvelope::from_path(&batch)?;
            let pipeline = Pipeline::new(registry, workers);

            match pipeline.run(envelope).await {
                Ok(result) => {
                    let output_sink = JsonLinesSink::new(output_dir.as_str())?;
                    sink::deliver(&output_sink, &result).await?;

                    println!("\n📊 Batch results for {}:", result.batch_id);
                    println!(
                        "   Schema: {} v{}",
                        result.schema_kind, result.schema_version
                    );
                    println!("   Input records: {}", result.input_count);
                    println!("   Clean: {}", result.clean_count);
                    println!("   Quarantined: {}", result.quarantined_count);
                    println!("   Deduplicated: {}", result.deduplicated_count);
                    if !result.rule_failure_counts.is_empty() {
                        println!("\n⚠️  Failures by rule:");
                        for (rule, count) in &result.rule_failure_counts {
                            println!("   - {}: {}", rule, count);
                        }
                    }
                    println!("   Output directory: {}", output_dir);

                    if print_metrics {
                        if let Some(rendered) = metrics::render() {
                            println!("\n{}", rendered);
                        }
                    }
                }
                Err(e) => {
                    metrics::batch::failed(e.error_type());
                    error!("Batch failed: {}", e);
                    println!("❌ Batch failed: {}", e);
                    std::process::exit(1);
                }
            }
        }
        Commands::ValidateBatch { batch } => match BatchEnvelope::from_path(&batch) {
            Ok(envelope) => {
                println!(
                    "✅ Envelope is valid: batch '{}' with {} records for schema '{}'",
                    envelope.batch_id,
                    envelope.records.len(),
                    envelope.schema.kind
                );
            }
            Err(e) => {
                println!("❌ Envelope is invalid: {}", e);
                std::process::exit(1);
            }
        },
        Commands::Registry { registry } => {
            let registry_dir = registry.unwrap_or(config.registry.dir);
            let registry = load_registry(&registry_dir)?;
            println!("📋 Published schemas in {}:", registry_dir);
            for (kind, versions) in registry.kinds() {
                let versions: Vec<String> =
                    versions.iter().map(|v| format!("v{}", v)).collect();
                println!("   {} ({})", kind, versions.join(", "));
            }
        }
    }

    Ok(())
}
