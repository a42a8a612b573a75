use anyhow::{bail, Context};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use covid_pipeline::config::Config;
use covid_pipeline::observability::{init_logging, metrics};
use covid_pipeline::pipeline::steps::{csv_to_raw, raw_to_trusted, trusted_to_refined, GroupingSpec};
use covid_pipeline::pipeline::PipelineExecutionResult;
use covid_pipeline::scheduler::{midnight, RunLedger, Scheduler};
use covid_pipeline::table::{preview, read_parquet};
use std::path::PathBuf;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "covid-pipeline")]
#[command(about = "Batch pipeline for COVID case notifications: ingest, clean and aggregate")]
#[command(version)]
struct Cli {
    /// Path to a TOML configuration file (default: ./pipeline.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline once for a logical date
    Run {
        /// Logical date (YYYY-MM-DD); defaults to the latest due interval
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Run the pipeline for every interval between two dates, inclusive
    Backfill {
        #[arg(long)]
        start: NaiveDate,
        #[arg(long)]
        end: NaiveDate,
    },
    /// Keep running, triggering a run whenever an interval ends
    Schedule,
    /// Run one stage on explicit paths, outside any scheduled run
    Stage {
        #[arg(value_enum)]
        stage: StageName,
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        output: PathBuf,
    },
    /// Print the schema and first rows of a Parquet file
    Inspect {
        path: PathBuf,
        #[arg(long, default_value_t = 10)]
        rows: usize,
    },
    /// List recorded runs, newest first
    History {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum StageName {
    Ingest,
    Clean,
    Aggregate,
}

fn print_summary(result: &PipelineExecutionResult) {
    println!(
        "\n📊 Run {} for {}:",
        result.run_id_string(),
        result.context.logical_date().date_naive()
    );
    for outcome in &result.steps {
        let detail = match (&outcome.result, &outcome.error) {
            (Some(r), _) => r.message.clone(),
            (None, Some(e)) => e.clone(),
            (None, None) => String::new(),
        };
        println!(
            "   {:<13} {:<16} attempts={} {}",
            outcome.step,
            outcome.status.as_str(),
            outcome.attempts,
            detail
        );
    }
    if let Some(duration) = result.duration() {
        println!("   Duration: {}ms", duration.num_milliseconds());
    }
}

fn run_stage(config: &Config, stage: StageName, input: PathBuf, output: PathBuf) -> anyhow::Result<()> {
    let codec = config.storage.compression;
    match stage {
        StageName::Ingest => {
            let report = csv_to_raw(&input, config.storage.delimiter_byte()?, &output, codec)?;
            println!(
                "✅ Ingested {} rows ({} dropped, {} padded) into {}",
                report.written.rows,
                report.read.rows_dropped,
                report.read.rows_padded,
                output.display()
            );
        }
        StageName::Clean => {
            let report = raw_to_trusted(&input, &output, codec, &config.columns.birth_date)?;
            println!(
                "✅ Kept {} of {} rows in {}",
                report.rows_kept,
                report.rows_in,
                output.display()
            );
        }
        StageName::Aggregate => {
            let grouping = GroupingSpec {
                municipality: config.columns.municipality.clone(),
                age: config.columns.age.clone(),
                top_n: config.columns.top_n,
            };
            let report = trusted_to_refined(&input, &output, codec, &grouping)?;
            println!(
                "✅ Wrote top {} of {} groups to {}",
                report.written.rows,
                report.distinct_groups,
                output.display()
            );
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    let _log_guard = init_logging(&config.logging);
    metrics::init_or_warn();

    info!(
        dag_id = %config.dag.dag_id,
        data_root = %config.storage.data_root.display(),
        "Configuration loaded"
    );

    match cli.command {
        Commands::Run { date } => {
            let mut scheduler = Scheduler::new(&config)?;
            let logical_date = match date {
                Some(d) => midnight(d),
                None => match scheduler
                    .schedule()
                    .latest_due(midnight(config.dag.start_date), Utc::now())
                {
                    Some(d) => d,
                    None => bail!(
                        "No interval of schedule '{}' has ended since {}",
                        config.dag.schedule,
                        config.dag.start_date
                    ),
                },
            };

            println!("🚀 Running '{}' for {}", config.dag.dag_id, logical_date.date_naive());
            let result = scheduler.run_once(logical_date).await?;
            print_summary(&result);
            result.into_result()?;
            println!("✅ Run completed successfully");
        }
        Commands::Backfill { start, end } => {
            if end < start {
                bail!("--end ({}) is before --start ({})", end, start);
            }
            let mut scheduler = Scheduler::new(&config)?;
            let results = scheduler.backfill(midnight(start), midnight(end)).await?;
            for result in &results {
                print_summary(result);
            }
            let failed = results.iter().filter(|r| !r.success).count();
            println!("\n🔁 Backfill finished: {} run(s), {} failed", results.len(), failed);
            if failed > 0 {
                bail!("{} backfill run(s) failed", failed);
            }
        }
        Commands::Schedule => {
            println!(
                "📅 Scheduling '{}' ({}), catchup={}",
                config.dag.dag_id, config.dag.schedule, config.dag.catchup
            );
            let mut scheduler = Scheduler::new(&config)?;
            scheduler
                .run_forever(async {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        error!("Failed to listen for shutdown signal: {}", e);
                    }
                })
                .await?;
        }
        Commands::Stage {
            stage,
            input,
            output,
        } => run_stage(&config, stage, input, output)?,
        Commands::Inspect { path, rows } => {
            let batch = read_parquet(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            println!("📄 {} ({} rows)", path.display(), batch.num_rows());
            for field in batch.schema().fields() {
                println!("   {}: {}", field.name(), field.data_type());
            }
            println!("{}", preview(&batch, rows)?);
        }
        Commands::History { limit } => {
            let ledger = RunLedger::open_at(config.storage.ledger_path())?;
            let runs = ledger.recent_runs(&config.dag.dag_id, limit)?;
            if runs.is_empty() {
                println!("No runs recorded for '{}'", config.dag.dag_id);
            }
            for run in runs {
                println!(
                    "{}  {:<8} {}  finished={}",
                    run.logical_date,
                    run.state.as_str(),
                    run.run_id,
                    run.finished_at.as_deref().unwrap_or("-")
                );
                for task in ledger.task_instances(&run.run_id)? {
                    let checksum = task
                        .metadata
                        .get("sha256")
                        .map(|h| format!(" sha256={}", &h[..h.len().min(12)]))
                        .unwrap_or_default();
                    println!(
                        "    {:<13} {:<16} attempts={}{}",
                        task.step, task.state, task.attempts, checksum
                    );
                }
            }
        }
    }

    Ok(())
}
