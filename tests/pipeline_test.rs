use anyhow::Result;
use arrow::array::AsArray;
use arrow::record_batch::RecordBatch;
use arrow::datatypes::Int64Type;
use chrono::{NaiveDate, TimeZone, Utc};
use covid_pipeline::config::Config;
use covid_pipeline::constants::{Tier, AGGREGATE_STEP, CLEAN_STEP, INGEST_STEP, REFINED_PATH_KEY};
use covid_pipeline::pipeline::{
    PipelineConfig, PipelineExecutionResult, PipelineOrchestrator, RunContext, StepStatus,
};
use covid_pipeline::scheduler::{RunState, Scheduler};
use covid_pipeline::table::read_parquet;
use std::fs;
use std::path::Path;
use tempfile::tempdir;

const HEADER: &str = "ID_MUNICIP;NU_IDADE_N;DT_NASC;SG_UF";

fn config_in(root: &Path) -> Config {
    let mut config = Config::default();
    config.storage.data_root = root.to_path_buf();
    config.dag.start_date = NaiveDate::from_ymd_opt(2021, 4, 23).unwrap();
    config.dag.retry_delay_secs = 0;
    config
}

fn write_source(config: &Config, rows: &[&str]) {
    let mut content = String::from(HEADER);
    content.push('\n');
    for row in rows {
        content.push_str(row);
        content.push('\n');
    }
    fs::write(config.storage.source_path(), content).unwrap();
}

async fn run(config: &Config) -> Result<PipelineExecutionResult> {
    let orchestrator = PipelineOrchestrator::new(PipelineConfig::from_config(config)?)?;
    let ctx = RunContext::new(
        config.dag.dag_id.clone(),
        Utc.with_ymd_and_hms(2021, 4, 23, 0, 0, 0).unwrap(),
    );
    Ok(orchestrator.run_pipeline(ctx).await.into_result()?)
}

fn triples(batch: &RecordBatch) -> Vec<(i64, i64, i64)> {
    let municipality = batch.column(0).as_primitive::<Int64Type>();
    let age = batch.column(1).as_primitive::<Int64Type>();
    let count = batch.column(2).as_primitive::<Int64Type>();
    (0..batch.num_rows())
        .map(|i| (municipality.value(i), age.value(i), count.value(i)))
        .collect()
}

#[tokio::test]
async fn test_full_run_produces_all_tiers() -> Result<()> {
    let temp_dir = tempdir()?;
    let config = config_in(temp_dir.path());
    write_source(
        &config,
        &[
            "355030;34;1987-03-01;SP",
            "355030;34;1987-05-09;SP",
            "330455;61;;RJ",
            "330455;61;1960-01-20;RJ",
            "310620;8;2013-07-07;MG",
        ],
    );

    let result = run(&config).await?;
    assert!(result.steps.iter().all(|s| s.status == StepStatus::Success));

    let raw = read_parquet(&config.storage.tier_file(Tier::Raw))?;
    let trusted =
        read_parquet(&config.storage.tier_file(Tier::Trusted))?;
    let refined_path = result.context.pull(AGGREGATE_STEP, REFINED_PATH_KEY)?;
    let refined = read_parquet(Path::new(refined_path))?;

    assert_eq!(raw.num_rows(), 5);
    assert_eq!(trusted.num_rows(), 4);
    assert_eq!(trusted.schema(), raw.schema());
    assert_eq!(
        triples(&refined),
        vec![(355030, 34, 2), (310620, 8, 1), (330455, 61, 1)]
    );
    Ok(())
}

#[tokio::test]
async fn test_clean_output_is_ordered_subset_of_ingest() -> Result<()> {
    let temp_dir = tempdir()?;
    let config = config_in(temp_dir.path());
    write_source(
        &config,
        &[
            "1;10;2011-01-01;SP",
            "2;20;;SP",
            "3;30;2001-01-01;SP",
            "4;40;NA;SP",
            "5;50;1981-01-01;SP",
        ],
    );

    let result = run(&config).await?;
    let clean = result.outcome(CLEAN_STEP).unwrap().result.as_ref().unwrap();
    assert_eq!(clean.processed_count, 3);
    assert_eq!(clean.dropped_count, 2);

    let trusted =
        read_parquet(&config.storage.tier_file(Tier::Trusted))?;
    let ids = trusted.column(0).as_primitive::<Int64Type>();
    assert_eq!(ids.values().to_vec(), vec![1, 3, 5]);
    assert_eq!(trusted.column(2).null_count(), 0);
    Ok(())
}

#[tokio::test]
async fn test_aggregate_keeps_top_five_with_exact_counts() -> Result<()> {
    let temp_dir = tempdir()?;
    let config = config_in(temp_dir.path());
    let mut rows = Vec::new();
    // group (m, 20) appears m times for m in 1..=7
    for m in 1..=7 {
        for _ in 0..m {
            rows.push(format!("{};20;2001-01-01;SP", m));
        }
    }
    let rows: Vec<&str> = rows.iter().map(String::as_str).collect();
    write_source(&config, &rows);

    let result = run(&config).await?;
    let refined = read_parquet(Path::new(
        result.context.pull(AGGREGATE_STEP, REFINED_PATH_KEY)?,
    ))?;

    let got = triples(&refined);
    assert_eq!(
        got,
        vec![(7, 20, 7), (6, 20, 6), (5, 20, 5), (4, 20, 4), (3, 20, 3)]
    );
    assert!(got.windows(2).all(|w| w[0].2 >= w[1].2));
    Ok(())
}

#[tokio::test]
async fn test_ties_break_by_municipality_then_age() -> Result<()> {
    let temp_dir = tempdir()?;
    let config = config_in(temp_dir.path());
    write_source(
        &config,
        &[
            "9;1;2020-01-01;SP",
            "2;5;2016-01-01;SP",
            "2;3;2018-01-01;SP",
            "4;1;2020-01-01;SP",
            "1;9;2012-01-01;SP",
            "8;8;2013-01-01;SP",
            "8;8;2013-01-01;SP",
        ],
    );

    let result = run(&config).await?;
    let refined = read_parquet(Path::new(
        result.context.pull(AGGREGATE_STEP, REFINED_PATH_KEY)?,
    ))?;
    assert_eq!(
        triples(&refined),
        vec![(8, 8, 2), (1, 9, 1), (2, 3, 1), (2, 5, 1), (4, 1, 1)]
    );
    Ok(())
}

#[tokio::test]
async fn test_three_groups_yield_three_rows() -> Result<()> {
    let temp_dir = tempdir()?;
    let config = config_in(temp_dir.path());
    write_source(
        &config,
        &[
            "1;30;1991-01-01;SP",
            "1;30;1991-01-01;SP",
            "2;40;1981-01-01;SP",
            "3;50;1971-01-01;SP",
            "3;50;1971-01-01;SP",
            "3;50;1971-01-01;SP",
        ],
    );

    let result = run(&config).await?;
    let aggregate = result.outcome(AGGREGATE_STEP).unwrap().result.as_ref().unwrap();
    assert_eq!(aggregate.processed_count, 3);

    let refined = read_parquet(Path::new(
        result.context.pull(AGGREGATE_STEP, REFINED_PATH_KEY)?,
    ))?;
    assert_eq!(triples(&refined), vec![(3, 50, 3), (1, 30, 2), (2, 40, 1)]);
    Ok(())
}

#[tokio::test]
async fn test_rerun_is_byte_identical() -> Result<()> {
    let temp_dir = tempdir()?;
    let config = config_in(temp_dir.path());
    write_source(
        &config,
        &["1;30;1991-01-01;SP", "2;40;;RJ", "2;40;1981-01-01;RJ"],
    );
    let refined_path = config.storage.tier_file(Tier::Refined);

    run(&config).await?;
    let first = fs::read(&refined_path)?;
    run(&config).await?;
    let second = fs::read(&refined_path)?;

    assert_eq!(first, second);
    Ok(())
}

#[tokio::test]
async fn test_malformed_rows_are_dropped_not_fatal() -> Result<()> {
    let temp_dir = tempdir()?;
    let config = config_in(temp_dir.path());
    write_source(
        &config,
        &[
            "1;30;1991-01-01;SP",
            "1;30;1991-01-01;SP;extra;fields",
            "2;40;1981-01-01;RJ",
        ],
    );

    let result = run(&config).await?;
    let ingest = result.outcome(INGEST_STEP).unwrap().result.as_ref().unwrap();
    assert_eq!(ingest.processed_count, 2);
    assert_eq!(ingest.dropped_count, 1);
    Ok(())
}

#[tokio::test]
async fn test_all_null_birth_dates_give_empty_outputs() -> Result<()> {
    let temp_dir = tempdir()?;
    let config = config_in(temp_dir.path());
    write_source(&config, &["1;30;;SP", "2;40;;RJ"]);

    let result = run(&config).await?;
    let trusted =
        read_parquet(&config.storage.tier_file(Tier::Trusted))?;
    let refined = read_parquet(Path::new(
        result.context.pull(AGGREGATE_STEP, REFINED_PATH_KEY)?,
    ))?;

    assert_eq!(trusted.num_rows(), 0);
    assert_eq!(refined.num_rows(), 0);
    assert_eq!(refined.schema().field(2).name(), "count");
    Ok(())
}

#[tokio::test]
async fn test_scheduler_catchup_records_each_day_once() -> Result<()> {
    let temp_dir = tempdir()?;
    let config = config_in(temp_dir.path());
    write_source(&config, &["1;30;1991-01-01;SP"]);

    let mut scheduler = Scheduler::new(&config)?;
    let now = Utc.with_ymd_and_hms(2021, 4, 25, 12, 0, 0).unwrap();
    let results = scheduler.tick(now).await?;
    assert_eq!(results.len(), 2);
    assert!(scheduler.tick(now).await?.is_empty());

    // A fresh scheduler sees the same ledger on disk
    let mut reopened = Scheduler::new(&config)?;
    assert!(reopened.tick(now).await?.is_empty());
    let runs = reopened.ledger().recent_runs(&config.dag.dag_id, 10)?;
    assert_eq!(runs.len(), 2);
    assert!(runs.iter().all(|r| r.state == RunState::Success));
    Ok(())
}
