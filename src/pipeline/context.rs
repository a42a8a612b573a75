use crate::error::{PipelineError, Result};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Immutable per-run state handed from step to step.
///
/// Values are keyed by (producer step, key) and may be written once. Steps
/// never mutate a context; the orchestrator derives a new one from each
/// step's publications.
#[derive(Debug, Clone, PartialEq)]
pub struct RunContext {
    run_id: Uuid,
    dag_id: String,
    logical_date: DateTime<Utc>,
    values: BTreeMap<(String, String), String>,
}

impl RunContext {
    pub fn new(dag_id: impl Into<String>, logical_date: DateTime<Utc>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            dag_id: dag_id.into(),
            logical_date,
            values: BTreeMap::new(),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn dag_id(&self) -> &str {
        &self.dag_id
    }

    pub fn logical_date(&self) -> DateTime<Utc> {
        self.logical_date
    }

    /// Value published by `step` under `key`
    pub fn pull(&self, step: &str, key: &str) -> Result<&str> {
        self.values
            .get(&(step.to_string(), key.to_string()))
            .map(String::as_str)
            .ok_or_else(|| PipelineError::MissingUpstreamValue {
                step: step.to_string(),
                key: key.to_string(),
            })
    }

    /// New context with one more published value
    pub fn with_published(&self, step: &str, key: &str, value: &str) -> Result<Self> {
        let slot = (step.to_string(), key.to_string());
        if self.values.contains_key(&slot) {
            return Err(PipelineError::DuplicatePublish {
                step: step.to_string(),
                key: key.to_string(),
            });
        }
        let mut next = self.clone();
        next.values.insert(slot, value.to_string());
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ctx() -> RunContext {
        RunContext::new("dag", Utc.with_ymd_and_hms(2021, 4, 23, 0, 0, 0).unwrap())
    }

    #[test]
    fn pull_returns_published_value() {
        let base = ctx();
        let next = base.with_published("ingest", "raw_path", "/d/raw.parquet").unwrap();
        assert_eq!(next.pull("ingest", "raw_path").unwrap(), "/d/raw.parquet");
        assert_eq!(next.run_id(), base.run_id());
    }

    #[test]
    fn publishing_leaves_original_untouched() {
        let base = ctx();
        let _next = base.with_published("ingest", "raw_path", "x").unwrap();
        assert!(base.pull("ingest", "raw_path").is_err());
    }

    #[test]
    fn keys_are_scoped_by_producer() {
        let next = ctx().with_published("ingest", "raw_path", "x").unwrap();
        assert!(matches!(
            next.pull("clean", "raw_path"),
            Err(PipelineError::MissingUpstreamValue { .. })
        ));
    }

    #[test]
    fn double_publish_is_rejected() {
        let next = ctx().with_published("ingest", "raw_path", "x").unwrap();
        assert!(matches!(
            next.with_published("ingest", "raw_path", "y"),
            Err(PipelineError::DuplicatePublish { .. })
        ));
    }

    #[test]
    fn each_run_gets_its_own_id() {
        assert_ne!(ctx().run_id(), ctx().run_id());
    }
}
