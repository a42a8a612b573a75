use crate::constants::{
    Tier, AGE_COLUMN, BIRTH_DATE_COLUMN, DEFAULT_CONFIG_FILE, DEFAULT_DAG_ID, DEFAULT_FILE_STEM,
    DEFAULT_NAMESPACE, DEFAULT_SOURCE_FILE, MUNICIPALITY_COLUMN, TOP_N_GROUPS,
};
use crate::error::{PipelineError, Result};
use crate::scheduler::Schedule;
use crate::table::Codec;
use chrono::NaiveDate;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const DATA_ROOT_ENV: &str = "COVID_PIPELINE_DATA_ROOT";
pub const SOURCE_FILE_ENV: &str = "COVID_PIPELINE_SOURCE_FILE";
pub const LOG_DIR_ENV: &str = "COVID_PIPELINE_LOG_DIR";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub dag: DagConfig,
    pub storage: StorageConfig,
    pub columns: ColumnConfig,
    pub logging: LoggingConfig,
}

/// Scheduling and retry settings for the pipeline
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DagConfig {
    pub dag_id: String,
    pub start_date: NaiveDate,
    pub schedule: Schedule,
    pub catchup: bool,
    pub retries: u32,
    pub retry_delay_secs: u64,
}

impl Default for DagConfig {
    fn default() -> Self {
        Self {
            dag_id: DEFAULT_DAG_ID.to_string(),
            start_date: NaiveDate::from_ymd_opt(2021, 4, 23).unwrap_or_default(),
            schedule: Schedule::Daily,
            catchup: true,
            retries: 1,
            retry_delay_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_root: PathBuf,
    pub namespace: String,
    pub file_stem: String,
    /// Source CSV; relative paths are resolved against `data_root`
    pub source_file: PathBuf,
    pub delimiter: String,
    pub compression: Codec,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_root: PathBuf::from("data"),
            namespace: DEFAULT_NAMESPACE.to_string(),
            file_stem: DEFAULT_FILE_STEM.to_string(),
            source_file: PathBuf::from(DEFAULT_SOURCE_FILE),
            delimiter: ";".to_string(),
            compression: Codec::Snappy,
        }
    }
}

impl StorageConfig {
    pub fn tier_dir(&self, tier: Tier) -> PathBuf {
        self.data_root.join(tier.as_str()).join(&self.namespace)
    }

    pub fn tier_file(&self, tier: Tier) -> PathBuf {
        self.tier_dir(tier)
            .join(format!("{}_{}.parquet", self.file_stem, tier.as_str()))
    }

    pub fn source_path(&self) -> PathBuf {
        if self.source_file.is_absolute() {
            self.source_file.clone()
        } else {
            self.data_root.join(&self.source_file)
        }
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.data_root.join(".scheduler").join("runs.db")
    }

    pub fn delimiter_byte(&self) -> Result<u8> {
        match self.delimiter.as_bytes() {
            [b] => Ok(*b),
            _ => Err(PipelineError::Config(format!(
                "delimiter must be a single byte, got '{}'",
                self.delimiter
            ))),
        }
    }
}

/// Column names the clean and aggregate stages operate on
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ColumnConfig {
    pub birth_date: String,
    pub municipality: String,
    pub age: String,
    pub top_n: usize,
}

impl Default for ColumnConfig {
    fn default() -> Self {
        Self {
            birth_date: BIRTH_DATE_COLUMN.to_string(),
            municipality: MUNICIPALITY_COLUMN.to_string(),
            age: AGE_COLUMN.to_string(),
            top_n: TOP_N_GROUPS,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub dir: PathBuf,
    pub file_name: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("logs"),
            file_name: "covid_pipeline.log".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from `path`, or from `pipeline.toml` when present,
    /// falling back to defaults. Environment overrides are applied last.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_in(Path::new("."), path)
    }

    /// Like [`Config::load`], looking for `pipeline.toml` in `dir` instead
    /// of the working directory
    pub fn load_in(dir: &Path, path: Option<&Path>) -> Result<Self> {
        let fallback = dir.join(DEFAULT_CONFIG_FILE);
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None if fallback.exists() => Self::from_file(&fallback)?,
            None => {
                debug!("No {} found, using defaults", fallback.display());
                Self::default()
            }
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) {
        if let Some(v) = non_empty_env(DATA_ROOT_ENV) {
            self.storage.data_root = PathBuf::from(v);
        }
        if let Some(v) = non_empty_env(SOURCE_FILE_ENV) {
            self.storage.source_file = PathBuf::from(v);
        }
        if let Some(v) = non_empty_env(LOG_DIR_ENV) {
            self.logging.dir = PathBuf::from(v);
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.storage.delimiter_byte()?;
        if self.storage.namespace.trim().is_empty() {
            return Err(PipelineError::Config("storage.namespace is empty".into()));
        }
        if self.columns.top_n == 0 {
            return Err(PipelineError::Config("columns.top_n must be at least 1".into()));
        }
        Ok(())
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_tier_layout() {
        let config = Config::default();
        assert_eq!(config.dag.retries, 1);
        assert!(config.dag.catchup);
        assert_eq!(config.dag.schedule, Schedule::Daily);
        assert_eq!(
            config.storage.tier_file(Tier::Trusted),
            PathBuf::from("data/trusted/grupo0/covid19/covid_trusted.parquet")
        );
        assert_eq!(
            config.storage.source_path(),
            PathBuf::from("data/INFLUD21-11-01-2021.csv")
        );
        assert_eq!(config.storage.delimiter_byte().unwrap(), b';');
    }

    #[test]
    fn partial_toml_keeps_other_defaults() {
        let config = Config::from_toml_str(
            r#"
            [dag]
            schedule = "@hourly"
            retries = 3

            [storage]
            data_root = "/srv/dados"
            compression = "zstd"
            "#,
        )
        .unwrap();
        assert_eq!(config.dag.schedule, Schedule::Hourly);
        assert_eq!(config.dag.retries, 3);
        assert_eq!(config.dag.dag_id, DEFAULT_DAG_ID);
        assert_eq!(config.storage.compression, Codec::Zstd);
        assert_eq!(config.storage.namespace, DEFAULT_NAMESPACE);
        assert_eq!(
            config.storage.tier_dir(Tier::Raw),
            PathBuf::from("/srv/dados/raw/grupo0/covid19")
        );
    }

    #[test]
    fn pipeline_toml_in_dir_is_picked_up() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_in(dir.path(), None).unwrap();
        assert_eq!(config.dag.retries, 1);

        fs::write(
            dir.path().join(DEFAULT_CONFIG_FILE),
            "[dag]\nretries = 4\nschedule = \"@weekly\"\n",
        )
        .unwrap();
        let config = Config::load_in(dir.path(), None).unwrap();
        assert_eq!(config.dag.retries, 4);
        assert_eq!(config.dag.schedule, Schedule::Weekly);

        let explicit = dir.path().join("other.toml");
        fs::write(&explicit, "[dag]\nretries = 2\n").unwrap();
        let config = Config::load_in(dir.path(), Some(&explicit)).unwrap();
        assert_eq!(config.dag.retries, 2);
        assert_eq!(config.dag.schedule, Schedule::Daily);

        let missing = dir.path().join("missing.toml");
        assert!(Config::load_in(dir.path(), Some(&missing)).is_err());
    }

    #[test]
    fn env_overrides_replace_paths() {
        std::env::set_var(DATA_ROOT_ENV, "/srv/covid");
        std::env::set_var(SOURCE_FILE_ENV, "notificacoes.csv");
        std::env::set_var(LOG_DIR_ENV, "");

        let mut config = Config::default();
        config.apply_env_overrides();

        std::env::remove_var(DATA_ROOT_ENV);
        std::env::remove_var(SOURCE_FILE_ENV);
        std::env::remove_var(LOG_DIR_ENV);

        assert_eq!(config.storage.data_root, PathBuf::from("/srv/covid"));
        assert_eq!(
            config.storage.source_path(),
            PathBuf::from("/srv/covid/notificacoes.csv")
        );
        assert_eq!(config.logging.dir, PathBuf::from("logs"));
    }

    #[test]
    fn rejects_unknown_codec() {
        let err = Config::from_toml_str("[storage]\ncompression = \"rar\"\n").unwrap_err();
        assert!(err.to_string().contains("rar"));
    }

    #[test]
    fn rejects_multi_byte_delimiter() {
        let mut config = Config::default();
        config.storage.delimiter = ";;".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn absolute_source_file_is_not_rebased() {
        let mut config = Config::default();
        config.storage.source_file = PathBuf::from("/tmp/input.csv");
        assert_eq!(config.storage.source_path(), PathBuf::from("/tmp/input.csv"));
    }
}
