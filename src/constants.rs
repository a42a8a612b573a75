/// Step names used as producer identifiers in the run context and the ledger
pub const PREPARE_DIRS_STEP: &str = "prepare_dirs";
pub const INGEST_STEP: &str = "ingest";
pub const CLEAN_STEP: &str = "clean";
pub const AGGREGATE_STEP: &str = "aggregate";

// Keys published between steps
pub const RAW_PATH_KEY: &str = "raw_path";
pub const TRUSTED_PATH_KEY: &str = "trusted_path";
pub const REFINED_PATH_KEY: &str = "refined_path";

// Source dataset columns
pub const BIRTH_DATE_COLUMN: &str = "DT_NASC";
pub const MUNICIPALITY_COLUMN: &str = "ID_MUNICIP";
pub const AGE_COLUMN: &str = "NU_IDADE_N";

/// Name of the occurrence column in the aggregate output
pub const COUNT_COLUMN: &str = "count";

/// Number of groups kept by the aggregate stage
pub const TOP_N_GROUPS: usize = 5;

pub const DEFAULT_DAG_ID: &str = "grupo0_covid_pipeline";
pub const DEFAULT_NAMESPACE: &str = "grupo0/covid19";
pub const DEFAULT_FILE_STEM: &str = "covid";
pub const DEFAULT_SOURCE_FILE: &str = "INFLUD21-11-01-2021.csv";
pub const DEFAULT_CONFIG_FILE: &str = "pipeline.toml";

/// Tokens the ingest reader treats as missing values
pub const NA_TOKENS: &[&str] = &[
    "", "#N/A", "#N/A N/A", "#NA", "-1.#IND", "-1.#QNAN", "-NaN", "-nan", "1.#IND", "1.#QNAN",
    "<NA>", "N/A", "NA", "NULL", "NaN", "None", "n/a", "nan", "null",
];

/// Storage tier a stage writes into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Raw,
    Trusted,
    Refined,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Tier::Raw, Tier::Trusted, Tier::Refined];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Raw => "raw",
            Tier::Trusted => "trusted",
            Tier::Refined => "refined",
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
