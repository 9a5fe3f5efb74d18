use std::path::{Path, PathBuf};

use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::parser::words::DEFAULT_MAX_WORDS;

fn default_grace_period() -> u32 {
    180
}

fn default_total_items() -> usize {
    100
}

fn default_max_words() -> usize {
    DEFAULT_MAX_WORDS
}

/// Run settings, read from the `[SCHWEBSEARCH]` section of an INI file.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub sch_database_file: PathBuf,
    /// Pending raw results written by the searchers.
    pub search_results_folder: PathBuf,
    /// Successfully parsed results; doubles as the search history.
    pub search_history_folder: PathBuf,
    pub error_results_folder: PathBuf,
    pub annotation_folder: PathBuf,
    #[serde(default)]
    pub actual_annotation_file: Option<PathBuf>,
    #[serde(default)]
    pub creds_file: Option<PathBuf>,
    #[serde(default)]
    pub blacklist_file: Option<PathBuf>,
    #[serde(default)]
    pub manifest_file: Option<PathBuf>,
    #[serde(default = "default_grace_period")]
    pub grace_period: u32,
    #[serde(default = "default_total_items")]
    pub total_items_to_query: usize,
    #[serde(default = "default_max_words")]
    pub max_words: usize,
    #[serde(default)]
    pub bing_max_items: Option<usize>,
}

#[derive(Deserialize)]
struct SettingsFile {
    #[serde(alias = "SCHWEBSEARCH")]
    schwebsearch: Settings,
}

impl Settings {
    /// Load `path`, letting `SCHWEBSEARCH_SCHWEBSEARCH__<KEY>` variables
    /// override individual keys.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::Config(format!("settings file {:?} not found", path)));
        }
        let raw = Config::builder()
            .add_source(File::from(path).format(FileFormat::Ini))
            .add_source(
                Environment::with_prefix("SCHWEBSEARCH")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;
        let file: SettingsFile = raw.try_deserialize()?;
        Ok(file.schwebsearch.normalized())
    }

    // empty INI values mean "not set"
    fn normalized(mut self) -> Self {
        for opt in [
            &mut self.actual_annotation_file,
            &mut self.creds_file,
            &mut self.blacklist_file,
            &mut self.manifest_file,
        ] {
            if opt.as_ref().is_some_and(|p| p.as_os_str().is_empty()) {
                *opt = None;
            }
        }
        self
    }

    /// The credentials path has no default; searching without it is refused.
    pub fn credentials_path(&self) -> Result<&Path> {
        self.creds_file
            .as_deref()
            .ok_or_else(|| Error::Config("creds_file is not set".into()))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GoogleCredentials {
    pub google_search_api_key: String,
    pub google_search_engine_id: String,
    pub google_search_endpoint: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BingCredentials {
    pub bing_search_api_key: String,
    pub bing_search_endpoint: String,
}

/// Provider keys, one INI section per provider.
#[derive(Debug, Clone, Deserialize)]
pub struct Credentials {
    #[serde(alias = "GOOGLE_SEARCH")]
    pub google_search: GoogleCredentials,
    #[serde(alias = "BING_SEARCH")]
    pub bing_search: BingCredentials,
}

impl Credentials {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::Config(format!(
                "credentials file {:?} does not exist or is corrupted",
                path
            )));
        }
        let raw = Config::builder()
            .add_source(File::from(path).format(FileFormat::Ini))
            .build()?;
        Ok(raw.try_deserialize()?)
    }
}
