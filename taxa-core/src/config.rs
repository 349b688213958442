//! Layered settings: defaults ← YAML file ← environment ← CLI flags.
//!
//! # Storage layout
//!
//! ```text
//! ~/.taxa/                      (data root, TAXA_DATA_ROOT)
//!   taxa.yaml                   (optional config file)
//!   cache/<shard>/<id>.json     (cache store, TAXA_CACHE_DIR)
//!   db/taxa.sqlite              (authority + ledger, TAXA_DB)
//!   logs/taxa-refresh.log       (TAXA_LOG_DIR)
//!   source_revision.json
//!   species_ids.json
//!   species_table.json
//! ```
//!
//! # API pattern
//!
//! [`load_at`] takes an explicit home directory and environment lookup and is
//! what tests call. [`load`] derives both from the running process.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{io_err, CoreError};
use crate::record::InclusionFilter;

pub const DEFAULT_API_BASE: &str = "https://api.artdatabanken.se/taxonservice/v1";
pub const CONFIG_FILE_NAME: &str = "taxa.yaml";
pub const LOG_FILE_NAME: &str = "taxa-refresh.log";
pub const SUBSCRIPTION_KEY_ENV: &str = "ARTDATABANKEN_SUBSCRIPTION_KEY";

/// Fully resolved settings for one invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Settings {
    pub data_root: PathBuf,
    pub cache_dir: PathBuf,
    pub db_path: PathBuf,
    pub log_dir: PathBuf,
    pub api_base_url: String,
    pub culture: String,
    pub root_taxon: String,
    /// Cache time-to-live in seconds; `0` means entries never expire.
    pub cache_ttl_seconds: u64,
    pub post_batch_size: usize,
    pub http_timeout_seconds: u64,
    pub fast_exit: bool,
    pub filter: InclusionFilter,
}

/// On-disk shape of `taxa.yaml`. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SettingsFile {
    pub data_root: Option<PathBuf>,
    pub cache_dir: Option<PathBuf>,
    pub db_path: Option<PathBuf>,
    pub log_dir: Option<PathBuf>,
    pub api_base_url: Option<String>,
    pub culture: Option<String>,
    pub root_taxon: Option<String>,
    pub cache_ttl_seconds: Option<u64>,
    pub post_batch_size: Option<usize>,
    pub http_timeout_seconds: Option<u64>,
    pub fast_exit: Option<bool>,
    pub filter: Option<InclusionFilter>,
}

impl Settings {
    /// Built-in defaults rooted at `<home>/.taxa`.
    pub fn defaults_at(home: &Path) -> Self {
        Self::rooted(home.join(".taxa"))
    }

    fn rooted(data_root: PathBuf) -> Self {
        Self {
            cache_dir: data_root.join("cache"),
            db_path: data_root.join("db").join("taxa.sqlite"),
            log_dir: data_root.join("logs"),
            data_root,
            api_base_url: DEFAULT_API_BASE.to_string(),
            culture: "sv_SE".to_string(),
            root_taxon: "Lepidoptera".to_string(),
            cache_ttl_seconds: 0,
            post_batch_size: 200,
            http_timeout_seconds: 30,
            fast_exit: true,
            filter: InclusionFilter::default(),
        }
    }

    /// `None` when entries never expire.
    pub fn cache_ttl(&self) -> Option<Duration> {
        (self.cache_ttl_seconds > 0).then(|| Duration::from_secs(self.cache_ttl_seconds))
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_seconds.max(1))
    }

    pub fn source_revision_path(&self) -> PathBuf {
        self.data_root.join("source_revision.json")
    }

    pub fn species_ids_path(&self) -> PathBuf {
        self.data_root.join("species_ids.json")
    }

    pub fn species_table_path(&self) -> PathBuf {
        self.data_root.join("species_table.json")
    }

    pub fn log_file_path(&self) -> PathBuf {
        self.log_dir.join(LOG_FILE_NAME)
    }

    /// The `generation`-th rotated copy of the refresh log; 1 is the newest.
    pub fn log_backup_path(&self, generation: usize) -> PathBuf {
        self.log_dir.join(format!("{LOG_FILE_NAME}.{generation}"))
    }

    /// Apply values from a config file. A `data_root` in the file re-roots
    /// every path the file does not set explicitly.
    fn apply_file(&mut self, file: SettingsFile) {
        if let Some(root) = file.data_root {
            let rerooted = Self::rooted(root);
            self.data_root = rerooted.data_root;
            self.cache_dir = rerooted.cache_dir;
            self.db_path = rerooted.db_path;
            self.log_dir = rerooted.log_dir;
        }
        if let Some(v) = file.cache_dir {
            self.cache_dir = v;
        }
        if let Some(v) = file.db_path {
            self.db_path = v;
        }
        if let Some(v) = file.log_dir {
            self.log_dir = v;
        }
        if let Some(v) = file.api_base_url {
            self.api_base_url = v;
        }
        if let Some(v) = file.culture {
            self.culture = v;
        }
        if let Some(v) = file.root_taxon {
            self.root_taxon = v;
        }
        if let Some(v) = file.cache_ttl_seconds {
            self.cache_ttl_seconds = v;
        }
        if let Some(v) = file.post_batch_size {
            self.post_batch_size = v;
        }
        if let Some(v) = file.http_timeout_seconds {
            self.http_timeout_seconds = v;
        }
        if let Some(v) = file.fast_exit {
            self.fast_exit = v;
        }
        if let Some(v) = file.filter {
            self.filter = v;
        }
    }

    fn apply_env(&mut self, env: &dyn Fn(&str) -> Option<String>) -> Result<(), CoreError> {
        if let Some(v) = env("TAXA_CACHE_DIR") {
            self.cache_dir = PathBuf::from(v);
        }
        if let Some(v) = env("TAXA_DB") {
            self.db_path = PathBuf::from(v);
        }
        if let Some(v) = env("TAXA_LOG_DIR") {
            self.log_dir = PathBuf::from(v);
        }
        if let Some(v) = env("TAXA_API_BASE") {
            self.api_base_url = v;
        }
        if let Some(v) = env("TAXA_CULTURE") {
            self.culture = v;
        }
        if let Some(v) = env("TAXA_CACHE_TTL_SECONDS") {
            self.cache_ttl_seconds = parse_number("TAXA_CACHE_TTL_SECONDS", &v)?;
        }
        if let Some(v) = env("TAXA_POST_BATCH_SIZE") {
            self.post_batch_size = parse_number("TAXA_POST_BATCH_SIZE", &v)?;
        }
        if let Some(v) = env("TAXA_HTTP_TIMEOUT") {
            self.http_timeout_seconds = parse_number("TAXA_HTTP_TIMEOUT", &v)?;
        }
        if let Some(v) = env("TAXA_FAST_EXIT") {
            self.fast_exit = parse_bool("TAXA_FAST_EXIT", &v)?;
        }
        Ok(())
    }
}

/// Resolve settings for `home` using `env` for lookups.
///
/// `explicit_config` (e.g. `--config`) and `TAXA_CONFIG` must exist when
/// given; the default `<data_root>/taxa.yaml` is optional.
pub fn load_at(
    home: &Path,
    explicit_config: Option<&Path>,
    env: &dyn Fn(&str) -> Option<String>,
) -> Result<Settings, CoreError> {
    let env_root = env("TAXA_DATA_ROOT").map(PathBuf::from);
    let mut settings = match &env_root {
        Some(root) => Settings::rooted(root.clone()),
        None => Settings::defaults_at(home),
    };

    let required = explicit_config
        .map(Path::to_path_buf)
        .or_else(|| env("TAXA_CONFIG").map(PathBuf::from));
    let file = match required {
        Some(path) => Some(read_settings_file(&path)?),
        None => {
            let path = settings.data_root.join(CONFIG_FILE_NAME);
            if path.exists() {
                Some(read_settings_file(&path)?)
            } else {
                None
            }
        }
    };

    if let Some(mut file) = file {
        if env_root.is_some() {
            file.data_root = None;
        }
        settings.apply_file(file);
    }
    settings.apply_env(env)?;

    if settings.post_batch_size == 0 {
        return Err(CoreError::InvalidSetting {
            key: "post_batch_size".to_string(),
            value: "0".to_string(),
        });
    }
    Ok(settings)
}

/// `load_at` convenience wrapper using `dirs::home_dir()` and the process
/// environment.
pub fn load(explicit_config: Option<&Path>) -> Result<Settings, CoreError> {
    let env = |key: &str| std::env::var(key).ok().filter(|v| !v.is_empty());
    let home = match env("TAXA_DATA_ROOT") {
        // Home is irrelevant once the data root is pinned.
        Some(_) => dirs::home_dir().unwrap_or_default(),
        None => dirs::home_dir().ok_or(CoreError::HomeNotFound)?,
    };
    load_at(&home, explicit_config, &env)
}

/// Parse a YAML settings file.
pub fn read_settings_file(path: &Path) -> Result<SettingsFile, CoreError> {
    let contents = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    if contents.trim().is_empty() {
        return Ok(SettingsFile::default());
    }
    serde_yaml::from_str(&contents).map_err(|source| CoreError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, CoreError> {
    value.trim().parse().map_err(|_| CoreError::InvalidSetting {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, CoreError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(CoreError::InvalidSetting {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}
