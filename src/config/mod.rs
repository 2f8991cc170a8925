// src/config/mod.rs
//! Runtime settings, built once at startup and passed by reference to every component.
//!
//! Lookup order:
//! 1) `$THEMETEST_CONFIG`
//! 2) `config/themetest.toml`
//! 3) built-in defaults
//!
//! Secret fields may hold the literal `ENV`, in which case the value is read from
//! `THEMETEST_DB_PASSWORD` / `THEMETEST_ADMIN_PASSWORD`.

pub mod credentials;

use std::path::{Path, PathBuf};
use std::{env, fs};

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

pub const ENV_CONFIG_PATH: &str = "THEMETEST_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config/themetest.toml";
pub const ENV_DB_PASSWORD: &str = "THEMETEST_DB_PASSWORD";
pub const ENV_ADMIN_PASSWORD: &str = "THEMETEST_ADMIN_PASSWORD";

const DEFAULT_POLL_INTERVAL_SECS: u64 = 6;
const DEFAULT_POLL_TIMEOUT_SECS: u64 = 900;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub paths: PathSettings,
    pub database: DatabaseSettings,
    pub site: SiteSettings,
    pub wordpress: WordPressSettings,
    pub benchmark: BenchmarkSettings,
    pub catalog: CatalogSettings,
    pub rundown: RundownSettings,
}

/// Where test sites live and where local state is kept.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathSettings {
    pub testsite_basedir: PathBuf,
    pub testsite_baseurl: String,
    pub images_dir: PathBuf,
    pub data_dir: PathBuf,
    pub tmp_dir: PathBuf,
    pub state_dir: PathBuf,
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            testsite_basedir: PathBuf::from("/var/www/themetest"),
            testsite_baseurl: "http://localhost/".to_string(),
            images_dir: PathBuf::from("theme-images"),
            data_dir: PathBuf::from("data"),
            tmp_dir: PathBuf::from("tmp"),
            state_dir: PathBuf::from("state"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub host: String,
    pub name: String,
    pub user: String,
    /// "ENV" means: read from THEMETEST_DB_PASSWORD
    pub password: String,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            name: "themetest".to_string(),
            user: "themetest".to_string(),
            password: "ENV".to_string(),
        }
    }
}

/// Values used when installing each throwaway site.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteSettings {
    pub title: String,
    pub admin_user: String,
    /// "ENV" means: read from THEMETEST_ADMIN_PASSWORD
    pub admin_password: String,
    pub admin_email: String,
    /// Sample content imported into every site. Relative paths resolve against `wordpress.path`.
    pub import_file: PathBuf,
}

impl Default for SiteSettings {
    fn default() -> Self {
        Self {
            title: "Your Blog Title".to_string(),
            admin_user: "wpadmin".to_string(),
            admin_password: "ENV".to_string(),
            admin_email: "you@example.com".to_string(),
            import_file: PathBuf::from("wp-content/plugins/themetest/data/testdata.xml"),
        }
    }
}

/// The content site the reports are published to.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WordPressSettings {
    pub cli: String,
    pub path: PathBuf,
    pub url: String,
    /// Category slug given to `wp post create` for per-theme reports.
    pub report_category: String,
    /// Numeric category id of the reports, used to query the REST API.
    pub report_category_id: u64,
    pub rundown_category_id: u64,
}

impl Default for WordPressSettings {
    fn default() -> Self {
        Self {
            cli: "wp".to_string(),
            path: PathBuf::from("/var/www/html"),
            url: "http://localhost/".to_string(),
            report_category: "theme-performance-reports".to_string(),
            report_category_id: 2,
            rundown_category_id: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchmarkSettings {
    pub api_base: String,
    pub credentials_file: PathBuf,
    pub poll_interval_secs: u64,
    pub poll_timeout_secs: u64,
    /// Pause after each screenshot download, to go easy on the vendor API.
    pub courtesy_delay_secs: u64,
    /// Sent as `x-metrix-cookies` when non-empty.
    pub cookies: String,
}

impl Default for BenchmarkSettings {
    fn default() -> Self {
        Self {
            api_base: "https://gtmetrix.com/api/0.1".to_string(),
            credentials_file: PathBuf::from(".gtcredentials"),
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            poll_timeout_secs: DEFAULT_POLL_TIMEOUT_SECS,
            courtesy_delay_secs: 6,
            cookies: "c9.live.user.click-through = ok".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogSettings {
    pub endpoint: String,
    pub browse: String,
    /// Bundled default themes that are never processed.
    pub excluded_slugs: Vec<String>,
    /// File names below `paths.data_dir`.
    pub featured_file: String,
    pub previous_file: String,
    pub current_file: String,
}

impl Default for CatalogSettings {
    fn default() -> Self {
        Self {
            endpoint: "https://api.wordpress.org/themes/info/1.1/".to_string(),
            browse: "featured".to_string(),
            excluded_slugs: vec!["twentyseventeen".to_string()],
            featured_file: "featured.json".to_string(),
            previous_file: "lastfeatured.json".to_string(),
            current_file: "thisfeatured.json".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RundownSettings {
    pub lookback_hours: u32,
    pub per_page: u32,
    /// Stripped from report post slugs to recover the theme slug.
    pub slug_suffix: String,
}

impl Default for RundownSettings {
    fn default() -> Self {
        Self {
            lookback_hours: 12,
            per_page: 20,
            slug_suffix: "-wordpress-theme-performance".to_string(),
        }
    }
}

impl Settings {
    /// Load settings from an explicit TOML file.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!("reading {}: {e}", path.display()))
        })?;
        let mut settings: Settings = toml::from_str(&content)
            .map_err(|e| PipelineError::Config(format!("parsing {}: {e}", path.display())))?;
        settings.resolve_secrets();
        settings.sanitize();
        tracing::debug!(path = %path.display(), "settings loaded");
        Ok(settings)
    }

    /// Load settings using env var + fallbacks (see module docs).
    pub fn load_default() -> Result<Self> {
        if let Ok(p) = env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if pb.exists() {
                return Self::load_from(&pb);
            }
            return Err(PipelineError::Config(format!(
                "{ENV_CONFIG_PATH} points to non-existent path {}",
                pb.display()
            )));
        }
        let default_path = PathBuf::from(DEFAULT_CONFIG_PATH);
        if default_path.exists() {
            return Self::load_from(&default_path);
        }
        tracing::info!("no config file found, using built-in defaults");
        let mut settings = Settings::default();
        settings.resolve_secrets();
        Ok(settings)
    }

    fn resolve_secrets(&mut self) {
        resolve_env_secret(&mut self.database.password, ENV_DB_PASSWORD);
        resolve_env_secret(&mut self.site.admin_password, ENV_ADMIN_PASSWORD);
    }

    fn sanitize(&mut self) {
        if self.benchmark.poll_interval_secs == 0 {
            self.benchmark.poll_interval_secs = DEFAULT_POLL_INTERVAL_SECS;
        }
        if self.benchmark.poll_timeout_secs < self.benchmark.poll_interval_secs {
            self.benchmark.poll_timeout_secs = DEFAULT_POLL_TIMEOUT_SECS;
        }
        if self.rundown.lookback_hours == 0 {
            self.rundown.lookback_hours = RundownSettings::default().lookback_hours;
        }
        ensure_trailing_slash(&mut self.paths.testsite_baseurl);
        ensure_trailing_slash(&mut self.wordpress.url);
    }

    /// Absolute location of the sample content imported into each site.
    pub fn import_file(&self) -> PathBuf {
        if self.site.import_file.is_absolute() {
            self.site.import_file.clone()
        } else {
            self.wordpress.path.join(&self.site.import_file)
        }
    }

    pub fn featured_path(&self) -> PathBuf {
        self.paths.data_dir.join(&self.catalog.featured_file)
    }

    pub fn previous_snapshot_path(&self) -> PathBuf {
        self.paths.data_dir.join(&self.catalog.previous_file)
    }

    pub fn current_snapshot_path(&self) -> PathBuf {
        self.paths.data_dir.join(&self.catalog.current_file)
    }

    pub fn last_run_marker_path(&self) -> PathBuf {
        self.paths.state_dir.join(".lastrun")
    }

    pub fn lock_path(&self) -> PathBuf {
        self.paths.state_dir.join("themetest.lock")
    }

    pub fn metrics_path(&self) -> PathBuf {
        self.paths.state_dir.join("metrics.prom")
    }
}

fn resolve_env_secret(value: &mut String, var: &str) {
    if !value.trim().eq_ignore_ascii_case("env") {
        return;
    }
    match env::var(var) {
        Ok(v) => *value = v,
        Err(_) => {
            tracing::warn!(var, "secret configured as ENV but variable is not set");
            value.clear();
        }
    }
}

fn ensure_trailing_slash(url: &mut String) {
    if !url.ends_with('/') {
        url.push('/');
    }
}
