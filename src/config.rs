use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use crate::publish::Credential;
use crate::schedule::Schedule;

pub const DEFAULT_CONFIG_FILE: &str = "feedpipe.toml";
const ENV_FILE: &str = ".env";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub prepare: PrepareConfig,
    #[serde(default)]
    pub job: JobConfig,
    #[serde(default)]
    pub feeds: FeedsConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub publish: PublishConfig,
    pub sink: Option<SinkConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScheduleConfig {
    #[serde(default = "default_cron")]
    pub cron: String,
    #[serde(default = "default_lock_stale_after")]
    pub lock_stale_after_s: u64,
}

fn default_cron() -> String {
    "0 6 * * *".to_string()
}
fn default_lock_stale_after() -> u64 { 7200 }

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            cron: default_cron(),
            lock_stale_after_s: default_lock_stale_after(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PrepareConfig {
    /// Dependency manifest handed to the installer. No manifest, no install step.
    pub manifest: Option<PathBuf>,
    #[serde(default = "default_install_command")]
    pub install_command: Vec<String>,
    #[serde(default = "default_prepare_timeout")]
    pub timeout_s: u64,
}

fn default_install_command() -> Vec<String> {
    ["python3", "-m", "pip", "install", "-r"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_prepare_timeout() -> u64 { 900 }

impl Default for PrepareConfig {
    fn default() -> Self {
        Self {
            manifest: None,
            install_command: default_install_command(),
            timeout_s: default_prepare_timeout(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct JobConfig {
    /// External command to run instead of the built-in feed job.
    pub command: Option<Vec<String>>,
    #[serde(default = "default_job_timeout")]
    pub timeout_s: u64,
}

fn default_job_timeout() -> u64 { 600 }

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            command: None,
            timeout_s: default_job_timeout(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct FeedsConfig {
    #[serde(default)]
    pub urls: Vec<String>,
    #[serde(default = "default_max_entries")]
    pub max_entries_per_feed: usize,
    #[serde(default = "default_max_retained")]
    pub max_retained_items: usize,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_output_file")]
    pub output_file: String,
}

fn default_max_entries() -> usize { 10 }
fn default_max_retained() -> usize { 500 }
fn default_user_agent() -> String {
    "Mozilla/5.0".to_string()
}
fn default_request_timeout() -> u64 { 15_000 }
fn default_output_file() -> String {
    "output.json".to_string()
}

impl Default for FeedsConfig {
    fn default() -> Self {
        Self {
            urls: Vec::new(),
            max_entries_per_feed: default_max_entries(),
            max_retained_items: default_max_retained(),
            user_agent: default_user_agent(),
            request_timeout_ms: default_request_timeout(),
            output_file: default_output_file(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    #[serde(default = "default_repo_dir")]
    pub repo_dir: PathBuf,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_placeholder")]
    pub placeholder: String,
}

fn default_repo_dir() -> PathBuf {
    PathBuf::from(".")
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}
fn default_placeholder() -> String {
    ".gitkeep".to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            repo_dir: default_repo_dir(),
            data_dir: default_data_dir(),
            placeholder: default_placeholder(),
        }
    }
}

impl StoreConfig {
    pub fn data_root(&self) -> PathBuf {
        self.repo_dir.join(&self.data_dir)
    }

    pub fn lock_path(&self) -> PathBuf {
        self.repo_dir.join(".feedpipe.lock")
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PublishConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_remote")]
    pub remote: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    #[serde(default = "default_commit_message")]
    pub commit_message: String,
    #[serde(default = "default_bootstrap_message")]
    pub bootstrap_message: String,
    #[serde(default = "default_author_name")]
    pub author_name: String,
    #[serde(default = "default_author_email")]
    pub author_email: String,
    #[serde(default = "default_token_env")]
    pub token_env: String,
    #[serde(default = "default_git_bin")]
    pub git_bin: PathBuf,
}

fn default_true() -> bool { true }
fn default_remote() -> String {
    "origin".to_string()
}
fn default_branch() -> String {
    "main".to_string()
}
fn default_commit_message() -> String {
    "Update RSS feed data".to_string()
}
fn default_bootstrap_message() -> String {
    "Initialize data directory".to_string()
}
fn default_author_name() -> String {
    "github-actions[bot]".to_string()
}
fn default_author_email() -> String {
    "github-actions[bot]@users.noreply.github.com".to_string()
}
fn default_token_env() -> String {
    "FEEDPIPE_PUSH_TOKEN".to_string()
}
fn default_git_bin() -> PathBuf {
    PathBuf::from("git")
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            remote: default_remote(),
            branch: default_branch(),
            commit_message: default_commit_message(),
            bootstrap_message: default_bootstrap_message(),
            author_name: default_author_name(),
            author_email: default_author_email(),
            token_env: default_token_env(),
            git_bin: default_git_bin(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SinkConfig {
    pub url: String,
    #[serde(default = "default_sink_token_env")]
    pub token_env: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
}

fn default_sink_token_env() -> String {
    "FEEDPIPE_SINK_TOKEN".to_string()
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config TOML: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load .env (searched upward from the working directory) into the process
    /// environment. Real env vars take precedence. `Ok(None)` when there is none.
    ///
    /// Runs before logging is set up so `RUST_LOG` may come from the file; the
    /// caller logs the outcome.
    pub fn load_env_file() -> std::result::Result<Option<PathBuf>, dotenvy::Error> {
        match dotenvy::from_filename(ENV_FILE) {
            Ok(path) => Ok(Some(path)),
            Err(e) if e.not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn load_env_file_from(path: &Path) -> std::result::Result<Option<PathBuf>, dotenvy::Error> {
        match dotenvy::from_path(path) {
            Ok(()) => Ok(Some(path.to_path_buf())),
            Err(e) if e.not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn validate(&self) -> Result<()> {
        Schedule::parse(&self.schedule.cron)
            .with_context(|| format!("invalid schedule.cron: {:?}", self.schedule.cron))?;

        if self.store.data_dir.as_os_str().is_empty() {
            anyhow::bail!("store.data_dir cannot be empty");
        }
        let escapes = self
            .store
            .data_dir
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            anyhow::bail!(
                "store.data_dir must be a relative path inside the repository, got {}",
                self.store.data_dir.display()
            );
        }
        if self.store.placeholder.is_empty() || self.store.placeholder.contains(['/', '\\']) {
            anyhow::bail!("store.placeholder must be a plain file name");
        }

        match &self.job.command {
            Some(cmd) if cmd.is_empty() => anyhow::bail!("job.command cannot be empty"),
            Some(_) => {}
            None => {
                if self.feeds.urls.is_empty() {
                    anyhow::bail!("feeds.urls cannot be empty when the built-in feed job is used");
                }
                if self.feeds.max_entries_per_feed == 0 {
                    anyhow::bail!("feeds.max_entries_per_feed must be > 0");
                }
                // Items evicted from the state file would count as new on the next run.
                let batch = self.feeds.urls.len().saturating_mul(self.feeds.max_entries_per_feed);
                if self.feeds.max_retained_items < batch {
                    anyhow::bail!(
                        "feeds.max_retained_items ({}) must be at least one run's batch ({} urls x {} entries = {})",
                        self.feeds.max_retained_items,
                        self.feeds.urls.len(),
                        self.feeds.max_entries_per_feed,
                        batch
                    );
                }
            }
        }

        if self.prepare.manifest.is_some() && self.prepare.install_command.is_empty() {
            anyhow::bail!("prepare.install_command cannot be empty when a manifest is set");
        }
        Ok(())
    }

    /// Push token from the environment. Absent means push with ambient git credentials.
    pub fn publish_token(&self) -> Option<Credential> {
        read_credential(&self.publish.token_env)
    }

    pub fn sink_token(&self) -> Option<Credential> {
        self.sink.as_ref().and_then(|s| read_credential(&s.token_env))
    }
}

fn read_credential(var: &str) -> Option<Credential> {
    match std::env::var(var) {
        Ok(raw) => {
            let value = sanitize_key(&raw);
            if value.is_empty() {
                None
            } else {
                Some(Credential::new(value))
            }
        }
        Err(_) => None,
    }
}

/// Strip carriage returns, BOM, and other invisible chars from a key value.
fn sanitize_key(raw: &str) -> String {
    raw.replace(['\r', '\u{feff}', '\u{200b}'], "")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_parses() {
        let config = Config::load(Path::new(DEFAULT_CONFIG_FILE)).unwrap();
        assert_eq!(config.schedule.cron, "0 6 * * *");
        assert_eq!(config.feeds.max_entries_per_feed, 10);
        assert!(!config.feeds.urls.is_empty());
        assert!(config.publish.enabled);
        assert_eq!(config.store.data_dir, PathBuf::from("data"));
    }

    #[test]
    fn test_defaults_from_minimal_toml() {
        let config: Config = toml::from_str(
            r#"
            [feeds]
            urls = ["https://example.com/feed.xml"]
            "#,
        )
        .unwrap();
        config.validate().unwrap();
        assert_eq!(config.feeds.user_agent, "Mozilla/5.0");
        assert_eq!(config.feeds.output_file, "output.json");
        assert_eq!(config.store.placeholder, ".gitkeep");
        assert_eq!(config.publish.branch, "main");
        assert_eq!(config.publish.commit_message, "Update RSS feed data");
        assert!(config.job.command.is_none());
        assert!(config.sink.is_none());
    }

    #[test]
    fn test_rejects_escaping_data_dir() {
        let mut config = Config::default();
        config.feeds.urls.push("https://example.com/rss".to_string());
        config.store.data_dir = PathBuf::from("../elsewhere");
        assert!(config.validate().is_err());
        config.store.data_dir = PathBuf::from("/abs/data");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_bad_cron() {
        let mut config = Config::default();
        config.feeds.urls.push("https://example.com/rss".to_string());
        config.schedule.cron = "every day".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_builtin_job_requires_feeds() {
        let config = Config::default();
        assert!(config.validate().is_err());

        let mut with_command = Config::default();
        with_command.job.command = Some(vec!["python3".into(), "main.py".into()]);
        assert!(with_command.validate().is_ok());

        with_command.job.command = Some(vec![]);
        assert!(with_command.validate().is_err());
    }

    #[test]
    fn test_retention_must_cover_one_batch() {
        let mut config = Config::default();
        config.feeds.urls = vec!["https://a.example/rss".into(), "https://b.example/rss".into()];
        config.feeds.max_entries_per_feed = 10;

        config.feeds.max_retained_items = 19;
        assert!(config.validate().is_err());
        config.feeds.max_retained_items = 0;
        assert!(config.validate().is_err());
        config.feeds.max_retained_items = 20;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_file_loaded_into_environment() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join(".env");
        assert!(Config::load_env_file_from(&path).unwrap().is_none());

        std::fs::write(&path, "FEEDPIPE_ENV_FILE_TEST_VAR=from-file\n").unwrap();
        assert_eq!(Config::load_env_file_from(&path).unwrap(), Some(path.clone()));
        assert_eq!(std::env::var("FEEDPIPE_ENV_FILE_TEST_VAR").unwrap(), "from-file");
    }

    #[test]
    fn test_sanitize_key() {
        assert_eq!(sanitize_key("\u{feff}abc\r\n"), "abc");
        assert_eq!(sanitize_key("  tok\u{200b}en "), "token");
    }
}
