use crate::dedup::ErrorPolicy;
use crate::schedule::{parse_times, SearchSchedule, TrendingPass};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

const ENV_FILE: &str = ".env";

/// Production floor for the channel poll interval.
pub const MIN_POLL_INTERVAL_S: u64 = 300;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub youtube: YouTubeConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub publish: PublishConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MonitorConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_s: u64,
    /// Feed entries older than this are ignored. 0 disables the window.
    #[serde(default = "default_lookback")]
    pub lookback_hours: Option<u64>,
    #[serde(default)]
    pub error_policy: ErrorPolicy,
}

fn default_poll_interval() -> u64 { 1800 }
fn default_lookback() -> Option<u64> { Some(48) }

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_s: default_poll_interval(),
            lookback_hours: default_lookback(),
            error_policy: ErrorPolicy::default(),
        }
    }
}

impl MonitorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_s)
    }

    pub fn lookback(&self) -> Option<chrono::Duration> {
        self.lookback_hours
            .filter(|h| *h > 0)
            .and_then(|h| i64::try_from(h).ok())
            .map(chrono::Duration::hours)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

fn default_database_path() -> PathBuf { PathBuf::from("data/autopilot.db") }

impl Default for StoreConfig {
    fn default() -> Self {
        Self { database_path: default_database_path() }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct YouTubeConfig {
    #[serde(default = "default_feed_base")]
    pub feed_base_url: String,
    #[serde(default = "default_search_api")]
    pub search_api_base: String,
    /// Host serving watch pages, whose player response lists caption tracks.
    #[serde(default = "default_watch_base")]
    pub watch_base_url: String,
    #[serde(default = "default_languages")]
    pub transcript_languages: Vec<String>,
    #[serde(default = "default_min_words")]
    pub min_transcript_words: usize,
    #[serde(default = "default_http_timeout")]
    pub request_timeout_s: u64,
}

fn default_feed_base() -> String { crate::feed::urls::FEED_BASE.to_string() }
fn default_search_api() -> String { "https://www.googleapis.com/youtube/v3".to_string() }
fn default_watch_base() -> String { "https://www.youtube.com".to_string() }
fn default_languages() -> Vec<String> { vec!["en".to_string(), "fr".to_string()] }
fn default_min_words() -> usize { 50 }
fn default_http_timeout() -> u64 { 30 }

impl Default for YouTubeConfig {
    fn default() -> Self {
        Self {
            feed_base_url: default_feed_base(),
            search_api_base: default_search_api(),
            watch_base_url: default_watch_base(),
            transcript_languages: default_languages(),
            min_transcript_words: default_min_words(),
            request_timeout_s: default_http_timeout(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_generation_api")]
    pub api_base: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_generation_timeout")]
    pub request_timeout_s: u64,
}

fn default_generation_api() -> String { "https://api.mistral.ai/v1".to_string() }
fn default_model() -> String { "mistral-large-latest".to_string() }
fn default_temperature() -> f64 { 0.7 }
fn default_generation_timeout() -> u64 { 180 }

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            api_base: default_generation_api(),
            model: default_model(),
            temperature: default_temperature(),
            request_timeout_s: default_generation_timeout(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    #[serde(default = "default_max_results")]
    pub default_max_results: usize,
    #[serde(default = "default_days_threshold")]
    pub default_days_threshold: u32,
    #[serde(default)]
    pub pace_min_ms: u64,
    #[serde(default)]
    pub pace_max_ms: u64,
    #[serde(default)]
    pub schedule: ScheduleConfig,
}

fn default_max_results() -> usize { 5 }
fn default_days_threshold() -> u32 { 7 }

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_max_results: default_max_results(),
            default_days_threshold: default_days_threshold(),
            pace_min_ms: 0,
            pace_max_ms: 0,
            schedule: ScheduleConfig::default(),
        }
    }
}

/// `[search.schedule]`: recurring search passes for one project.
#[derive(Debug, Deserialize, Clone)]
pub struct ScheduleConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub project_id: Option<i64>,
    #[serde(default)]
    pub queries: Vec<String>,
    #[serde(default = "default_daily_times")]
    pub daily_times: Vec<String>,
    #[serde(default = "default_videos_per_search")]
    pub videos_per_search: usize,
    #[serde(default = "default_days_threshold")]
    pub days_threshold: u32,
    #[serde(default = "default_true")]
    pub auto_publish: bool,
    /// Empty uses `publish.default_categories`.
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub trending: bool,
    #[serde(default = "default_region")]
    pub trending_region: String,
    #[serde(default = "default_trending_categories")]
    pub trending_categories: Vec<String>,
}

fn default_daily_times() -> Vec<String> {
    ["08:00", "12:00", "16:00", "20:00"].iter().map(|t| t.to_string()).collect()
}
fn default_videos_per_search() -> usize { 1 }
fn default_true() -> bool { true }
fn default_region() -> String { "US".to_string() }
fn default_trending_categories() -> Vec<String> { vec!["Trending".to_string()] }

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            project_id: None,
            queries: Vec::new(),
            daily_times: default_daily_times(),
            videos_per_search: default_videos_per_search(),
            days_threshold: default_days_threshold(),
            auto_publish: true,
            categories: Vec::new(),
            trending: false,
            trending_region: default_region(),
            trending_categories: default_trending_categories(),
        }
    }
}

impl ScheduleConfig {
    /// The schedule to run, or `None` when disabled.
    pub fn to_schedule(&self) -> Result<Option<SearchSchedule>> {
        if !self.enabled {
            return Ok(None);
        }
        let Some(project_id) = self.project_id else {
            anyhow::bail!("search.schedule.project_id is required when the schedule is enabled");
        };
        let times = parse_times(&self.daily_times).context("search.schedule.daily_times")?;
        if times.is_empty() {
            anyhow::bail!("search.schedule.daily_times must list at least one time");
        }
        if self.videos_per_search == 0 {
            anyhow::bail!("search.schedule.videos_per_search must be at least 1");
        }
        let queries: Vec<String> = self
            .queries
            .iter()
            .map(|q| q.trim().to_string())
            .filter(|q| !q.is_empty())
            .collect();
        if queries.is_empty() && !self.trending {
            anyhow::bail!("search.schedule needs at least one query or trending = true");
        }
        Ok(Some(SearchSchedule {
            project_id,
            queries,
            times,
            videos_per_search: self.videos_per_search,
            days_threshold: self.days_threshold,
            auto_publish: self.auto_publish,
            categories: (!self.categories.is_empty()).then(|| self.categories.clone()),
            trending: self.trending.then(|| TrendingPass {
                region: self.trending_region.clone(),
                categories: self.trending_categories.clone(),
            }),
        }))
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PublishConfig {
    #[serde(default = "default_post_status")]
    pub post_status: String,
    #[serde(default)]
    pub default_categories: Vec<String>,
    #[serde(default = "default_http_timeout")]
    pub request_timeout_s: u64,
}

fn default_post_status() -> String { "draft".to_string() }

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            post_status: default_post_status(),
            default_categories: Vec::new(),
            request_timeout_s: default_http_timeout(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| "Failed to parse config TOML")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.monitor.poll_interval_s < MIN_POLL_INTERVAL_S {
            anyhow::bail!(
                "monitor.poll_interval_s must be at least {} (got {})",
                MIN_POLL_INTERVAL_S,
                self.monitor.poll_interval_s
            );
        }
        if self.youtube.transcript_languages.is_empty() {
            anyhow::bail!("youtube.transcript_languages must list at least one language");
        }
        if self.search.pace_min_ms > self.search.pace_max_ms {
            anyhow::bail!("search.pace_min_ms must not exceed search.pace_max_ms");
        }
        if !matches!(self.publish.post_status.as_str(), "draft" | "publish" | "pending" | "private") {
            anyhow::bail!("publish.post_status must be draft, publish, pending or private");
        }
        self.search.schedule.to_schedule()?;
        Ok(())
    }

    /// Load .env file into process environment. Real env vars take precedence.
    pub fn load_env_file() {
        let path = Path::new(ENV_FILE);
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(_) => return,
        };
        // Strip BOM if present (common on Windows-created files)
        let content = content.strip_prefix('\u{feff}').unwrap_or(&content);
        for line in content.lines() {
            let line = line.trim().trim_matches('\r');
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                let key = key.trim();
                let value = value.trim().trim_matches('"').trim_matches('\'');
                if std::env::var(key).is_err() {
                    std::env::set_var(key, value);
                }
            }
        }
    }

    /// Generation key from the environment, or prompted and saved to .env.
    pub fn mistral_api_key() -> Result<String> {
        match std::env::var("MISTRAL_API_KEY") {
            Ok(key) if !key.is_empty() => Ok(sanitize_key(&key)),
            _ => {
                let key = prompt("Mistral API Key")?;
                save_env_var("MISTRAL_API_KEY", &key);
                Ok(key)
            }
        }
    }

    /// Only search needs the Data API. Without a key, search batches are unavailable.
    pub fn youtube_api_key() -> Option<String> {
        std::env::var("YOUTUBE_API_KEY")
            .ok()
            .map(|k| sanitize_key(&k))
            .filter(|k| !k.is_empty())
    }
}

fn prompt(label: &str) -> Result<String> {
    print!("  {} > ", label);
    io::stdout().flush()?;
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    let value = input.trim().to_string();
    if value.is_empty() {
        anyhow::bail!("{} cannot be empty", label);
    }
    Ok(value)
}

/// Strip carriage returns, BOM, and other invisible chars from a key value.
fn sanitize_key(raw: &str) -> String {
    raw.replace(['\r', '\u{feff}', '\u{200b}'], "")
        .trim()
        .to_string()
}

/// Append a KEY=VALUE line to .env and set it in the current process.
fn save_env_var(key: &str, value: &str) {
    std::env::set_var(key, value);
    let path = Path::new(ENV_FILE);
    let mut contents = std::fs::read_to_string(path).unwrap_or_default();
    if !contents.is_empty() && !contents.ends_with('\n') {
        contents.push('\n');
    }
    contents.push_str(&format!("{}={}\n", key, value));
    let _ = std::fs::write(path, contents);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_parses() {
        let config = Config::load(Path::new("config.toml")).unwrap();
        assert_eq!(config.monitor.poll_interval_s, 1800);
        assert_eq!(config.monitor.lookback_hours, Some(48));
        assert_eq!(config.monitor.error_policy, ErrorPolicy::Retry);
        assert_eq!(config.publish.post_status, "draft");
        assert_eq!(config.youtube.transcript_languages, vec!["en", "fr"]);
        assert_eq!(config.search.default_max_results, 5);
        assert!(!config.search.schedule.enabled);
        assert_eq!(config.youtube.watch_base_url, "https://www.youtube.com");
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.store.database_path, PathBuf::from("data/autopilot.db"));
        assert_eq!(config.youtube.min_transcript_words, 50);
        assert_eq!(config.monitor.lookback(), Some(chrono::Duration::hours(48)));
    }

    #[test]
    fn test_validate_rejects_short_poll_interval() {
        let config: Config = toml::from_str("[monitor]\npoll_interval_s = 60\n").unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("poll_interval_s"));
    }

    #[test]
    fn test_zero_lookback_disables_window() {
        let config: Config = toml::from_str("[monitor]\nlookback_hours = 0\n").unwrap();
        assert_eq!(config.monitor.lookback(), None);
    }

    #[test]
    fn test_error_policy_parses() {
        let config: Config = toml::from_str("[monitor]\nerror_policy = \"block\"\n").unwrap();
        assert_eq!(config.monitor.error_policy, ErrorPolicy::Block);
    }

    #[test]
    fn test_schedule_disabled_by_default() {
        let config: Config = toml::from_str("").unwrap();
        assert!(config.search.schedule.to_schedule().unwrap().is_none());
        assert_eq!(config.search.schedule.daily_times.len(), 4);
    }

    #[test]
    fn test_schedule_section_parses() {
        let toml = r#"
[search.schedule]
enabled = true
project_id = 3
queries = ["rust async", "  "]
daily_times = ["20:00", "08:30"]
videos_per_search = 2
trending = true
"#;
        let config: Config = toml::from_str(toml).unwrap();
        let schedule = config.search.schedule.to_schedule().unwrap().unwrap();
        assert_eq!(schedule.project_id, 3);
        assert_eq!(schedule.queries, vec!["rust async"]);
        assert_eq!(schedule.times[0].format("%H:%M").to_string(), "08:30");
        assert_eq!(schedule.videos_per_search, 2);
        assert!(schedule.categories.is_none());
        let trending = schedule.trending.unwrap();
        assert_eq!(trending.region, "US");
        assert_eq!(trending.categories, vec!["Trending"]);
    }

    #[test]
    fn test_schedule_validation() {
        for (toml, needle) in [
            ("[search.schedule]\nenabled = true\nqueries = [\"q\"]\n", "project_id"),
            ("[search.schedule]\nenabled = true\nproject_id = 1\n", "query"),
            (
                "[search.schedule]\nenabled = true\nproject_id = 1\nqueries = [\"q\"]\ndaily_times = [\"8am\"]\n",
                "daily_times",
            ),
            (
                "[search.schedule]\nenabled = true\nproject_id = 1\nqueries = [\"q\"]\nvideos_per_search = 0\n",
                "videos_per_search",
            ),
        ] {
            let config: Config = toml::from_str(toml).unwrap();
            let err = config.validate().unwrap_err();
            assert!(format!("{:#}", err).contains(needle), "{} should mention {}", err, needle);
        }
    }

    #[test]
    fn test_sanitize_key() {
        assert_eq!(sanitize_key("\u{feff} abc\r\n"), "abc");
    }
}
