//! TOML configuration parsing and validation.
//!
//! Secrets are never read from the file: the catalog key, library token,
//! and generator key come from `TMDB_API_KEY`, `PLEX_TOKEN`, and
//! `LLM_API_KEY` respectively.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use curator_core::exclusion::DEFAULT_WINDOW_DAYS;
use curator_core::models::Medium;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub library: Option<LibraryConfig>,
    #[serde(default)]
    pub history: Option<WatchHistoryConfig>,
    #[serde(default)]
    pub generator: GeneratorConfig,
    #[serde(default)]
    pub exclusion: ExclusionConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub schedule: Option<ScheduleConfig>,
    #[serde(default)]
    pub categories: Vec<CategoryConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct CatalogConfig {
    #[serde(default = "default_catalog_base")]
    pub api_base: String,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_catalog_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            api_base: default_catalog_base(),
            language: default_language(),
            timeout_secs: default_catalog_timeout(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_catalog_base() -> String {
    "https://api.themoviedb.org/3".to_string()
}
fn default_language() -> String {
    "en-US".to_string()
}
fn default_catalog_timeout() -> u64 {
    20
}
fn default_max_retries() -> u32 {
    2
}

#[derive(Debug, Deserialize, Clone)]
pub struct LibraryConfig {
    pub url: String,
    #[serde(default = "default_library_timeout")]
    pub timeout_secs: u64,
}

fn default_library_timeout() -> u64 {
    30
}

/// `[history]`: Tautulli watch history used as the generator's taste
/// profile. The key is read from `TAUTULLI_API_KEY`.
#[derive(Debug, Deserialize, Clone)]
pub struct WatchHistoryConfig {
    pub url: String,
    #[serde(default = "default_lookback_days")]
    pub lookback_days: u32,
    #[serde(default = "default_max_titles")]
    pub max_titles: usize,
    #[serde(default = "default_library_timeout")]
    pub timeout_secs: u64,
}

fn default_lookback_days() -> u32 {
    30
}

fn default_max_titles() -> usize {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct GeneratorConfig {
    #[serde(default = "default_generator_base")]
    pub api_base: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_recs_per_category")]
    pub recs_per_category: usize,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_generator_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            api_base: default_generator_base(),
            model: default_model(),
            recs_per_category: default_recs_per_category(),
            temperature: default_temperature(),
            timeout_secs: default_generator_timeout(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_generator_base() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_recs_per_category() -> usize {
    20
}
fn default_temperature() -> f32 {
    0.7
}
fn default_generator_timeout() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExclusionConfig {
    #[serde(default = "default_window_days")]
    pub window_days: u32,
}

impl Default for ExclusionConfig {
    fn default() -> Self {
        Self {
            window_days: default_window_days(),
        }
    }
}

fn default_window_days() -> u32 {
    DEFAULT_WINDOW_DAYS
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8787".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScheduleConfig {
    pub interval_minutes: u64,
}

/// A labeled recommendation theme.
#[derive(Debug, Deserialize, Clone, serde::Serialize)]
pub struct CategoryConfig {
    pub label: String,
    /// `genre`, `mood`, `keyword`, `title_seed`, or `seed_list`.
    #[serde(default = "default_kind")]
    pub kind: String,
    #[serde(default = "default_media_types")]
    pub media_types: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include_genres: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude_genres: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords_prefer: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords_avoid: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mood_keywords: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub seeds: Vec<TitleSeed>,
}

fn default_kind() -> String {
    "genre".to_string()
}
fn default_media_types() -> Vec<String> {
    vec!["movie".to_string(), "tv".to_string()]
}

#[derive(Debug, Deserialize, Clone, serde::Serialize)]
pub struct TitleSeed {
    pub title: String,
    pub year: i32,
    pub medium: String,
}

/// A century. Longer windows would exclude every title ever recommended.
const MAX_WINDOW_DAYS: u32 = 36_500;

const CATEGORY_KINDS: &[&str] = &["genre", "mood", "keyword", "title_seed", "seed_list"];

impl Config {
    /// A config with only a database path, for commands that need no
    /// providers.
    pub fn minimal(db_path: PathBuf) -> Self {
        Self {
            db: DbConfig { path: db_path },
            log: LogConfig::default(),
            catalog: CatalogConfig::default(),
            library: None,
            history: None,
            generator: GeneratorConfig::default(),
            exclusion: ExclusionConfig::default(),
            server: ServerConfig::default(),
            schedule: None,
            categories: Vec::new(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    if config.exclusion.window_days == 0 || config.exclusion.window_days > MAX_WINDOW_DAYS {
        anyhow::bail!(
            "exclusion.window_days must be between 1 and {}",
            MAX_WINDOW_DAYS
        );
    }

    if config.generator.recs_per_category == 0 {
        anyhow::bail!("generator.recs_per_category must be >= 1");
    }

    if config.catalog.timeout_secs == 0 {
        anyhow::bail!("catalog.timeout_secs must be >= 1");
    }

    if let Some(history) = &config.history {
        if history.lookback_days == 0 || history.lookback_days > MAX_WINDOW_DAYS {
            anyhow::bail!(
                "history.lookback_days must be between 1 and {}",
                MAX_WINDOW_DAYS
            );
        }
        if history.max_titles == 0 {
            anyhow::bail!("history.max_titles must be >= 1");
        }
    }

    if let Some(schedule) = &config.schedule {
        if schedule.interval_minutes == 0 {
            anyhow::bail!("schedule.interval_minutes must be >= 1");
        }
    }

    let mut labels = HashSet::new();
    for category in &config.categories {
        if category.label.trim().is_empty() {
            anyhow::bail!("categories: label must not be empty");
        }
        if !labels.insert(category.label.as_str()) {
            anyhow::bail!("categories: duplicate label '{}'", category.label);
        }
        if !CATEGORY_KINDS.contains(&category.kind.as_str()) {
            anyhow::bail!(
                "categories '{}': unknown kind '{}'. Must be one of: {}",
                category.label,
                category.kind,
                CATEGORY_KINDS.join(", ")
            );
        }
        for medium in &category.media_types {
            Medium::normalize(medium)
                .with_context(|| format!("categories '{}': invalid media_types", category.label))?;
        }
    }

    Ok(config)
}
