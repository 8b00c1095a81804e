//! Configuration loader and validator for the Epic free-games bot.
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub app: App,
    pub telegram: Telegram,
    #[serde(default)]
    pub epic: Epic,
    #[serde(default)]
    pub display: Display,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_pushed_file")]
    pub pushed_file: String,
}

/// Telegram bot settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Telegram {
    pub bot_token: String,
    /// Users allowed to run the query command; empty means everyone.
    #[serde(default)]
    pub allowed_users: Vec<i64>,
    /// Chats that receive `push_check` notifications.
    #[serde(default)]
    pub push_chats: Vec<i64>,
}

/// Storefront API settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Epic {
    pub api_url: String,
    /// Request timeout in seconds.
    pub api_timeout: f64,
    pub api_retry_count: u32,
    /// Delay between attempts in seconds.
    pub api_retry_delay: f64,
    pub user_agent: String,
    pub referer: String,
    pub locale: String,
    pub country: String,
    /// Store root used to build product links.
    pub store_url: String,
}

/// Rendering toggles and message templates.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Display {
    pub show_price: bool,
    pub include_game_description: bool,
    pub include_developer_info: bool,
    pub include_publisher_info: bool,
    pub include_end_time: bool,
    /// Header used when at least one game qualifies; `{game_count}` is substituted.
    pub message_template: String,
    pub no_games_message: String,
    /// Header used when the catalog could not be fetched.
    pub error_message: String,
}

fn default_data_dir() -> String {
    "./data/epicfree".into()
}

fn default_pushed_file() -> String {
    "last_pushed.json".into()
}

impl Default for Epic {
    fn default() -> Self {
        Self {
            api_url: "https://store-site-backend-static-ipv4.ak.epicgames.com/freeGamesPromotions".into(),
            api_timeout: 10.0,
            api_retry_count: 3,
            api_retry_delay: 1.0,
            user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/98.0.4758.80 Safari/537.36".into(),
            referer: "https://www.epicgames.com/store/zh-CN/".into(),
            locale: "zh-CN".into(),
            country: "CN".into(),
            store_url: "https://store.epicgames.com/zh-CN".into(),
        }
    }
}

impl Default for Display {
    fn default() -> Self {
        Self {
            show_price: true,
            include_game_description: false,
            include_developer_info: false,
            include_publisher_info: false,
            include_end_time: true,
            message_template: "{game_count} 款游戏现在免费！".into(),
            no_games_message: "暂未找到正在促销的游戏...".into(),
            error_message: "Epic 可能又抽风啦，请稍后再试（".into(),
        }
    }
}

impl Epic {
    pub fn timeout(&self) -> Result<Duration, ConfigError> {
        match Duration::try_from_secs_f64(self.api_timeout) {
            Ok(d) if !d.is_zero() => Ok(d),
            _ => Err(ConfigError::Invalid("epic.api_timeout must be a positive number of seconds")),
        }
    }

    pub fn retry_delay(&self) -> Result<Duration, ConfigError> {
        Duration::try_from_secs_f64(self.api_retry_delay).map_err(|_| {
            ConfigError::Invalid("epic.api_retry_delay must be a non-negative number of seconds")
        })
    }
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.app.data_dir)
    }

    /// Location of the last-pushed bundle.
    pub fn pushed_path(&self) -> PathBuf {
        Path::new(&self.app.data_dir).join(&self.app.pushed_file)
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.app.pushed_file.trim().is_empty() {
        return Err(ConfigError::Invalid("app.pushed_file must be non-empty"));
    }

    if cfg.telegram.bot_token.trim().is_empty() {
        return Err(ConfigError::Invalid("telegram.bot_token must be non-empty"));
    }

    if Url::parse(&cfg.epic.api_url).is_err() {
        return Err(ConfigError::Invalid("epic.api_url must be a valid URL"));
    }
    if Url::parse(&cfg.epic.store_url).is_err() {
        return Err(ConfigError::Invalid("epic.store_url must be a valid URL"));
    }
    cfg.epic.timeout()?;
    cfg.epic.retry_delay()?;

    Ok(())
}

/// Returns the example YAML configuration.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data/epicfree"
  pushed_file: "last_pushed.json"

telegram:
  bot_token: "YOUR_TELEGRAM_BOT_TOKEN"
  allowed_users: []
  push_chats:
    - 123456789

epic:
  api_url: "https://store-site-backend-static-ipv4.ak.epicgames.com/freeGamesPromotions"
  api_timeout: 10.0
  api_retry_count: 3
  api_retry_delay: 1.0
  referer: "https://www.epicgames.com/store/zh-CN/"
  locale: "zh-CN"
  country: "CN"

display:
  include_game_description: true
  include_developer_info: true
  include_end_time: true
  message_template: "{game_count} 款游戏现在免费！"
"#
}
