use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use url::Url;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub data_dir: String,
    pub telegram: TelegramConfig,
    pub scraper: ScraperConfig,
    pub currency: CurrencyConfig,
    pub monitor: MonitorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    /// Bot token; empty until provided via config, env or `--token`.
    pub token: String,
    pub api_base: String,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScraperConfig {
    pub base_url: String,
    pub user_agent: String,
    pub accept_language: String,
    pub max_pages: u32,
    pub request_timeout_secs: u64,
    pub page_delay_ms: u64,
    pub category_delay_ms: u64,
    /// Curated category set covering the whole catalog with minimal
    /// overlap. Hand-picked; kept as data so operators can adjust it
    /// without touching code.
    pub categories: Vec<Category>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Category {
    pub cate_no: u32,
    pub label: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrencyConfig {
    /// Last-resort KRW→UAH rate when every source fails and no cached
    /// rate exists.
    pub fallback_rate: f64,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    pub interval_hours: f64,
    /// Pause between individual alert sends, respecting Telegram rate limits.
    pub alert_delay_ms: u64,
    /// Daemon sleeps in increments of this size so a shutdown signal is
    /// observed between increments rather than at cycle boundaries.
    pub shutdown_poll_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: "data".to_string(),
            telegram: TelegramConfig {
                token: String::new(),
                api_base: "https://api.telegram.org".to_string(),
                request_timeout_secs: 15,
            },
            scraper: ScraperConfig {
                base_url: "https://m.themedicube.co.kr".to_string(),
                user_agent: "Mozilla/5.0 (Linux; Android 10; SM-G981B) \
                             AppleWebKit/537.36 (KHTML, like Gecko) \
                             Chrome/120.0.0.0 Mobile Safari/537.36"
                    .to_string(),
                accept_language: "ko-KR,ko;q=0.9,en;q=0.8".to_string(),
                max_pages: 5,
                request_timeout_secs: 20,
                page_delay_ms: 500,
                category_delay_ms: 1000,
                categories: default_categories(),
            },
            currency: CurrencyConfig {
                fallback_rate: 0.03,
                request_timeout_secs: 10,
            },
            monitor: MonitorConfig {
                interval_hours: 24.0,
                alert_delay_ms: 500,
                shutdown_poll_secs: 60,
            },
        }
    }
}

/// Categories that together contain every product without excessive overlap.
fn default_categories() -> Vec<Category> {
    [
        (51, "NEW"),
        (52, "BEST"),
        (441, "상품 유형별 (By Type)"),
        (454, "기능별 (By Function)"),
        (466, "라인별 (By Line)"),
        (501, "에이지알 (AGE-R)"),
        (760, "PDRN 라인"),
    ]
    .into_iter()
    .map(|(cate_no, label)| Category {
        cate_no,
        label: label.to_string(),
    })
    .collect()
}

impl AppConfig {
    /// Load configuration: built-in defaults, then optional config files,
    /// then environment variables with the `MEDICUBE` prefix.
    pub fn load() -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(Config::try_from(&AppConfig::default())?)
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(Environment::with_prefix("MEDICUBE").separator("__"))
            .build()?;

        let config: AppConfig = s.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.data_dir.is_empty() {
            return Err(ConfigError::Message("data_dir must not be empty".into()));
        }

        if Url::parse(&self.scraper.base_url).is_err() {
            return Err(ConfigError::Message("Invalid scraper base_url".into()));
        }

        if Url::parse(&self.telegram.api_base).is_err() {
            return Err(ConfigError::Message("Invalid telegram api_base".into()));
        }

        if self.scraper.max_pages == 0 {
            return Err(ConfigError::Message("scraper.max_pages must be greater than 0".into()));
        }

        if self.scraper.categories.is_empty() {
            return Err(ConfigError::Message("scraper.categories must not be empty".into()));
        }

        if self.currency.fallback_rate <= 0.0 {
            return Err(ConfigError::Message("currency.fallback_rate must be positive".into()));
        }

        if self.monitor.interval_hours <= 0.0 {
            return Err(ConfigError::Message("monitor.interval_hours must be positive".into()));
        }

        Ok(())
    }
}
