pub mod config;
pub mod currency;
pub mod models;
pub mod monitor;
pub mod scraper;
pub mod storage;
pub mod telegram;
pub mod utils;

// Re-export commonly used types
pub use config::AppConfig;
pub use currency::CurrencyConverter;
pub use models::{CheckEntry, Product};
pub use monitor::Monitor;
pub use scraper::CatalogScraper;
pub use storage::ProductStore;
pub use telegram::TelegramBot;
pub use utils::error::WatcherError;

pub type Result<T> = std::result::Result<T, WatcherError>;
