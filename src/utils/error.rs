use thiserror::Error;

#[derive(Error, Debug)]
pub enum WatcherError {
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parsing error: {message}")]
    Parse { message: String },

    #[error("Scraping error: {0}")]
    Scraping(String),

    #[error("Telegram API error: {0}")]
    Telegram(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

// Result type alias for convenience
pub type Result<T> = std::result::Result<T, WatcherError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: WatcherError = io_err.into();
        assert!(matches!(err, WatcherError::Io(_)));
    }

    #[test]
    fn test_parse_error_display() {
        let err = WatcherError::Parse {
            message: "invalid price text".to_string(),
        };
        assert_eq!(err.to_string(), "Parsing error: invalid price text");
    }

    #[test]
    fn test_telegram_error_display() {
        let err = WatcherError::Telegram("chat not found".to_string());
        assert_eq!(err.to_string(), "Telegram API error: chat not found");
    }
}
