pub mod error;

pub use error::WatcherError;
