pub use self::parser::{ChannelConfig, Config, DatabaseConfig, LoggingConfig, SyncConfig};
pub use self::validator::ConfigError;

mod parser;
mod validator;
