/*!
Infrastructure shared by the sippin crates.

- `logging`: tracing subscriber setup
- `config`: loading serde configuration structs from TOML or JSON files
- `errors`: the common error type used by both
*/

pub mod config;
pub mod errors;
pub mod logging;

pub use config::{load_config, load_config_str, ConfigFormat};
pub use errors::{Error, Result};
pub use logging::{setup_logging, LogFormat, LoggingConfig};
