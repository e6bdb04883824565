pub mod display;
pub mod parser;
pub mod types;

pub use display::display_config;
pub use parser::{ConfigError, ConfigParser, FromYaml, ParseResult};
pub use types::AppConfig;
