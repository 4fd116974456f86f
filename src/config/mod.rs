//! Configuration loading: engine parameters from environment variables,
//! risk limit sets from a TOML file.

mod engine_config;
mod limits_file;

pub use engine_config::EngineConfig;
pub use limits_file::load_limits;
