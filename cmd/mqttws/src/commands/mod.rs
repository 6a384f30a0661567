//! CLI commands module.

mod config;
mod publish;
mod subscribe;
mod util;

pub use config::ConfigCommand;
pub use publish::PubCommand;
pub use subscribe::SubCommand;

// Re-export utils for use in commands
pub(crate) use util::*;
