pub mod backend;
pub mod cli;
pub mod create;
pub mod load_config;

pub use cli::{run, Cli, Commands};
