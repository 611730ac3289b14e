//! Command-line surface and runtime wiring for the `sorting-hat` binary.

mod cli_args;
mod cli_types;
mod runtime;

pub use cli_args::Cli;
pub use cli_types::CliKvBackend;
pub use runtime::{build_kv_store, build_server_state, load_system_prompt, run};
