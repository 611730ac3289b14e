use clap::ValueEnum;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
/// Enumerates supported `CliKvBackend` values.
pub enum CliKvBackend {
    /// Process memory; state is lost on restart.
    Memory,
    /// Local redb file at `--kv-path`.
    Redb,
    /// Upstash / Vercel KV REST endpoint.
    Rest,
}
