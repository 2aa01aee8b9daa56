use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(version)]
pub struct Cli {
    /// Path to `config.toml`. Defaults to `$GATE_HOME/config.toml`
    /// (`$GATE_HOME` itself defaults to `~/.codex-gate`).
    #[arg(long = "config", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Address to bind the HTTP listener on.
    #[arg(long = "addr", default_value = "0.0.0.0:8787")]
    pub addr: String,
}
