use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(version)]
pub struct Cli {
    /// Path to `config.toml`. Defaults to `$GATE_HOME/config.toml`
    /// (`$GATE_HOME` itself defaults to `~/.codex-gate`).
    #[arg(long = "config", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Increase log verbosity. Repeat for more (-v, -vv, -vvv).
    #[arg(long = "verbose", short = 'v', action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    /// Maps `-v` repeats to a tracing filter directive, absent any
    /// `RUST_LOG` the operator already set.
    pub fn log_directive(&self) -> &'static str {
        match self.verbose {
            0 => "error",
            1 => "warn",
            2 => "info",
            3 => "debug",
            _ => "trace",
        }
    }
}
