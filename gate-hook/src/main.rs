//! `gate-hook`: the pre-execution hook binary. Reads one hook event JSON
//! object from stdin, runs the approval coordinator, and writes exactly one
//! decision JSON object to stdout. All diagnostics go to stderr so the
//! host's stdout JSON parser is never corrupted (spec §4.6, §6).

mod cli;

use clap::Parser;
use cli::Cli;
use gate_core::config::GateConfig;
use gate_core::coordinator;
use gate_core::coordinator::CoordinatorConfig;
use gate_core::coordinator::RealTerminal;
use gate_core::store::RestStore;
use gate_protocol::HookEvent;
use gate_protocol::HookOutput;
use std::io::Read;
use std::io::Write;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.log_directive());

    let output = match run(&cli).await {
        Ok(output) => output,
        Err(err) => {
            tracing::error!(error = %err, "coordinator failed, defaulting to deny");
            HookOutput::deny(format!("internal error: {err}"))
        }
    };

    write_output(&output);
}

fn init_tracing(default_level: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

async fn run(cli: &Cli) -> anyhow::Result<HookOutput> {
    let mut raw_input = String::new();
    std::io::stdin().read_to_string(&mut raw_input)?;

    let event: HookEvent = match serde_json::from_str(&raw_input) {
        Ok(event) => event,
        Err(err) => return Ok(HookOutput::deny(format!("malformed input: {err}"))),
    };

    let config = match &cli.config {
        Some(path) => GateConfig::load_from_path(path)?,
        None => GateConfig::load()?,
    };
    let rules = config.build_rule_set();
    let notifier = config.build_notifier()?;

    let mut store = RestStore::new(config.store_url(), config.toml.store.anon_key.clone());
    if let Some(service_key) = config.store_service_key() {
        store = store.with_service_key(service_key);
    }

    let cwd = std::env::current_dir()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|_| ".".to_string());

    let coordinator_config = CoordinatorConfig {
        timeout: std::time::Duration::from_secs(config.timeout_secs),
        default_action: config.default_action,
        machine_id_secret: config.machine_id_secret(),
        cwd,
    };

    let output = coordinator::run(
        &event,
        &rules,
        &store,
        &notifier,
        &RealTerminal,
        &coordinator_config,
    )
    .await;

    Ok(output)
}

fn write_output(output: &HookOutput) {
    match serde_json::to_string(output) {
        Ok(json) => {
            let stdout = std::io::stdout();
            let mut handle = stdout.lock();
            let _ = writeln!(handle, "{json}");
        }
        Err(err) => {
            tracing::error!(error = %err, "failed to serialize hook output");
            println!(r#"{{"decision":"deny","reason":"internal error"}}"#);
        }
    }
}
