//! CLI entry point: parses flags, loads YAML configuration, supervises
//! Proxies, and shuts down cleanly on Ctrl-C.

use std::process::ExitCode;

use clap::Parser;
use stratum_proxy::app::Application;
use stratum_proxy::config::{generate_config_template, AppConfig};

#[derive(Parser, Debug)]
#[command(name = "stratum-proxy", version = stratum_proxy::APP_VERSION, about = "A Stratum mining proxy")]
struct Cli {
    /// Path to the proxy's YAML configuration file.
    #[arg(long, value_name = "FILE")]
    config: Option<String>,

    /// Write a starting configuration template to stdout and exit.
    #[arg(long)]
    generate_config: bool,

    /// Log WARNING and above only.
    #[arg(long, conflicts_with = "loud")]
    quiet: bool,

    /// Log DEBUG and above.
    #[arg(long, conflicts_with = "quiet")]
    loud: bool,
}

fn init_logging(cli: &Cli) {
    let level = if cli.loud {
        "debug"
    } else if cli.quiet {
        "warn"
    } else {
        "info"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.generate_config {
        println!("{}", generate_config_template());
        return ExitCode::SUCCESS;
    }

    init_logging(&cli);

    let config_path = match &cli.config {
        Some(path) => path,
        None => {
            eprintln!("error: --config FILE is required (or pass --generate-config)");
            return ExitCode::FAILURE;
        }
    };

    let config = match AppConfig::from_file(config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let app = match Application::from_config(config) {
        Ok(a) => a,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = app.startup().await {
        log::error!(target: "stratum-proxy", "startup failed: {e}");
        app.shutdown().await;
        return ExitCode::FAILURE;
    }

    log::info!(target: "stratum-proxy", "{} running, press Ctrl-C to stop", stratum_proxy::APP_VERSION);
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::warn!(target: "stratum-proxy", "failed to listen for ctrl-c: {e}");
    }

    log::info!(target: "stratum-proxy", "shutting down");
    app.shutdown().await;

    ExitCode::SUCCESS
}
