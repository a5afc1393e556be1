use std::env;
use std::process::ExitCode;
use std::sync::Arc;

use micro_relay::{RelayConfig, Server, StaticFiles};
use tracing::{error, info, warn};
use tracing_subscriber::FmtSubscriber;

/// Read when no config path is given on the command line.
const CONFIG_ENV: &str = "MICRO_RELAY_CONFIG";

#[tokio::main]
async fn main() -> ExitCode {
    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("micro-relay: {e}");
            return ExitCode::FAILURE;
        }
    };

    // validated while loading
    let level = config.level().unwrap_or(tracing::Level::INFO);
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let resources = match StaticFiles::load_dir(&config.static_dir) {
        Ok(files) => files,
        Err(e) => {
            warn!(cause = %e, dir = %config.static_dir.display(), "no static resources, serving the embedded page only");
            StaticFiles::new()
        }
    }
    .with_index_fallback(&config.index_file);

    let server = match Server::bind(config, Arc::new(resources)).await {
        Ok(server) => server,
        Err(e) => {
            error!(cause = %e, "failed to start");
            return ExitCode::FAILURE;
        }
    };

    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(cause = %e, "failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
            info!("ctrl-c received");
        })
        .await;

    ExitCode::SUCCESS
}

fn load_config() -> Result<RelayConfig, micro_relay::ConfigError> {
    match env::args_os().nth(1).or_else(|| env::var_os(CONFIG_ENV)) {
        Some(path) => RelayConfig::from_json_file(path),
        None => Ok(RelayConfig::default()),
    }
}
