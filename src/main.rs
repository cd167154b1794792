use std::io::Write;
use tokio::task;
use tokio_util::sync::CancellationToken;
use log::{info, error};
use env_logger;
use quizrelay::quizrelay::config::ServerConfig;
use quizrelay::quizrelay::init;

const DEFAULT_CONFIG_PATH: &str = "config.toml";

fn init_logger() {
    env_logger::Builder::from_default_env()
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}:{}] {} - {}",
                buf.timestamp_millis(),
                record.module_path().unwrap_or("unknown"),
                record.line().unwrap_or(0),
                record.level(),
                record.args()
            )
        })
        .init();
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    init_logger();

    info!("Quiz relay starting up");

    let path = std::env::args().nth(1).unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = match ServerConfig::from_toml_file(&path) {
        Ok(config) => {
            info!("Configuration loaded from {}", path);
            config
        },
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(std::io::Error::new(std::io::ErrorKind::Other, e.to_string()));
        }
    };

    let shutdown = CancellationToken::new();
    let server_shutdown = shutdown.clone();
    let mut server = task::spawn(async move {
        info!("🚀 Starting server {} on {}", config.id, config.server.addr);
        if let Err(e) = init(config, server_shutdown).await {
            error!("❌ Error in server: {e}");
        }
    });

    // Run until Ctrl-C or until the server exits on its own
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown requested, draining");
            shutdown.cancel();
            let _ = server.await;
        }
        _ = &mut server => {}
    }

    Ok(())
}
