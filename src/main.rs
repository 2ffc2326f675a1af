use std::path::PathBuf;

use color_eyre::Result;
use mqtt_topic_manager::config::AppConfig;
use mqtt_topic_manager::mqtt::SubscriberRuntime;
use mqtt_topic_manager::ui::{run_stdio, Console};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    let config = setup_config().await?;
    info!("Using broker {}:{}", config.broker.host, config.broker.port);

    // The one subscriber of this process; every view borrows it
    let runtime = SubscriberRuntime::new(config.subscriber.clone());

    let mut console = Console::new(&runtime, config)?;
    println!("MQTT Topic Manager - type 'help' for commands");
    let result = run_stdio(&mut console).await;

    drop(console);
    runtime.shutdown().await;
    result
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    setup_logging_env();
    Ok(())
}

fn setup_logging_env() {
    let level = std::env::var("RUST_LOG")
        .ok()
        .and_then(|value| value.parse::<Level>().ok())
        .unwrap_or(Level::INFO);

    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_writer(std::io::stderr)
        .pretty()
        .init();
}

/// Config file from the first argument, else the platform default location
async fn setup_config() -> Result<AppConfig> {
    let path = match std::env::args_os().nth(1) {
        Some(path) => PathBuf::from(path),
        None => AppConfig::default_path()?,
    };

    AppConfig::ensure_default(&path).await?;
    AppConfig::load(&path).await
}
