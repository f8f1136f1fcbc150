use clap::Parser;
use log::{error, info};
use rescue_relay::config::{self, Config};
use rescue_relay::persist::LogSink;
use rescue_relay::relay::Relay;
use rescue_relay::state::SensorStore;
use std::sync::Arc;
use tokio::signal;

#[derive(Parser, Debug)]
#[command(name = "rescue-relay", about = "TCP relay backend for the rescue robot")]
struct Cli {
    #[arg(long, env = "ROBOT_PORT")]
    robot_port: Option<u16>,

    #[arg(long, env = "CONSOLE_PORT")]
    console_port: Option<u16>,

    #[arg(long, env = "VISION_PORT")]
    vision_port: Option<u16>,

    #[arg(long, env = "VIDEO_PORT")]
    video_port: Option<u16>,

    /// Base URL of the vision inference service
    #[arg(long, env = "VISION_URL")]
    vision_url: Option<String>,
}

fn init_logger() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();
}

#[tokio::main]
async fn main() {
    config::load_dotenv();
    init_logger();
    info!("Starting Rescue Relay");

    let cli = Cli::parse();
    let mut config = Config::from_env();
    if let Some(port) = cli.robot_port {
        config.net.robot_port = port;
    }
    if let Some(port) = cli.console_port {
        config.net.console_port = port;
    }
    if let Some(port) = cli.vision_port {
        config.net.vision_port = port;
    }
    if let Some(port) = cli.video_port {
        config.net.video_port = port;
    }
    if let Some(url) = cli.vision_url {
        config.vision.base_url = url;
    }

    info!("Configuration loaded:");
    info!("  Robot port: {}", config.net.robot_port);
    info!("  Console port: {}", config.net.console_port);
    info!("  Vision port: {}", config.net.vision_port);
    info!("  Video port: {}", config.net.video_port);
    info!("  Vision service: {}", config.vision.base_url);

    let state = Arc::new(SensorStore::new());
    let sink = Arc::new(LogSink);

    let mut relay = match Relay::start(config, state, sink).await {
        Ok(relay) => relay,
        Err(e) => {
            error!("Startup failed: {}", e);
            std::process::exit(1);
        }
    };

    info!("Rescue Relay is running");
    info!("  - Press Ctrl+C to exit");

    match signal::ctrl_c().await {
        Ok(()) => info!("Received shutdown signal"),
        Err(e) => error!("Failed to listen for shutdown signal: {}", e),
    }

    relay.shutdown();
    info!("Rescue Relay stopped");
}
