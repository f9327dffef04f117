use argh::FromArgs;
use gatecam::{App, Config};

#[derive(FromArgs)]
/// Multi-mode camera streaming server with device proxying
struct Args {
    /// path to the configuration file
    #[argh(option, short = 'c', default = "String::from(\"config.yaml\")")]
    config: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    let env = env_logger::Env::default().default_filter_or("info");
    env_logger::init_from_env(env);

    let args: Args = argh::from_env();

    // Load configuration
    let config = match Config::from_file(&args.config) {
        Ok(c) => c,
        Err(e) => {
            log::error!("Failed to load config from '{}': {}", args.config, e);
            std::process::exit(1);
        }
    };

    log::info!(
        "Loaded configuration with {} cameras and {} devices",
        config.cameras.len(),
        config.devices.len()
    );

    // Shutdown flag; stays set for anyone subscribing later
    let shutdown_tx = tokio::sync::watch::Sender::new(false);

    // Set up Ctrl+C handler
    ctrlc::set_handler({
        let shutdown_tx = shutdown_tx.clone();
        move || {
            log::info!("Received Ctrl+C, shutting down gracefully...");
            shutdown_tx.send_replace(true);
        }
    })?;

    let app = App::from_config(config)?;
    app.run(shutdown_tx).await?;

    log::info!("Shut down, exiting");
    Ok(())
}
