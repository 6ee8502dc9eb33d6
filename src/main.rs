//! Headless SerialKit runner.
//!
//! Usage: `serialkit [config path] [device id]`
//!
//! Loads the configuration (default: the platform config directory),
//! discovers devices, starts the selected script from the script library,
//! connects and streams until Ctrl-C or the demo window ends.

use anyhow::Context;
use serialkit::{init_logging, App, Config, ScriptLibrary};
use serialkit_communication::communication::simulated::SIMULATED_DEVICE_ID;
use std::path::PathBuf;
use tokio::time::Duration;

const RUN_FOR: Duration = Duration::from_secs(5);

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    init_logging()?;

    let mut args = std::env::args().skip(1);
    let config_path = match args.next() {
        Some(path) => PathBuf::from(path),
        None => Config::default_path()?,
    };
    let device_id = args.next().unwrap_or_else(|| SIMULATED_DEVICE_ID.to_string());

    let config = Config::load_or_default(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    tracing::info!("SerialKit {} starting", serialkit::VERSION);

    let app = App::new(config);
    let found = app.discover().await;
    tracing::info!("Discovered {} devices", found);
    for device in app.registry.devices() {
        tracing::info!("  {} - {}", device.id, device.title);
    }

    let mut library = ScriptLibrary::default();
    let runtime = app.scripts.run_selected(&mut library)?;
    tracing::info!("Running script '{}'", runtime.name());

    app.connect(&device_id)
        .await
        .with_context(|| format!("connecting to {}", device_id))?;

    tokio::select! {
        _ = tokio::time::sleep(RUN_FOR) => {}
        result = tokio::signal::ctrl_c() => result?,
    }

    for field in app.fields.lock().fields() {
        tracing::info!(
            "{}: {} (min {:?}, max {:?}, avg {:?}, {} updates)",
            field.name,
            field.value,
            field.min,
            field.max,
            field.avg,
            field.update_count
        );
    }

    app.shutdown().await?;
    Ok(())
}
