#[macro_use]
extern crate log;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time;

use simulated_crane::client::HubClient;
use simulated_crane::config::{DeviceConfig, SharedConfig};
use simulated_crane::telemetry::TelemetryLoop;
use simulated_crane::token::DeviceKeyTokenSource;
use simulated_crane::transport::Transport;
use simulated_crane::{command, SIMULATOR_VERSION};

// Half the MQTT keep-alive window
const PING_INTERVAL: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> simulated_crane::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let settings = DeviceConfig::from_env()?;
    let (hostname, device_id, shared_access_key) = settings.credentials()?;

    let token_source = DeviceKeyTokenSource::new(&hostname, &device_id, &shared_access_key)?;

    // Without a hub connection there is nothing to simulate
    let mut client = HubClient::new(&hostname, &device_id, token_source).await?;

    info!(
        "Simulated crane {} v{} connected to {}",
        device_id, SIMULATOR_VERSION, hostname
    );

    let invocations = client.get_receiver().await;

    let shared = Arc::new(SharedConfig::default());
    let (stop, stopped) = watch::channel(false);

    let command_listener = tokio::spawn(command::serve(
        client.clone(),
        invocations,
        Arc::clone(&shared),
        stopped.clone(),
    ));

    let mut ping_client = client.clone();
    let mut ping_stopped = stopped.clone();
    let keep_alive = tokio::spawn(async move {
        let mut interval = time::interval(PING_INTERVAL);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = ping_client.ping().await {
                        error!("Keep-alive ping failed: {}", e);
                        break;
                    }
                }
                _ = ping_stopped.changed() => break,
            }
        }
    });

    let telemetry = tokio::spawn(
        TelemetryLoop::new(
            client.clone(),
            device_id,
            Arc::clone(&shared),
            settings.ack_timeout(),
        )
        .run(stopped),
    );

    tokio::signal::ctrl_c().await?;
    info!("Interrupt received, shutting down");

    // Stop the loop and the listener first, then drop the connection
    let _ = stop.send(true);
    let _ = telemetry.await;
    let _ = command_listener.await;
    let _ = keep_alive.await;

    client.shutdown().await?;

    info!("Finished.");
    Ok(())
}
