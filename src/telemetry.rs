use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, NaiveDateTime};
use rand::Rng;
use serde::{Serialize, Serializer};
use tokio::sync::watch;
use tokio::time;

use crate::config::SharedConfig;
use crate::message::Message;
use crate::transport::Transport;

// Site and rig constants for the simulated crane
const LATITUDE: f64 = -37.816368;
const LONGITUDE: f64 = 144.967005;
const LOAD_WEIGHT: f64 = 1.5;
const LIFT_ANGLE: f64 = 2.1042;
const INITIAL_HEIGHT: f64 = 13.0;
const INITIAL_WIND_SPEED: f64 = 2.0;

const MIN_HUMIDITY: f64 = 60.0;
const HUMIDITY_SPAN: f64 = 20.0;
const MIN_TEMPERATURE: f64 = 2.0;
const TEMPERATURE_SPAN: f64 = 2.0;
const WIND_GUST: f64 = 0.1;

const TEMPERATURE_ALERT_THRESHOLD: f64 = 30.0;

const DEVICE_TIME_FORMAT: &str = "%Y/%m/%d %H:%M:%S";

/// Round to 3 decimal places, halves away from zero
pub fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

fn serialize_device_time<S>(time: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&time.format(DEVICE_TIME_FORMAT).to_string())
}

/// One crane reading, built fresh each tick and discarded after sending
#[derive(Debug, Serialize)]
pub struct TelemetrySample {
    /// Device identity the reading belongs to
    pub device_id: String,
    /// Ambient temperature in °C
    pub temperature: f64,
    /// Relative humidity in %
    pub humidity: f64,
    /// Hook height in metres
    pub height: f64,
    /// Local wall clock time the reading was captured
    #[serde(serialize_with = "serialize_device_time")]
    pub device_time: NaiveDateTime,
    /// Site latitude
    pub latitude: f64,
    /// Site longitude
    pub longitude: f64,
    /// Wind speed in m/s
    pub wind_speed: f64,
    /// Load on the hook in tonnes
    pub load_weight: f64,
    /// Jib lift angle in radians
    pub lift_angle: f64,
}

impl TelemetrySample {
    /// Whether this reading should carry the `temperatureAlert` flag
    pub fn temperature_alert(&self) -> bool {
        self.temperature > TEMPERATURE_ALERT_THRESHOLD
    }
}

/// Simulated crane state carried across ticks
#[derive(Debug)]
pub struct Crane {
    device_id: String,
    height: f64,
    wind_speed: f64,
}

impl Crane {
    /// A crane at its initial position
    pub fn new(device_id: String) -> Self {
        Self {
            device_id,
            height: INITIAL_HEIGHT,
            wind_speed: INITIAL_WIND_SPEED,
        }
    }

    /// Advance the simulation one tick and capture a reading
    ///
    /// The height climbs by exactly `height_increment` (rounded to 3
    /// decimals); humidity and temperature are drawn fresh from their bands
    /// while wind speed drifts upward cumulatively.
    pub fn next_sample(&mut self, height_increment: f64) -> TelemetrySample {
        let mut rng = rand::thread_rng();

        self.height = round3(self.height + height_increment);
        self.wind_speed += rng.gen::<f64>() * WIND_GUST;

        TelemetrySample {
            device_id: self.device_id.clone(),
            temperature: MIN_TEMPERATURE + rng.gen::<f64>() * TEMPERATURE_SPAN,
            humidity: MIN_HUMIDITY + rng.gen::<f64>() * HUMIDITY_SPAN,
            height: self.height,
            device_time: Local::now().naive_local(),
            latitude: LATITUDE,
            longitude: LONGITUDE,
            wind_speed: self.wind_speed,
            load_weight: LOAD_WEIGHT,
            lift_angle: LIFT_ANGLE,
        }
    }
}

/// The telemetry send loop
///
/// Each tick reads the current height increment from the shared
/// configuration, captures a sample, publishes it and waits for the hub's
/// acknowledgement before sleeping the configured interval. Awaiting the
/// send future before doing anything else is what keeps at most one message
/// in flight.
#[derive(Debug)]
pub struct TelemetryLoop<T> {
    transport: T,
    crane: Crane,
    shared: Arc<SharedConfig>,
    ack_timeout: Duration,
}

impl<T> TelemetryLoop<T>
where
    T: Transport,
{
    /// Set up a loop sending readings for `device_id` over `transport`
    pub fn new(
        transport: T,
        device_id: String,
        shared: Arc<SharedConfig>,
        ack_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            crane: Crane::new(device_id),
            shared,
            ack_timeout,
        }
    }

    /// Run until the stop channel fires
    ///
    /// A stop signal interrupts the acknowledgement wait or the
    /// between-tick sleep; no further sends happen afterwards.
    pub async fn run(mut self, mut stopped: watch::Receiver<bool>) -> crate::Result<()> {
        loop {
            if *stopped.borrow() {
                break;
            }

            let sample = self.crane.next_sample(self.shared.height_increment());
            let body = serde_json::to_vec(&sample)?;

            info!("Sending message: {}", String::from_utf8_lossy(&body));

            let msg = Message::builder()
                .set_body(body)
                .set_content_type("application/json".to_owned())
                .set_content_encoding("UTF-8".to_owned())
                .add_message_property(
                    "temperatureAlert".to_owned(),
                    sample.temperature_alert().to_string(),
                )
                .build();

            tokio::select! {
                sent = time::timeout(self.ack_timeout, self.transport.send_message(msg)) => {
                    match sent {
                        Ok(Ok(())) => info!("IoT Hub acknowledged the message"),
                        // At-most-once delivery: the sample is gone either way
                        Ok(Err(e)) => error!("Failed to deliver telemetry: {}", e),
                        Err(_) => error!(
                            "No acknowledgement within {:?}, dropping sample",
                            self.ack_timeout
                        ),
                    }
                }
                _ = stopped.changed() => break,
            }

            let interval = self.shared.telemetry_interval();
            tokio::select! {
                _ = time::sleep(interval) => {}
                _ = stopped.changed() => break,
            }
        }

        info!("Telemetry loop stopped");
        Ok(())
    }
}
