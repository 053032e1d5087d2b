use std::sync::Arc;

use tokio::sync::mpsc::Receiver;
use tokio::sync::watch;

use crate::config::SharedConfig;
use crate::message::{DirectMethodInvocation, DirectMethodResponse};
use crate::telemetry::round3;
use crate::transport::Transport;

/// Direct method executed
pub const METHOD_SUCCESS: i32 = 200;
/// Direct method name not recognised
pub const METHOD_NOT_DEFINED: i32 = 404;
/// Direct method payload could not be parsed
pub const INVALID_PARAMETER: i32 = 400;

/// The direct methods this device understands
///
/// A closed set: anything else arriving from the hub maps to `Unknown` and
/// is answered with `METHOD_NOT_DEFINED` rather than dropped.
#[derive(Debug, PartialEq)]
pub enum DirectCommand {
    /// Change the telemetry send interval; payload is whole seconds
    SetTelemetryInterval,
    /// Scale the height increment; payload is a slow-down percentage
    SetHeightIncrements,
    /// Any method name this device does not implement
    Unknown(String),
}

impl From<&str> for DirectCommand {
    fn from(method_name: &str) -> Self {
        match method_name {
            "SetTelemetryInterval" => DirectCommand::SetTelemetryInterval,
            "SetHeightIncrements" => DirectCommand::SetHeightIncrements,
            other => DirectCommand::Unknown(other.to_string()),
        }
    }
}

/// Outcome of one direct method invocation
#[derive(Debug, PartialEq)]
pub struct CommandResult {
    /// One of [`METHOD_SUCCESS`], [`METHOD_NOT_DEFINED`], [`INVALID_PARAMETER`]
    pub status: i32,
    /// Human readable outcome reported back to the caller
    pub message: String,
}

impl CommandResult {
    fn success(method_name: &str) -> Self {
        Self {
            status: METHOD_SUCCESS,
            message: format!("Executed direct method {}", method_name),
        }
    }

    fn invalid_parameter(payload: &str) -> Self {
        Self {
            status: INVALID_PARAMETER,
            message: format!("Invalid parameter {}", payload),
        }
    }

    fn not_defined(method_name: &str) -> Self {
        Self {
            status: METHOD_NOT_DEFINED,
            message: format!("Not defined direct method {}", method_name),
        }
    }
}

/// Handle one direct method invocation
///
/// Total over its inputs: malformed payloads and unknown method names are
/// normal outcomes reported through the status code, never a fault. The
/// shared configuration is only touched on the success paths.
pub fn handle(method_name: &str, payload: &[u8], shared: &SharedConfig) -> CommandResult {
    let text = String::from_utf8_lossy(payload);
    let text = text.trim();

    match DirectCommand::from(method_name) {
        DirectCommand::SetTelemetryInterval => match text.parse::<u64>() {
            // Seconds that cannot be expressed in milliseconds are as
            // unusable as a non-numeric payload
            Ok(seconds) if seconds <= u64::MAX / 1000 => {
                info!("Direct method # Setting telemetry interval (seconds): {}", seconds);
                shared.set_telemetry_interval_secs(seconds);
                CommandResult::success(method_name)
            }
            _ => CommandResult::invalid_parameter(text),
        },
        DirectCommand::SetHeightIncrements => match text.parse::<f64>() {
            Ok(percentage) if percentage.is_finite() => {
                let factor = 1.0 - percentage / 100.0;
                let increment = round3(factor * shared.height_increment());
                info!("Direct method -> slowing crane by: {}%", percentage);
                info!("Setting height increments to: {}", increment);
                shared.set_height_increment(increment);
                CommandResult::success(method_name)
            }
            _ => CommandResult::invalid_parameter(text),
        },
        DirectCommand::Unknown(name) => {
            warn!("Received unknown direct method {}", name);
            CommandResult::not_defined(&name)
        }
    }
}

/// Serve direct method invocations until the channel closes or the stop
/// signal fires
///
/// Each invocation is handled synchronously and its result published back to
/// the hub; the delivery outcome of that response is logged, mirroring what
/// happens to telemetry acknowledgements.
pub async fn serve<T>(
    mut transport: T,
    mut invocations: Receiver<DirectMethodInvocation>,
    shared: Arc<SharedConfig>,
    mut stopped: watch::Receiver<bool>,
) -> crate::Result<()>
where
    T: Transport,
{
    loop {
        let invocation = tokio::select! {
            invocation = invocations.recv() => match invocation {
                Some(invocation) => invocation,
                None => break,
            },
            _ = stopped.changed() => break,
        };

        let result = handle(&invocation.method_name, &invocation.payload, &shared);
        info!(
            "Direct method {} -> {} {}",
            invocation.method_name, result.status, result.message
        );

        let response =
            DirectMethodResponse::new(invocation.request_id, result.status, Some(result.message));
        match transport.respond_to_direct_method(response).await {
            Ok(()) => info!("Direct method # IoT Hub accepted the method response"),
            Err(e) => error!("Failed to deliver method response: {}", e),
        }
    }

    info!("Direct method listener stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn set_telemetry_interval_converts_seconds_to_millis() {
        let shared = SharedConfig::default();
        let result = handle("SetTelemetryInterval", b"5", &shared);
        assert_eq!(result.status, METHOD_SUCCESS);
        assert_eq!(shared.telemetry_interval(), Duration::from_millis(5000));
    }

    #[test]
    fn set_telemetry_interval_rejects_non_numeric_payload() {
        let shared = SharedConfig::default();
        let result = handle("SetTelemetryInterval", b"abc", &shared);
        assert_eq!(result.status, INVALID_PARAMETER);
        assert_eq!(result.message, "Invalid parameter abc");
        assert_eq!(shared.telemetry_interval_ms(), 1000);
    }

    #[test]
    fn set_telemetry_interval_rejects_seconds_that_overflow_millis() {
        let shared = SharedConfig::default();
        // u64::MAX / 1000 + 1 seconds cannot be expressed in milliseconds
        let result = handle("SetTelemetryInterval", b"18446744073709552", &shared);
        assert_eq!(result.status, INVALID_PARAMETER);
        assert_eq!(shared.telemetry_interval_ms(), 1000);

        let result = handle("SetTelemetryInterval", b"18446744073709551615", &shared);
        assert_eq!(result.status, INVALID_PARAMETER);
        assert_eq!(shared.telemetry_interval_ms(), 1000);
    }

    #[test]
    fn set_telemetry_interval_accepts_the_largest_expressible_seconds() {
        let shared = SharedConfig::default();
        let result = handle("SetTelemetryInterval", b"18446744073709551", &shared);
        assert_eq!(result.status, METHOD_SUCCESS);
        assert_eq!(shared.telemetry_interval_ms(), 18_446_744_073_709_551_000);
    }

    #[test]
    fn set_telemetry_interval_rejects_negative_seconds() {
        let shared = SharedConfig::default();
        let result = handle("SetTelemetryInterval", b"-5", &shared);
        assert_eq!(result.status, INVALID_PARAMETER);
        assert_eq!(shared.telemetry_interval_ms(), 1000);
    }

    #[test]
    fn set_height_increments_scales_the_current_increment() {
        let shared = SharedConfig::default();
        let result = handle("SetHeightIncrements", b"50", &shared);
        assert_eq!(result.status, METHOD_SUCCESS);
        assert_eq!(shared.height_increment(), 0.25);
    }

    #[test]
    fn repeated_slow_downs_compound_multiplicatively() {
        let shared = SharedConfig::default();
        handle("SetHeightIncrements", b"50", &shared);
        handle("SetHeightIncrements", b"50", &shared);
        // 0.5 * 0.5 * 0.5, not 0.5 - 0.25 - 0.25
        assert_eq!(shared.height_increment(), 0.125);
    }

    #[test]
    fn slow_down_above_one_hundred_percent_reverses_the_crane() {
        let shared = SharedConfig::default();
        let result = handle("SetHeightIncrements", b"150", &shared);
        assert_eq!(result.status, METHOD_SUCCESS);
        assert_eq!(shared.height_increment(), -0.25);
    }

    #[test]
    fn new_increment_is_rounded_to_three_decimals() {
        let shared = SharedConfig::default();
        handle("SetHeightIncrements", b"33.333", &shared);
        // (1 - 0.33333) * 0.5 = 0.333335 -> 0.333
        assert_eq!(shared.height_increment(), 0.333);
    }

    #[test]
    fn set_height_increments_rejects_non_numeric_payload() {
        let shared = SharedConfig::default();
        let result = handle("SetHeightIncrements", b"abc", &shared);
        assert_eq!(result.status, INVALID_PARAMETER);
        assert_eq!(shared.height_increment(), 0.5);
    }

    #[test]
    fn set_height_increments_rejects_non_finite_payload() {
        let shared = SharedConfig::default();
        let result = handle("SetHeightIncrements", b"NaN", &shared);
        assert_eq!(result.status, INVALID_PARAMETER);
        assert_eq!(shared.height_increment(), 0.5);
    }

    #[test]
    fn unknown_method_is_not_defined_and_leaves_config_alone() {
        let shared = SharedConfig::default();
        let result = handle("Foo", b"whatever", &shared);
        assert_eq!(result.status, METHOD_NOT_DEFINED);
        assert!(result.message.contains("Foo"));
        assert_eq!(shared.telemetry_interval_ms(), 1000);
        assert_eq!(shared.height_increment(), 0.5);
    }

    #[test]
    fn method_names_map_to_the_closed_command_set() {
        assert_eq!(
            DirectCommand::from("SetTelemetryInterval"),
            DirectCommand::SetTelemetryInterval
        );
        assert_eq!(
            DirectCommand::from("SetHeightIncrements"),
            DirectCommand::SetHeightIncrements
        );
        assert_eq!(
            DirectCommand::from("setHeightIncrements"),
            DirectCommand::Unknown("setHeightIncrements".to_string())
        );
    }
}
