//! Errors raised by the stock callbacks.

use serde_json::Value;

/// Failures of stock callbacks; they reach the driver as user errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CallbackError {
    #[error("Callback '{callback}' monitors '{name}', which is not numeric: {value}")]
    NonNumericMetric {
        callback: String,
        name: String,
        value: String,
    },

    #[error("Checkpoint store failed to {operation}: {message}")]
    Store { operation: String, message: String },
}

/// Read a monitored metric as a float.
///
/// JSON has no NaN or infinity, so a non-finite float logged into
/// [`Logs`](ritmo_core::Logs) is stored as `null`. It reads back as NaN,
/// which never counts as an improvement.
pub(crate) fn monitored_value(
    callback: &str,
    name: &str,
    value: &Value,
) -> Result<f64, CallbackError> {
    if value.is_null() {
        return Ok(f64::NAN);
    }
    value
        .as_f64()
        .ok_or_else(|| CallbackError::NonNumericMetric {
            callback: callback.to_string(),
            name: name.to_string(),
            value: value.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_monitored_value() {
        assert_eq!(monitored_value("cb", "loss", &json!(0.5)), Ok(0.5));
        assert_eq!(monitored_value("cb", "loss", &json!(3)), Ok(3.0));
        assert!(monitored_value("cb", "loss", &Value::Null).unwrap().is_nan());
        assert!(matches!(
            monitored_value("cb", "loss", &json!("high")),
            Err(CallbackError::NonNumericMetric { .. })
        ));
    }

    #[test]
    fn test_error_display() {
        let err = CallbackError::NonNumericMetric {
            callback: "early_stopping".into(),
            name: "loss".into(),
            value: "\"nan\"".into(),
        };
        assert_eq!(
            err.to_string(),
            "Callback 'early_stopping' monitors 'loss', which is not numeric: \"nan\""
        );
    }
}
