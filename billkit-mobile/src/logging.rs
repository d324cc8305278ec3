//! Process-wide log output.

use tracing_subscriber::EnvFilter;

use crate::MobileError;

/// Filter used when neither the caller nor `RUST_LOG` supplies one.
pub const DEFAULT_LOG_FILTER: &str = "billkit_mobile=info,billkit_lib=info";

/// Install the global fmt subscriber.
///
/// `filter` takes `EnvFilter` directives; `None` falls back to `RUST_LOG`,
/// then to [`DEFAULT_LOG_FILTER`]. Returns `Ok(false)` when a subscriber is
/// already installed.
pub fn init_logging(filter: Option<&str>) -> Result<bool, MobileError> {
    let filter = match filter {
        Some(directives) => EnvFilter::try_new(directives).map_err(|e| MobileError::Logging {
            msg: format!("invalid log filter '{}': {}", directives, e),
        })?,
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
    };

    Ok(tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_is_idempotent() {
        // Another test in this binary may have installed it first.
        let _ = init_logging(Some("billkit_lib=debug"));
        assert!(!init_logging(None).unwrap());
    }

    #[test]
    fn test_invalid_filter_is_rejected() {
        let err = init_logging(Some("billkit_lib=notalevel")).unwrap_err();
        assert!(matches!(err, MobileError::Logging { .. }));
    }
}
