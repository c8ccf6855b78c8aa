//! Custom macros for reducing code repetition in alphastack

/// Log an error and continue execution (non-fatal error handling)
///
/// # Example
/// ```ignore
/// log_and_continue!(player.snapshot(), "snapshot surface");
/// ```
#[macro_export]
macro_rules! log_and_continue {
    ($expr:expr, $context:expr) => {
        if let Err(e) = $expr {
            log::error!("Failed to {}: {}", $context, e);
        }
    };
}

/// Validate an enum-like string value
///
/// # Example
/// ```ignore
/// validate_enum!(fit, "fill", "contain", "cover");
/// validate_enum!(backend, "auto", "gpu", "cpu");
/// ```
#[macro_export]
macro_rules! validate_enum {
    ($value:expr, $($variant:expr),+) => {
        match $value {
            $($variant)|+ => Ok::<(), anyhow::Error>(()),
            _ => anyhow::bail!("Invalid value: {} (expected one of: {})", $value, [$($variant),+].join(", ")),
        }
    };
}
