//! Custom macros for reducing code repetition in glasswall

/// Log an error and continue execution (non-fatal error handling)
///
/// # Example
/// ```ignore
/// log_and_continue!(worker.poll_video(), "poll video decoder");
/// ```
#[macro_export]
macro_rules! log_and_continue {
    ($expr:expr, $context:expr) => {
        if let Err(e) = $expr {
            log::error!("Failed to {}: {}", $context, e);
        }
    };
}

/// Commit a shared memory buffer to a Wayland layer surface
///
/// # Example
/// ```ignore
/// commit_buffer!(layer_surface, buffer, width, height);
/// ```
#[macro_export]
macro_rules! commit_buffer {
    ($layer_surface:expr, $buffer:expr, $width:expr, $height:expr) => {
        $layer_surface
            .wl_surface()
            .attach(Some($buffer.buffer()), 0, 0);
        $layer_surface
            .wl_surface()
            .damage_buffer(0, 0, $width as i32, $height as i32);
        $layer_surface.wl_surface().commit();
    };
}

/// Validate an enum-like string value
///
/// # Example
/// ```ignore
/// validate_enum!(level, "trace", "debug", "info", "warn", "error");
/// ```
#[macro_export]
macro_rules! validate_enum {
    ($value:expr, $($variant:expr),+) => {
        match $value {
            $($variant)|+ => Ok(()),
            _ => anyhow::bail!("Invalid value: {} (expected one of: {})", $value, [$($variant),+].join(", ")),
        }
    };
}
