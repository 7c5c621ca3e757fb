//! Process-global configuration shared by string registers and the shim
//! generator.
//!
//! The string buffer size bounds every string and string-queue wire frame.
//! It is set once at session startup (before any register is constructed)
//! from the `GOTHON_STRING_MAX_SIZE` environment variable and read by any
//! thread afterwards, so an atomic is sufficient.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::error::{Error, Result};

/// Environment variable that overrides the string buffer size.
pub const STRING_MAX_SIZE_ENV: &str = "GOTHON_STRING_MAX_SIZE";

/// Environment variable that, when set to `true`, preserves the `.gothon/`
/// staging directory after the session ends.
pub const KEEP_TEMP_DIR_ENV: &str = "GOTHON_KEEP_TEMP_DIR";

/// Default maximum size in bytes of a string value on the wire.
pub const DEFAULT_STRING_BUFFER_SIZE: u32 = 65_536;

// 0 means "unset, use the default" so tests can override and restore.
static STRING_BUFFER_SIZE: AtomicU32 = AtomicU32::new(0);

/// Returns the configured string buffer size, or the default when unset.
pub fn string_buffer_size() -> u32 {
    let configured = STRING_BUFFER_SIZE.load(Ordering::Relaxed);
    if configured != 0 {
        configured
    } else {
        DEFAULT_STRING_BUFFER_SIZE
    }
}

/// Sets the string buffer size. Passing 0 resets to the default.
pub fn set_string_buffer_size(value: u32) {
    STRING_BUFFER_SIZE.store(value, Ordering::Relaxed);
}

/// Applies `GOTHON_STRING_MAX_SIZE` if present. A present-but-malformed
/// value is a configuration error rather than a silent fallback.
pub fn configure_from_env() -> Result<()> {
    if let Ok(raw) = std::env::var(STRING_MAX_SIZE_ENV) {
        let size: u32 = raw.parse().map_err(|_| {
            Error::Config(format!("{STRING_MAX_SIZE_ENV} must be an integer, got `{raw}`"))
        })?;
        set_string_buffer_size(size);
    }
    Ok(())
}

/// Returns `true` when the staging directory should be kept after the run.
pub fn keep_temp_dir() -> bool {
    std::env::var(KEEP_TEMP_DIR_ENV)
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}
