//! Application-wide constants
//!
//! Protocol bit values, formatting strings and config locations used
//! throughout the crate, kept in one place.

/// RandR protocol constants
pub mod randr {
    /// Minimum RandR version providing CRTC/output configuration (1.2)
    pub const MIN_MAJOR_VERSION: u32 = 1;
    pub const MIN_MINOR_VERSION: u32 = 2;

    /// Rotation bits as they appear on the wire
    pub const ROTATE_0: u16 = 1 << 0;
    pub const ROTATE_90: u16 = 1 << 1;
    pub const ROTATE_180: u16 = 1 << 2;
    pub const ROTATE_270: u16 = 1 << 3;

    /// Mask selecting the rotation bits (reflection lives above these)
    pub const ROTATION_MASK: u16 = 0xf;
}

/// Physical size conversion constants
pub mod physical {
    /// Millimetres per inch
    pub const MM_PER_INCH: f64 = 25.4;

    /// DPI assumed when the server reports a zero physical height
    pub const FALLBACK_DPI: f64 = 96.0;

    /// Fixed-point scale used by the preferred-mode DPI distance
    pub const DPI_DISTANCE_SCALE: i64 = 1000;
}

/// Display strings
pub mod names {
    /// Rendered for a mode identifier missing from the mode table
    pub const UNKNOWN_MODE: &str = "Unknown mode";

    /// Rendered for an output identifier missing from the topology
    pub const UNKNOWN_OUTPUT: &str = "Unknown";
}

/// Configuration file constants
pub mod config {
    /// Application directory name under the XDG config dir
    pub const APP_DIR: &str = "randr-layout";

    /// Config file name
    pub const FILENAME: &str = "config.toml";

    /// Env var overriding the configured log level
    pub const LOG_LEVEL_ENV: &str = "LOG_LEVEL";

    /// Env var overriding the configured X display
    pub const DISPLAY_ENV: &str = "RANDR_LAYOUT_DISPLAY";

    /// Log levels accepted in the config file
    pub const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];
}
