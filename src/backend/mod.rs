//! Transport to the display server's output-configuration protocol
//!
//! The core never talks to X directly; it goes through [`DisplayServer`],
//! which mirrors the handful of RandR 1.2 round-trips the editor needs.
//! [`X11Server`] is the real implementation.

use anyhow::Result;
use serde::Serialize;

use crate::mode::{Mode, ModeId, Rotation, RotationSet};

mod x11;
pub use x11::X11Server;

#[cfg(test)]
pub(crate) mod memory;

pub type CrtcId = u32;
pub type OutputId = u32;

/// Configuration timestamp handed back with every config-changing request
pub type ConfigTimestamp = u32;

/// Mode table entry as read from the server
#[derive(Debug, Clone, PartialEq)]
pub struct ModeInfo {
    pub id: ModeId,
    pub name: String,
    pub width: u16,
    pub height: u16,
    pub dot_clock: u32,
    pub htotal: u16,
    pub vtotal: u16,
}

impl From<ModeInfo> for Mode {
    fn from(info: ModeInfo) -> Self {
        Mode {
            id: info.id,
            name: info.name,
            width: info.width,
            height: info.height,
            dot_clock: info.dot_clock,
            htotal: info.htotal,
            vtotal: info.vtotal,
        }
    }
}

/// Snapshot of "get resources"
#[derive(Debug, Clone, Default)]
pub struct ScreenResources {
    pub config_timestamp: ConfigTimestamp,
    pub crtcs: Vec<CrtcId>,
    pub outputs: Vec<OutputId>,
    pub modes: Vec<ModeInfo>,
}

/// Live state of one controller
#[derive(Debug, Clone, PartialEq)]
pub struct CrtcState {
    pub x: i16,
    pub y: i16,
    pub mode: Option<ModeId>,
    pub rotation: Rotation,
    pub rotations: RotationSet,
    pub outputs: Vec<OutputId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Connected,
    Disconnected,
    Unknown,
}

/// Live state of one output
#[derive(Debug, Clone, PartialEq)]
pub struct OutputState {
    pub name: String,
    pub connection: ConnectionState,
    pub crtc: Option<CrtcId>,
    /// Supported modes; the first `preferred_count` entries are preferred
    pub modes: Vec<ModeId>,
    pub preferred_count: usize,
    pub mm_width: u32,
    pub mm_height: u32,
}

/// Screen pixel and physical size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScreenSize {
    pub width: u16,
    pub height: u16,
    pub mm_width: u32,
    pub mm_height: u32,
}

/// Server-advertised screen size bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SizeRange {
    pub min_width: u16,
    pub min_height: u16,
    pub max_width: u16,
    pub max_height: u16,
}

/// One atomic controller-configuration request. No mode and no outputs
/// disables the controller.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CrtcConfig {
    pub x: i16,
    pub y: i16,
    pub mode: Option<ModeId>,
    pub rotation: Rotation,
    pub outputs: Vec<OutputId>,
}

impl CrtcConfig {
    pub fn disabled() -> Self {
        Self {
            x: 0,
            y: 0,
            mode: None,
            rotation: Rotation::Normal,
            outputs: Vec::new(),
        }
    }
}

/// Reply status of a controller-configuration request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigStatus {
    Success,
    InvalidConfigTime,
    InvalidTime,
    Failed,
}

impl std::fmt::Display for ConfigStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            ConfigStatus::Success => "success",
            ConfigStatus::InvalidConfigTime => "invalid config time",
            ConfigStatus::InvalidTime => "invalid time",
            ConfigStatus::Failed => "failed",
        };
        f.write_str(text)
    }
}

/// The display server's output-configuration protocol, one screen at a time
pub trait DisplayServer {
    /// Controllers, outputs and the mode catalogue (re-probes hardware)
    fn screen_resources(&mut self) -> Result<ScreenResources>;

    fn screen_size_range(&mut self) -> Result<SizeRange>;

    /// Current screen size as known to this connection
    fn screen_size(&mut self) -> Result<ScreenSize>;

    /// Current screen size read through a newly opened connection, so no
    /// cached connection state is involved
    fn fresh_screen_size(&mut self) -> Result<ScreenSize>;

    fn crtc_info(&mut self, crtc: CrtcId, timestamp: ConfigTimestamp) -> Result<CrtcState>;

    fn output_info(&mut self, output: OutputId, timestamp: ConfigTimestamp) -> Result<OutputState>;

    fn set_crtc_config(
        &mut self,
        crtc: CrtcId,
        timestamp: ConfigTimestamp,
        config: &CrtcConfig,
    ) -> Result<ConfigStatus>;

    fn set_screen_size(&mut self, size: &ScreenSize) -> Result<()>;
}
