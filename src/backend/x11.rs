use anyhow::{Context, Result};
use tracing::{debug, info, warn};
use x11rb::connection::Connection as _;
use x11rb::protocol::randr::{self, ConnectionExt as RandrExt};
use x11rb::protocol::xproto::Window;
use x11rb::rust_connection::RustConnection;

use super::{
    ConfigStatus, ConfigTimestamp, ConnectionState, CrtcConfig, CrtcId, CrtcState, DisplayServer,
    ModeInfo, OutputId, OutputState, ScreenResources, ScreenSize, SizeRange,
};
use crate::constants::randr::{MIN_MAJOR_VERSION, MIN_MINOR_VERSION};
use crate::mode::{Rotation, RotationSet};

/// RandR transport over an x11rb connection
pub struct X11Server {
    conn: RustConnection,
    screen_num: usize,
    root: Window,
    display_name: Option<String>,
}

impl X11Server {
    /// Connect to `display_name` (or `$DISPLAY`) and check RandR >= 1.2
    pub fn connect(display_name: Option<&str>) -> Result<Self> {
        let (conn, screen_num) = x11rb::connect(display_name)
            .context(format!("Failed to connect to X display {:?}", display_name))?;
        let root = conn.setup().roots[screen_num].root;

        let version = conn
            .randr_query_version(MIN_MAJOR_VERSION, MIN_MINOR_VERSION)
            .context("Failed to query RandR version")?
            .reply()
            .context("Failed to get reply for RandR version query. Is the RANDR extension available?")?;
        if (version.major_version, version.minor_version) < (MIN_MAJOR_VERSION, MIN_MINOR_VERSION) {
            anyhow::bail!(
                "RandR {}.{} is too old (need {}.{})",
                version.major_version,
                version.minor_version,
                MIN_MAJOR_VERSION,
                MIN_MINOR_VERSION
            );
        }
        info!(
            screen = screen_num,
            randr_major = version.major_version,
            randr_minor = version.minor_version,
            "connected to x11"
        );

        Ok(Self {
            conn,
            screen_num,
            root,
            display_name: display_name.map(str::to_string),
        })
    }

    fn size_from_setup(conn: &RustConnection, screen_num: usize) -> ScreenSize {
        let screen = &conn.setup().roots[screen_num];
        ScreenSize {
            width: screen.width_in_pixels,
            height: screen.height_in_pixels,
            mm_width: screen.width_in_millimeters as u32,
            mm_height: screen.height_in_millimeters as u32,
        }
    }
}

fn decode_rotation(bits: randr::Rotation) -> Rotation {
    let raw = u16::from(bits);
    Rotation::from_bits(raw).unwrap_or_else(|| {
        warn!(bits = raw, "server reported ambiguous rotation, assuming normal");
        Rotation::Normal
    })
}

fn decode_status(status: randr::SetConfig) -> ConfigStatus {
    match status {
        randr::SetConfig::SUCCESS => ConfigStatus::Success,
        randr::SetConfig::INVALID_CONFIG_TIME => ConfigStatus::InvalidConfigTime,
        randr::SetConfig::INVALID_TIME => ConfigStatus::InvalidTime,
        _ => ConfigStatus::Failed,
    }
}

/// Split the concatenated mode-name blob by each mode's `name_len`
fn decode_modes(modes: &[randr::ModeInfo], names: &[u8]) -> Vec<ModeInfo> {
    let mut offset = 0usize;
    modes
        .iter()
        .map(|mode| {
            let end = (offset + mode.name_len as usize).min(names.len());
            let name = String::from_utf8_lossy(&names[offset.min(end)..end]).into_owned();
            offset = end;
            ModeInfo {
                id: mode.id,
                name,
                width: mode.width,
                height: mode.height,
                dot_clock: mode.dot_clock,
                htotal: mode.htotal,
                vtotal: mode.vtotal,
            }
        })
        .collect()
}

impl DisplayServer for X11Server {
    #[tracing::instrument(skip(self))]
    fn screen_resources(&mut self) -> Result<ScreenResources> {
        let reply = self
            .conn
            .randr_get_screen_resources(self.root)
            .context("Failed to request RandR screen resources")?
            .reply()
            .context("Failed to get reply for RandR screen resources")?;
        debug!(
            crtcs = reply.crtcs.len(),
            outputs = reply.outputs.len(),
            modes = reply.modes.len(),
            "read screen resources"
        );
        Ok(ScreenResources {
            config_timestamp: reply.config_timestamp,
            modes: decode_modes(&reply.modes, &reply.names),
            crtcs: reply.crtcs,
            outputs: reply.outputs,
        })
    }

    #[tracing::instrument(skip(self))]
    fn screen_size_range(&mut self) -> Result<SizeRange> {
        let reply = self
            .conn
            .randr_get_screen_size_range(self.root)
            .context("Failed to request RandR screen size range")?
            .reply()
            .context("Failed to get reply for RandR screen size range")?;
        Ok(SizeRange {
            min_width: reply.min_width,
            min_height: reply.min_height,
            max_width: reply.max_width,
            max_height: reply.max_height,
        })
    }

    fn screen_size(&mut self) -> Result<ScreenSize> {
        Ok(Self::size_from_setup(&self.conn, self.screen_num))
    }

    #[tracing::instrument(skip(self))]
    fn fresh_screen_size(&mut self) -> Result<ScreenSize> {
        let (conn, screen_num) = x11rb::connect(self.display_name.as_deref())
            .context("Failed to open a second X connection to read the screen size")?;
        Ok(Self::size_from_setup(&conn, screen_num))
    }

    #[tracing::instrument(skip(self))]
    fn crtc_info(&mut self, crtc: CrtcId, timestamp: ConfigTimestamp) -> Result<CrtcState> {
        let reply = self
            .conn
            .randr_get_crtc_info(crtc, timestamp)
            .context(format!("Failed to request info for CRTC {}", crtc))?
            .reply()
            .context(format!("Failed to get reply for CRTC {} info", crtc))?;
        if reply.status != randr::SetConfig::SUCCESS {
            warn!(crtc, status = ?reply.status, "CRTC info reported a stale configuration");
        }
        Ok(CrtcState {
            x: reply.x,
            y: reply.y,
            mode: (reply.mode != x11rb::NONE).then_some(reply.mode),
            rotation: decode_rotation(reply.rotation),
            rotations: RotationSet::from_bits(u16::from(reply.rotations)),
            outputs: reply.outputs,
        })
    }

    #[tracing::instrument(skip(self))]
    fn output_info(&mut self, output: OutputId, timestamp: ConfigTimestamp) -> Result<OutputState> {
        let reply = self
            .conn
            .randr_get_output_info(output, timestamp)
            .context(format!("Failed to request info for output {}", output))?
            .reply()
            .context(format!("Failed to get reply for output {} info", output))?;
        let connection = match reply.connection {
            randr::Connection::CONNECTED => ConnectionState::Connected,
            randr::Connection::DISCONNECTED => ConnectionState::Disconnected,
            _ => ConnectionState::Unknown,
        };
        Ok(OutputState {
            name: String::from_utf8_lossy(&reply.name).into_owned(),
            connection,
            crtc: (reply.crtc != x11rb::NONE).then_some(reply.crtc),
            preferred_count: reply.num_preferred as usize,
            modes: reply.modes,
            mm_width: reply.mm_width,
            mm_height: reply.mm_height,
        })
    }

    #[tracing::instrument(skip(self, config))]
    fn set_crtc_config(
        &mut self,
        crtc: CrtcId,
        timestamp: ConfigTimestamp,
        config: &CrtcConfig,
    ) -> Result<ConfigStatus> {
        let reply = self
            .conn
            .randr_set_crtc_config(
                crtc,
                x11rb::CURRENT_TIME,
                timestamp,
                config.x,
                config.y,
                config.mode.unwrap_or(x11rb::NONE),
                randr::Rotation::from(config.rotation.bits()),
                &config.outputs,
            )
            .context(format!("Failed to send config for CRTC {}", crtc))?
            .reply()
            .context(format!("Failed to get reply for CRTC {} config", crtc))?;
        Ok(decode_status(reply.status))
    }

    #[tracing::instrument(skip(self))]
    fn set_screen_size(&mut self, size: &ScreenSize) -> Result<()> {
        self.conn
            .randr_set_screen_size(self.root, size.width, size.height, size.mm_width, size.mm_height)
            .context("Failed to send RandR screen size")?
            .check()
            .context(format!(
                "Server rejected screen size {}x{} ({}x{} mm)",
                size.width, size.height, size.mm_width, size.mm_height
            ))?;
        Ok(())
    }
}
