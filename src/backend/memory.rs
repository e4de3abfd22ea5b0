//! In-memory display server used by the unit tests. Records every
//! configuration request so ordering can be asserted.

use anyhow::{Result, bail};
use std::collections::{HashMap, HashSet};

use super::{
    ConfigStatus, ConfigTimestamp, ConnectionState, CrtcConfig, CrtcId, CrtcState, DisplayServer,
    ModeInfo, OutputId, OutputState, ScreenResources, ScreenSize, SizeRange,
};
use crate::mode::{ModeId, Rotation, RotationSet};

#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    SetCrtc(CrtcId, CrtcConfig),
    SetScreenSize(ScreenSize),
}

pub struct MemoryServer {
    pub config_timestamp: ConfigTimestamp,
    pub crtc_order: Vec<CrtcId>,
    pub output_order: Vec<OutputId>,
    pub modes: Vec<ModeInfo>,
    pub crtcs: HashMap<CrtcId, CrtcState>,
    pub outputs: HashMap<OutputId, OutputState>,
    pub size: ScreenSize,
    pub range: SizeRange,
    pub requests: Vec<Request>,
    /// Controllers whose configuration requests come back `Failed`
    pub rejected: HashSet<CrtcId>,
    pub resource_reads: usize,
    pub broken: bool,
}

impl MemoryServer {
    pub fn new(width: u16, height: u16) -> Self {
        Self {
            config_timestamp: 42,
            crtc_order: Vec::new(),
            output_order: Vec::new(),
            modes: Vec::new(),
            crtcs: HashMap::new(),
            outputs: HashMap::new(),
            // 96 dpi: 1920 px == 508 mm
            size: ScreenSize {
                width,
                height,
                mm_width: (width as u32 * 254) / 960,
                mm_height: (height as u32 * 254) / 960,
            },
            range: SizeRange {
                min_width: 320,
                min_height: 200,
                max_width: 8192,
                max_height: 8192,
            },
            requests: Vec::new(),
            rejected: HashSet::new(),
            resource_reads: 0,
            broken: false,
        }
    }

    pub fn with_mode(mut self, mode: crate::mode::Mode) -> Self {
        self.modes.push(ModeInfo {
            id: mode.id,
            name: mode.name,
            width: mode.width,
            height: mode.height,
            dot_clock: mode.dot_clock,
            htotal: mode.htotal,
            vtotal: mode.vtotal,
        });
        self
    }

    pub fn with_crtc(mut self, id: CrtcId) -> Self {
        self.crtc_order.push(id);
        self.crtcs.insert(
            id,
            CrtcState {
                x: 0,
                y: 0,
                mode: None,
                rotation: Rotation::Normal,
                rotations: RotationSet::all(),
                outputs: Vec::new(),
            },
        );
        self
    }

    pub fn with_output(mut self, id: OutputId, name: &str, modes: &[ModeId], preferred_count: usize) -> Self {
        self.output_order.push(id);
        self.outputs.insert(
            id,
            OutputState {
                name: name.to_string(),
                connection: ConnectionState::Connected,
                crtc: None,
                modes: modes.to_vec(),
                preferred_count,
                mm_width: 0,
                mm_height: 0,
            },
        );
        self
    }

    /// Drive `output` from `crtc` at the given mode and position
    pub fn with_binding(mut self, output: OutputId, crtc: CrtcId, mode: ModeId, x: i16, y: i16) -> Self {
        if let Some(state) = self.crtcs.get_mut(&crtc) {
            state.mode = Some(mode);
            state.x = x;
            state.y = y;
            state.outputs.push(output);
        }
        if let Some(state) = self.outputs.get_mut(&output) {
            state.crtc = Some(crtc);
        }
        self
    }

    pub fn with_connection(mut self, output: OutputId, connection: ConnectionState) -> Self {
        if let Some(state) = self.outputs.get_mut(&output) {
            state.connection = connection;
        }
        self
    }

    pub fn crtc_requests(&self) -> Vec<(CrtcId, CrtcConfig)> {
        self.requests
            .iter()
            .filter_map(|r| match r {
                Request::SetCrtc(id, config) => Some((*id, config.clone())),
                _ => None,
            })
            .collect()
    }

    fn mode(&self, id: ModeId) -> Option<&ModeInfo> {
        self.modes.iter().find(|m| m.id == id)
    }
}

impl DisplayServer for MemoryServer {
    fn screen_resources(&mut self) -> Result<ScreenResources> {
        if self.broken {
            bail!("connection closed");
        }
        self.resource_reads += 1;
        Ok(ScreenResources {
            config_timestamp: self.config_timestamp,
            crtcs: self.crtc_order.clone(),
            outputs: self.output_order.clone(),
            modes: self.modes.clone(),
        })
    }

    fn screen_size_range(&mut self) -> Result<SizeRange> {
        Ok(self.range)
    }

    fn screen_size(&mut self) -> Result<ScreenSize> {
        Ok(self.size)
    }

    fn fresh_screen_size(&mut self) -> Result<ScreenSize> {
        Ok(self.size)
    }

    fn crtc_info(&mut self, crtc: CrtcId, _timestamp: ConfigTimestamp) -> Result<CrtcState> {
        match self.crtcs.get(&crtc) {
            Some(state) => Ok(state.clone()),
            None => bail!("BadCrtc {}", crtc),
        }
    }

    fn output_info(&mut self, output: OutputId, _timestamp: ConfigTimestamp) -> Result<OutputState> {
        match self.outputs.get(&output) {
            Some(state) => Ok(state.clone()),
            None => bail!("BadOutput {}", output),
        }
    }

    fn set_crtc_config(
        &mut self,
        crtc: CrtcId,
        _timestamp: ConfigTimestamp,
        config: &CrtcConfig,
    ) -> Result<ConfigStatus> {
        self.requests.push(Request::SetCrtc(crtc, config.clone()));
        if self.rejected.contains(&crtc) {
            return Ok(ConfigStatus::Failed);
        }
        let Some(state) = self.crtcs.get_mut(&crtc) else {
            bail!("BadCrtc {}", crtc);
        };
        state.x = config.x;
        state.y = config.y;
        state.mode = config.mode;
        state.rotation = config.rotation;
        state.outputs = config.outputs.clone();
        for (id, output) in self.outputs.iter_mut() {
            if config.outputs.contains(id) {
                output.crtc = Some(crtc);
            } else if output.crtc == Some(crtc) {
                output.crtc = None;
            }
        }
        Ok(ConfigStatus::Success)
    }

    fn set_screen_size(&mut self, size: &ScreenSize) -> Result<()> {
        self.requests.push(Request::SetScreenSize(*size));
        for (id, state) in &self.crtcs {
            let Some(mode) = state.mode.and_then(|m| self.mode(m)) else {
                continue;
            };
            let (w, h) = if state.rotation.swaps_axes() {
                (mode.height, mode.width)
            } else {
                (mode.width, mode.height)
            };
            if state.x as i32 + w as i32 > size.width as i32 || state.y as i32 + h as i32 > size.height as i32 {
                bail!("BadMatch: CRTC {} does not fit in {}x{}", id, size.width, size.height);
            }
        }
        self.size = *size;
        Ok(())
    }
}
