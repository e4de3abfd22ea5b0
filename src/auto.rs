//! Automatic mode selection and output power-off

use tracing::{debug, info, warn};

use crate::backend::{ConnectionState, DisplayServer, OutputId, ScreenSize};
use crate::constants::physical::DPI_DISTANCE_SCALE;
use crate::error::TopologyError;
use crate::mode::{Mode, ModeId};
use crate::topology::{Output, Topology};

/// Pick the output's best mode: server-preferred modes score 0, others by
/// how far their DPI-implied height is from the screen's (or raw pixel
/// height when the output has no physical size). Ties go to the first.
pub fn preferred_mode(topology: &Topology, output: &Output, screen: &ScreenSize) -> Option<ModeId> {
    let mut best: Option<(ModeId, i64)> = None;
    for (index, id) in output.modes().iter().enumerate() {
        let Some(mode) = topology.mode(*id) else {
            debug!(output = %output.name(), mode = id, "skipping mode missing from mode table");
            continue;
        };
        let distance = mode_distance(index < output.preferred_count, mode, output, screen);
        if best.is_none_or(|(_, best_distance)| distance < best_distance) {
            best = Some((mode.id, distance));
        }
    }
    best.map(|(id, _)| id)
}

fn mode_distance(preferred: bool, mode: &Mode, output: &Output, screen: &ScreenSize) -> i64 {
    if preferred {
        return 0;
    }
    let (_, output_mm_height) = output.physical_size();
    let distance = if output_mm_height > 0 && screen.mm_height > 0 {
        DPI_DISTANCE_SCALE * screen.height as i64 / screen.mm_height as i64
            - DPI_DISTANCE_SCALE * mode.height as i64 / output_mm_height as i64
    } else {
        screen.height as i64 - mode.height as i64
    };
    distance.abs()
}

impl Topology {
    /// Let the best mode drive `output`. A disconnected output is re-probed
    /// first in case a monitor was plugged in since discovery. An unbound
    /// output takes the first idle controller, or, when none is idle and reuse
    /// is allowed, the first controller of the topology.
    ///
    /// Returns the chosen mode, or None when the output has no usable mode.
    pub fn auto_configure<S: DisplayServer + ?Sized>(
        &mut self,
        server: &mut S,
        output: OutputId,
    ) -> Result<Option<ModeId>, TopologyError> {
        let index = self.output_slot(output)?;
        if self.outputs[index].connection == ConnectionState::Disconnected {
            self.reprobe_output(server, index)?;
        }
        let Some(mode) = preferred_mode(self, &self.outputs[index], &self.screen) else {
            info!(output = %self.outputs[index].name(), "no usable mode for output");
            return Ok(None);
        };

        let slot = match self.outputs[index].controller {
            Some(slot) => slot,
            None => {
                let slot = self.find_usable_controller(index)?;
                self.bind(index, slot);
                slot
            }
        };
        let controller = &mut self.controllers[slot.0];
        controller.mode = Some(mode);
        controller.dirty = true;
        let crtc = controller.id();
        self.outputs[index].set_auto();
        info!(
            output = %self.outputs[index].name(),
            crtc,
            mode = %self.mode_display_name(mode),
            "auto-configured output"
        );
        Ok(Some(mode))
    }

    /// Switch `output` off. Its controller is released here and disabled on
    /// the next apply once nothing is bound to it.
    pub fn power_off(&mut self, output: OutputId) -> Result<(), TopologyError> {
        let index = self.output_slot(output)?;
        self.unbind(index);
        self.outputs[index].set_off();
        info!(output = %self.outputs[index].name(), "output switched off");
        Ok(())
    }

    fn reprobe_output<S: DisplayServer + ?Sized>(
        &mut self,
        server: &mut S,
        index: usize,
    ) -> Result<(), TopologyError> {
        let id = self.outputs[index].id();
        let resources = server.screen_resources()?;
        let state = server.output_info(id, resources.config_timestamp)?;
        if state.connection == ConnectionState::Disconnected {
            debug!(output = %self.outputs[index].name(), "output still disconnected");
            return Ok(());
        }

        info!(output = %state.name, modes = state.modes.len(), "output connected since discovery");
        self.config_timestamp = resources.config_timestamp;
        for info in resources.modes {
            self.insert_mode(Mode::from(info));
        }
        let output = &mut self.outputs[index];
        output.connection = state.connection;
        output.modes = state.modes;
        output.preferred_count = state.preferred_count;
        output.mm_width = state.mm_width;
        output.mm_height = state.mm_height;
        if output.modes.is_empty() {
            warn!(output = %output.name(), "connected output reports no modes");
        }
        Ok(())
    }
}
