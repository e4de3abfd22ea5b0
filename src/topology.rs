//! In-memory model of one screen's outputs, controllers and modes
//!
//! Controllers and outputs live in arenas owned by [`Topology`]. An output
//! refers to its controller by arena slot, never by reference, and every
//! server identifier resolves through an id -> slot map.

use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::backend::{
    ConfigTimestamp, ConnectionState, CrtcId, CrtcState, DisplayServer, OutputId, OutputState,
    ScreenSize, SizeRange,
};
use crate::constants::names::{UNKNOWN_MODE, UNKNOWN_OUTPUT};
use crate::error::TopologyError;
use crate::mode::{Mode, ModeId, Rotation, RotationSet};

/// Arena index of a controller inside its topology
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct Slot(pub(crate) usize);

/// A hardware pipe driving zero or more outputs
#[derive(Debug, Clone, Serialize)]
pub struct Controller {
    id: CrtcId,
    pub(crate) x: i32,
    pub(crate) y: i32,
    pub(crate) mode: Option<ModeId>,
    pub(crate) rotation: Rotation,
    rotations: RotationSet,
    pub(crate) bound_outputs: usize,
    #[serde(skip)]
    pub(crate) dirty: bool,
}

impl Controller {
    fn from_state(id: CrtcId, state: &CrtcState) -> Self {
        Self {
            id,
            x: state.x as i32,
            y: state.y as i32,
            mode: state.mode,
            rotation: state.rotation,
            rotations: state.rotations,
            bound_outputs: state.outputs.len(),
            dirty: false,
        }
    }

    pub fn id(&self) -> CrtcId {
        self.id
    }

    pub fn position(&self) -> (i32, i32) {
        (self.x, self.y)
    }

    pub fn mode(&self) -> Option<ModeId> {
        self.mode
    }

    pub fn rotation(&self) -> Rotation {
        self.rotation
    }

    pub fn rotations(&self) -> RotationSet {
        self.rotations
    }

    pub fn bound_outputs(&self) -> usize {
        self.bound_outputs
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Has a mode and something to show it on. Screen sizing counts only
    /// active controllers, so one whose outputs were all switched off no
    /// longer widens the screen while it still carries its old mode.
    pub fn is_active(&self) -> bool {
        self.mode.is_some() && self.bound_outputs > 0
    }
}

/// A physical connector
#[derive(Debug, Clone, Serialize)]
pub struct Output {
    id: OutputId,
    name: String,
    pub(crate) connection: ConnectionState,
    pub(crate) modes: Vec<ModeId>,
    pub(crate) preferred_count: usize,
    pub(crate) mm_width: u32,
    pub(crate) mm_height: u32,
    #[serde(skip)]
    pub(crate) controller: Option<Slot>,
    auto: bool,
    off: bool,
}

impl Output {
    fn from_state(id: OutputId, state: OutputState, controller: Option<Slot>) -> Self {
        Self {
            id,
            name: state.name,
            connection: state.connection,
            modes: state.modes,
            preferred_count: state.preferred_count,
            mm_width: state.mm_width,
            mm_height: state.mm_height,
            off: controller.is_none(),
            controller,
            auto: false,
        }
    }

    pub fn id(&self) -> OutputId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn connection(&self) -> ConnectionState {
        self.connection
    }

    pub fn modes(&self) -> &[ModeId] {
        &self.modes
    }

    /// True when the server flags `mode` as preferred for this output
    pub fn is_preferred(&self, mode: ModeId) -> bool {
        self.modes
            .iter()
            .take(self.preferred_count)
            .any(|m| *m == mode)
    }

    pub fn physical_size(&self) -> (u32, u32) {
        (self.mm_width, self.mm_height)
    }

    pub fn is_auto(&self) -> bool {
        self.auto
    }

    pub fn is_off(&self) -> bool {
        self.off
    }

    pub fn is_bound(&self) -> bool {
        self.controller.is_some()
    }

    /// `auto` and `off` are exclusive; setting one clears the other
    pub(crate) fn set_auto(&mut self) {
        self.auto = true;
        self.off = false;
    }

    pub(crate) fn set_off(&mut self) {
        self.off = true;
        self.auto = false;
    }

    /// User picked an explicit mode
    pub(crate) fn set_manual(&mut self) {
        self.auto = false;
        self.off = false;
    }
}

/// Which outputs a listing should include
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFilter {
    All,
    /// Not reported disconnected
    Connected,
    /// Driven by a controller and not reported disconnected
    On,
}

/// What to do when auto-configuration finds no idle controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ControllerReuse {
    /// Take over the first controller regardless of its load
    #[default]
    Allow,
    /// Refuse and report `NoUsableController`
    Deny,
}

/// View-driving selection, stored as identifiers and resolved on demand
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Selection {
    pub output: Option<OutputId>,
    pub controller: Option<CrtcId>,
}

/// All outputs, controllers and modes of one screen
#[derive(Debug)]
pub struct Topology {
    pub(crate) config_timestamp: ConfigTimestamp,
    modes: Vec<Mode>,
    mode_index: HashMap<ModeId, usize>,
    pub(crate) controllers: Vec<Controller>,
    controller_index: HashMap<CrtcId, usize>,
    pub(crate) outputs: Vec<Output>,
    output_index: HashMap<OutputId, usize>,
    range: SizeRange,
    /// Server screen size as of discovery or the last successful resize
    pub(crate) screen: ScreenSize,
    primary: Option<CrtcId>,
    selection: Selection,
    clone_mode: bool,
    controller_reuse: ControllerReuse,
}

impl Topology {
    /// Read the live configuration. Only fails when the server cannot be
    /// queried at all; idle controllers and disconnected outputs are fine.
    pub fn discover<S: DisplayServer + ?Sized>(server: &mut S) -> Result<Self, TopologyError> {
        let resources = server.screen_resources().map_err(TopologyError::Discovery)?;
        let range = server.screen_size_range().map_err(TopologyError::Discovery)?;
        let screen = server.screen_size().map_err(TopologyError::Discovery)?;
        let ts = resources.config_timestamp;

        let modes: Vec<Mode> = resources.modes.into_iter().map(Mode::from).collect();
        let mode_index = modes.iter().enumerate().map(|(i, m)| (m.id, i)).collect();

        let mut controllers = Vec::with_capacity(resources.crtcs.len());
        for crtc in &resources.crtcs {
            let state = server.crtc_info(*crtc, ts).map_err(TopologyError::Discovery)?;
            debug!(crtc, x = state.x, y = state.y, mode = ?state.mode, rotation = %state.rotation, outputs = state.outputs.len(), "discovered controller");
            controllers.push(Controller::from_state(*crtc, &state));
        }
        let controller_index: HashMap<CrtcId, usize> = controllers
            .iter()
            .enumerate()
            .map(|(i, c)| (c.id, i))
            .collect();

        let mut outputs = Vec::with_capacity(resources.outputs.len());
        for output in &resources.outputs {
            let state = server.output_info(*output, ts).map_err(TopologyError::Discovery)?;
            let slot = state
                .crtc
                .and_then(|crtc| controller_index.get(&crtc))
                .map(|i| Slot(*i));
            debug!(output, name = %state.name, connection = ?state.connection, modes = state.modes.len(), "discovered output");
            outputs.push(Output::from_state(*output, state, slot));
        }
        let output_index = outputs.iter().enumerate().map(|(i, o)| (o.id, i)).collect();

        let first_output = outputs.first();
        let selection = Selection {
            output: first_output.map(|o| o.id),
            controller: first_output
                .and_then(|o| o.controller)
                .map(|slot| controllers[slot.0].id),
        };
        if first_output.is_none() {
            warn!("server reported no outputs");
        }

        info!(
            controllers = controllers.len(),
            outputs = outputs.len(),
            modes = modes.len(),
            width = screen.width,
            height = screen.height,
            "discovered display topology"
        );

        Ok(Self {
            config_timestamp: ts,
            modes,
            mode_index,
            controllers,
            controller_index,
            outputs,
            output_index,
            range,
            screen,
            primary: selection.controller,
            selection,
            clone_mode: false,
            controller_reuse: ControllerReuse::default(),
        })
    }

    /// Re-discover from the server, keeping selection, primary and policy
    /// flags whose identifiers still exist
    pub fn refresh<S: DisplayServer + ?Sized>(&mut self, server: &mut S) -> Result<(), TopologyError> {
        let mut fresh = Self::discover(server)?;
        if let Some(output) = self.selection.output
            && fresh.output_index.contains_key(&output)
        {
            fresh.selection.output = Some(output);
            fresh.selection.controller = fresh.controller_of(output).map(|c| c.id);
        }
        if let Some(primary) = self.primary
            && fresh.controller_index.contains_key(&primary)
        {
            fresh.primary = Some(primary);
        }
        fresh.clone_mode = self.clone_mode;
        fresh.controller_reuse = self.controller_reuse;
        *self = fresh;
        Ok(())
    }

    // ---- lookups -------------------------------------------------------

    pub fn modes(&self) -> &[Mode] {
        &self.modes
    }

    pub fn mode(&self, id: ModeId) -> Option<&Mode> {
        self.mode_index.get(&id).map(|i| &self.modes[*i])
    }

    pub fn controllers(&self) -> &[Controller] {
        &self.controllers
    }

    pub fn controller(&self, id: CrtcId) -> Option<&Controller> {
        self.controller_index.get(&id).map(|i| &self.controllers[*i])
    }

    pub fn outputs(&self) -> &[Output] {
        &self.outputs
    }

    pub fn output(&self, id: OutputId) -> Option<&Output> {
        self.output_index.get(&id).map(|i| &self.outputs[*i])
    }

    pub fn output_by_name(&self, name: &str) -> Option<&Output> {
        self.outputs.iter().find(|o| o.name == name)
    }

    pub fn output_name(&self, id: OutputId) -> &str {
        self.output(id).map_or(UNKNOWN_OUTPUT, |o| o.name())
    }

    /// Controller currently driving `output`, if any
    pub fn controller_of(&self, output: OutputId) -> Option<&Controller> {
        self.output(output)
            .and_then(|o| o.controller)
            .map(|slot| &self.controllers[slot.0])
    }

    /// Outputs bound to `crtc`, in discovery order
    pub fn outputs_of(&self, crtc: CrtcId) -> Vec<OutputId> {
        match self.controller_slot(crtc) {
            Ok(slot) => self.outputs_in_slot(slot),
            Err(_) => Vec::new(),
        }
    }

    pub fn outputs_matching(&self, filter: OutputFilter) -> impl Iterator<Item = &Output> {
        self.outputs.iter().filter(move |o| match filter {
            OutputFilter::All => true,
            OutputFilter::Connected => o.connection != ConnectionState::Disconnected,
            OutputFilter::On => o.controller.is_some() && o.connection != ConnectionState::Disconnected,
        })
    }

    pub fn size_range(&self) -> SizeRange {
        self.range
    }

    /// Server screen size as of discovery or the last apply
    pub fn screen_size(&self) -> ScreenSize {
        self.screen
    }

    pub fn mode_display_name(&self, id: ModeId) -> String {
        self.mode(id)
            .map_or_else(|| UNKNOWN_MODE.to_string(), |m| m.display_name())
    }

    /// Modes of `output` that every other output on the same controller also
    /// supports, since one controller drives all its outputs with one mode.
    /// An unbound output is unconstrained.
    pub fn compatible_modes(&self, output: OutputId) -> Result<Vec<ModeId>, TopologyError> {
        let target = self.output(output).ok_or(TopologyError::UnknownOutput(output))?;
        let Some(slot) = target.controller else {
            return Ok(target.modes.clone());
        };
        let siblings: Vec<&Output> = self
            .outputs
            .iter()
            .filter(|o| o.id != output && o.controller == Some(slot))
            .collect();
        Ok(target
            .modes
            .iter()
            .copied()
            .filter(|mode| siblings.iter().all(|o| o.modes.contains(mode)))
            .collect())
    }

    /// Look a mode up among the output's modes by server name, taking the
    /// closest refresh rate when one is given and the first match otherwise
    pub fn find_mode(&self, output: OutputId, name: &str, refresh: Option<f64>) -> Option<ModeId> {
        let target = self.output(output)?;
        let mut candidates = target
            .modes
            .iter()
            .filter_map(|id| self.mode(*id))
            .filter(|mode| mode.name == name);
        match refresh {
            None => candidates.next().map(|mode| mode.id),
            Some(rate) => candidates
                .min_by(|a, b| {
                    (a.refresh_rate() - rate)
                        .abs()
                        .total_cmp(&(b.refresh_rate() - rate).abs())
                })
                .map(|mode| mode.id),
        }
    }

    /// Effective on-screen size of the output's controller, 0x0 when off
    pub fn output_footprint(&self, output: OutputId) -> (u32, u32) {
        self.output(output)
            .and_then(|o| o.controller)
            .and_then(|slot| self.footprint(&self.controllers[slot.0]))
            .unwrap_or((0, 0))
    }

    pub(crate) fn footprint(&self, controller: &Controller) -> Option<(u32, u32)> {
        let mode = self.mode(controller.mode?)?;
        Some((
            mode.effective_width(controller.rotation),
            mode.effective_height(controller.rotation),
        ))
    }

    // ---- selection & flags --------------------------------------------

    pub fn select_output(&mut self, output: OutputId) -> Result<(), TopologyError> {
        if !self.output_index.contains_key(&output) {
            return Err(TopologyError::UnknownOutput(output));
        }
        self.selection = Selection {
            output: Some(output),
            controller: self.controller_of(output).map(|c| c.id),
        };
        Ok(())
    }

    pub fn selection(&self) -> Selection {
        self.selection
    }

    pub fn selected_output(&self) -> Option<&Output> {
        self.selection.output.and_then(|id| self.output(id))
    }

    pub fn selected_controller(&self) -> Option<&Controller> {
        self.selection.controller.and_then(|id| self.controller(id))
    }

    pub fn primary(&self) -> Option<CrtcId> {
        self.primary
    }

    pub fn set_primary(&mut self, crtc: CrtcId) -> Result<(), TopologyError> {
        self.controller_slot(crtc)?;
        self.primary = Some(crtc);
        Ok(())
    }

    /// Clone placement is recorded but not used by layout or apply
    pub fn clone_mode(&self) -> bool {
        self.clone_mode
    }

    pub fn set_clone_mode(&mut self, clone: bool) {
        self.clone_mode = clone;
    }

    pub fn controller_reuse(&self) -> ControllerReuse {
        self.controller_reuse
    }

    pub fn set_controller_reuse(&mut self, policy: ControllerReuse) {
        self.controller_reuse = policy;
    }

    // ---- mutation ------------------------------------------------------

    pub fn set_rotation(&mut self, crtc: CrtcId, rotation: Rotation) -> Result<(), TopologyError> {
        let slot = self.controller_slot(crtc)?;
        let controller = &mut self.controllers[slot.0];
        if !controller.rotations.contains(rotation) {
            return Err(TopologyError::UnsupportedRotation { crtc, rotation });
        }
        if controller.rotation != rotation {
            controller.rotation = rotation;
            controller.dirty = true;
        }
        Ok(())
    }

    pub fn set_mode(&mut self, crtc: CrtcId, mode: ModeId) -> Result<(), TopologyError> {
        let slot = self.controller_slot(crtc)?;
        if !self.mode_index.contains_key(&mode) {
            return Err(TopologyError::UnknownMode(mode));
        }
        let controller = &mut self.controllers[slot.0];
        controller.mode = Some(mode);
        controller.dirty = true;
        Ok(())
    }

    /// Set an explicit mode for `output`, binding it to a controller first if
    /// it is off. Returns the controller that will drive it.
    pub fn set_output_mode(&mut self, output: OutputId, mode: ModeId) -> Result<CrtcId, TopologyError> {
        let index = self.output_slot(output)?;
        if !self.mode_index.contains_key(&mode) {
            return Err(TopologyError::UnknownMode(mode));
        }
        let slot = match self.outputs[index].controller {
            Some(slot) => slot,
            None => {
                let slot = self.find_usable_controller(index)?;
                self.bind(index, slot);
                slot
            }
        };
        let crtc = self.controllers[slot.0].id;
        self.set_mode(crtc, mode)?;
        self.outputs[index].set_manual();
        Ok(crtc)
    }

    // ---- crate internals ----------------------------------------------

    pub(crate) fn controller_slot(&self, crtc: CrtcId) -> Result<Slot, TopologyError> {
        self.controller_index
            .get(&crtc)
            .map(|i| Slot(*i))
            .ok_or(TopologyError::UnknownController(crtc))
    }

    pub(crate) fn output_slot(&self, output: OutputId) -> Result<usize, TopologyError> {
        self.output_index
            .get(&output)
            .copied()
            .ok_or(TopologyError::UnknownOutput(output))
    }

    pub(crate) fn outputs_in_slot(&self, slot: Slot) -> Vec<OutputId> {
        self.outputs
            .iter()
            .filter(|o| o.controller == Some(slot))
            .map(|o| o.id)
            .collect()
    }

    /// First idle controller in discovery order, else the first controller
    /// when reuse is allowed
    pub(crate) fn find_usable_controller(&self, output: usize) -> Result<Slot, TopologyError> {
        if let Some(i) = self.controllers.iter().position(|c| c.bound_outputs == 0) {
            return Ok(Slot(i));
        }
        let name = self.outputs[output].name.clone();
        match (self.controller_reuse, self.controllers.is_empty()) {
            (ControllerReuse::Allow, false) => {
                // Takes the controller over from whatever output it drives now
                warn!(output = %name, crtc = self.controllers[0].id, "no idle controller, reusing the first one");
                Ok(Slot(0))
            }
            _ => Err(TopologyError::NoUsableController { output: name }),
        }
    }

    pub(crate) fn bind(&mut self, output: usize, slot: Slot) {
        self.unbind(output);
        self.outputs[output].controller = Some(slot);
        let controller = &mut self.controllers[slot.0];
        controller.bound_outputs += 1;
        controller.dirty = true;
        if self.selection.output == Some(self.outputs[output].id) {
            self.selection.controller = Some(controller.id);
        }
    }

    pub(crate) fn unbind(&mut self, output: usize) {
        if let Some(slot) = self.outputs[output].controller.take() {
            let controller = &mut self.controllers[slot.0];
            controller.bound_outputs = controller.bound_outputs.saturating_sub(1);
            controller.dirty = true;
            if self.selection.output == Some(self.outputs[output].id) {
                self.selection.controller = None;
            }
        }
    }

    /// Add a mode the server announced after discovery
    pub(crate) fn insert_mode(&mut self, mode: Mode) {
        if !self.mode_index.contains_key(&mode.id) {
            self.mode_index.insert(mode.id, self.modes.len());
            self.modes.push(mode);
        }
    }

    pub(crate) fn set_screen(&mut self, screen: ScreenSize) {
        self.screen = screen;
    }
}
