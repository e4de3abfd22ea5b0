//! Five-zone relative placement
//!
//! Outputs are dropped into LEFT, RIGHT, ABOVE, BELOW or CENTER. Zones tile
//! around CENTER without overlapping; outputs sharing a zone share its origin.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

use crate::backend::{CrtcId, OutputId};
use crate::topology::{OutputFilter, Topology};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Zone {
    Left,
    Right,
    Above,
    Below,
    #[serde(alias = "centre")]
    Center,
}

impl Zone {
    /// Placement order; a controller listed in several zones ends up at the
    /// origin of the last one
    pub const ALL: [Zone; 5] = [Zone::Left, Zone::Right, Zone::Above, Zone::Below, Zone::Center];

    fn index(self) -> usize {
        match self {
            Zone::Left => 0,
            Zone::Right => 1,
            Zone::Above => 2,
            Zone::Below => 3,
            Zone::Center => 4,
        }
    }
}

impl fmt::Display for Zone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Zone::Left => "left",
            Zone::Right => "right",
            Zone::Above => "above",
            Zone::Below => "below",
            Zone::Center => "center",
        };
        f.write_str(name)
    }
}

impl FromStr for Zone {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "left" => Ok(Zone::Left),
            "right" => Ok(Zone::Right),
            "above" => Ok(Zone::Above),
            "below" => Ok(Zone::Below),
            "center" | "centre" => Ok(Zone::Center),
            other => anyhow::bail!("Unknown zone '{}' (expected left, right, above, below or center)", other),
        }
    }
}

/// Zone -> outputs assignment, fed by the editor's drag-and-drop
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ZoneMap {
    zones: [Vec<OutputId>; 5],
}

impl ZoneMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every lit output in CENTER, the arrangement the editor opens with
    pub fn initial(topology: &Topology) -> Self {
        let mut map = Self::new();
        for output in topology.outputs_matching(OutputFilter::On) {
            map.zones[Zone::Center.index()].push(output.id());
        }
        map
    }

    pub fn outputs_in(&self, zone: Zone) -> &[OutputId] {
        &self.zones[zone.index()]
    }

    pub fn zone_of(&self, output: OutputId) -> Option<Zone> {
        Zone::ALL
            .into_iter()
            .find(|zone| self.zones[zone.index()].contains(&output))
    }

    /// Drop `output` into `zone`, removing it from wherever it was
    pub fn move_output(&mut self, output: OutputId, zone: Zone) {
        self.remove_output(output);
        self.zones[zone.index()].push(output);
    }

    pub fn remove_output(&mut self, output: OutputId) {
        for members in &mut self.zones {
            members.retain(|o| *o != output);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.zones.iter().all(Vec::is_empty)
    }
}

/// Bounding box of one zone
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ZoneExtent {
    pub width: u32,
    pub height: u32,
}

/// Result of one layout pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LayoutPlan {
    pub origins: Vec<(Zone, i32, i32)>,
    /// Target position per controller, in assignment order
    pub positions: Vec<(CrtcId, i32, i32)>,
}

impl LayoutPlan {
    pub fn origin(&self, zone: Zone) -> (i32, i32) {
        self.origins
            .iter()
            .find(|(z, _, _)| *z == zone)
            .map_or((0, 0), |(_, x, y)| (*x, *y))
    }

    pub fn position_of(&self, crtc: CrtcId) -> Option<(i32, i32)> {
        self.positions
            .iter()
            .rev()
            .find(|(c, _, _)| *c == crtc)
            .map(|(_, x, y)| (*x, *y))
    }
}

/// Max effective width/height over a zone's members
pub fn zone_extent(topology: &Topology, zones: &ZoneMap, zone: Zone) -> ZoneExtent {
    zones
        .outputs_in(zone)
        .iter()
        .map(|output| topology.output_footprint(*output))
        .fold(ZoneExtent::default(), |acc, (w, h)| ZoneExtent {
            width: acc.width.max(w),
            height: acc.height.max(h),
        })
}

/// Compute zone origins and controller targets without touching the topology
pub fn compute_layout(topology: &Topology, zones: &ZoneMap) -> LayoutPlan {
    let extents: HashMap<Zone, ZoneExtent> = Zone::ALL
        .into_iter()
        .map(|zone| (zone, zone_extent(topology, zones, zone)))
        .collect();
    let width = |zone: Zone| extents[&zone].width as i32;
    let height = |zone: Zone| extents[&zone].height as i32;

    let center_x = width(Zone::Left);
    let right_x = center_x + width(Zone::Above).max(width(Zone::Center)).max(width(Zone::Below));
    let center_y = height(Zone::Above);
    let below_y = center_y + height(Zone::Left).max(height(Zone::Center)).max(height(Zone::Right));

    let origin = |zone: Zone| match zone {
        Zone::Left => (0, center_y),
        Zone::Right => (right_x, center_y),
        Zone::Above => (center_x, 0),
        Zone::Below => (center_x, below_y),
        Zone::Center => (center_x, center_y),
    };

    let mut positions = Vec::new();
    for zone in Zone::ALL {
        let (x, y) = origin(zone);
        for output in zones.outputs_in(zone) {
            // Off outputs have no controller to move
            if let Some(controller) = topology.controller_of(*output) {
                positions.push((controller.id(), x, y));
            }
        }
    }

    LayoutPlan {
        origins: Zone::ALL
            .into_iter()
            .map(|zone| {
                let (x, y) = origin(zone);
                (zone, x, y)
            })
            .collect(),
        positions,
    }
}

impl Topology {
    /// Run the layout and move every zoned controller to its target.
    /// Controllers outside every zone keep their position.
    pub fn run_layout(&mut self, zones: &ZoneMap) -> LayoutPlan {
        let plan = compute_layout(self, zones);
        for (crtc, x, y) in &plan.positions {
            let Ok(slot) = self.controller_slot(*crtc) else {
                continue;
            };
            let controller = &mut self.controllers[slot.0];
            if controller.x != *x || controller.y != *y {
                debug!(crtc, from_x = controller.x, from_y = controller.y, x, y, "moving controller");
                controller.x = *x;
                controller.y = *y;
                controller.dirty = true;
            }
        }
        plan
    }
}
