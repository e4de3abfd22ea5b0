//! Display timings and rotation geometry

use serde::Serialize;
use std::fmt;
use std::str::FromStr;

use crate::constants::randr::{ROTATE_0, ROTATE_90, ROTATE_180, ROTATE_270, ROTATION_MASK};

/// Server-assigned mode identifier
pub type ModeId = u32;

/// Controller rotation. Reflection bits are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Rotation {
    #[default]
    Normal,
    Left,
    Inverted,
    Right,
}

impl Rotation {
    pub const ALL: [Rotation; 4] = [
        Rotation::Normal,
        Rotation::Left,
        Rotation::Inverted,
        Rotation::Right,
    ];

    /// Counter-clockwise rotation in degrees
    pub fn degrees(self) -> u16 {
        match self {
            Rotation::Normal => 0,
            Rotation::Left => 90,
            Rotation::Inverted => 180,
            Rotation::Right => 270,
        }
    }

    pub fn bits(self) -> u16 {
        match self {
            Rotation::Normal => ROTATE_0,
            Rotation::Left => ROTATE_90,
            Rotation::Inverted => ROTATE_180,
            Rotation::Right => ROTATE_270,
        }
    }

    /// Decode the rotation part of a wire rotation value.
    /// Returns None unless exactly one rotation bit is set.
    pub fn from_bits(bits: u16) -> Option<Self> {
        match bits & ROTATION_MASK {
            ROTATE_0 => Some(Rotation::Normal),
            ROTATE_90 => Some(Rotation::Left),
            ROTATE_180 => Some(Rotation::Inverted),
            ROTATE_270 => Some(Rotation::Right),
            _ => None,
        }
    }

    /// True when width and height trade places
    pub fn swaps_axes(self) -> bool {
        matches!(self, Rotation::Left | Rotation::Right)
    }
}

impl fmt::Display for Rotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Rotation::Normal => "normal",
            Rotation::Left => "left",
            Rotation::Inverted => "inverted",
            Rotation::Right => "right",
        };
        f.write_str(name)
    }
}

impl FromStr for Rotation {
    type Err = anyhow::Error;

    /// Accepts xrandr-style names or degrees
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_lowercase();
        if let Some(rotation) = Rotation::ALL.into_iter().find(|r| r.to_string() == name) {
            return Ok(rotation);
        }
        name.parse::<u16>()
            .ok()
            .and_then(|degrees| Rotation::ALL.into_iter().find(|r| r.degrees() == degrees))
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "Unknown rotation '{}' (expected normal, left, inverted, right or 0/90/180/270)",
                    name
                )
            })
    }
}

/// Set of rotations a controller supports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotationSet(u16);

impl RotationSet {
    pub fn from_bits(bits: u16) -> Self {
        Self(bits & ROTATION_MASK)
    }

    pub fn all() -> Self {
        Self(ROTATION_MASK)
    }

    pub fn bits(self) -> u16 {
        self.0
    }

    pub fn contains(self, rotation: Rotation) -> bool {
        self.0 & rotation.bits() != 0
    }

    pub fn iter(self) -> impl Iterator<Item = Rotation> {
        Rotation::ALL.into_iter().filter(move |r| self.contains(*r))
    }
}

impl Default for RotationSet {
    fn default() -> Self {
        Self(ROTATE_0)
    }
}

impl Serialize for RotationSet {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_seq(self.iter())
    }
}

/// A display timing from the server's mode table. Immutable once discovered.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Mode {
    pub id: ModeId,
    pub name: String,
    pub width: u16,
    pub height: u16,
    pub dot_clock: u32,
    pub htotal: u16,
    pub vtotal: u16,
}

impl Mode {
    /// Refresh rate in Hz; 0 for malformed timings with a zero total
    pub fn refresh_rate(&self) -> f64 {
        if self.htotal == 0 || self.vtotal == 0 {
            return 0.0;
        }
        self.dot_clock as f64 / (self.htotal as f64 * self.vtotal as f64)
    }

    pub fn effective_width(&self, rotation: Rotation) -> u32 {
        if rotation.swaps_axes() {
            self.height as u32
        } else {
            self.width as u32
        }
    }

    pub fn effective_height(&self, rotation: Rotation) -> u32 {
        if rotation.swaps_axes() {
            self.width as u32
        } else {
            self.height as u32
        }
    }

    /// `"<name>  <rate>Hz"` with the rate right-aligned in six columns
    pub fn display_name(&self) -> String {
        format!("{}{:6.1}Hz", self.name, self.refresh_rate())
    }
}

#[cfg(test)]
pub(crate) fn test_mode(id: ModeId, width: u16, height: u16, hz: u32) -> Mode {
    // Round totals so the refresh rate comes out exact
    let htotal = width + 160;
    let vtotal = height + 40;
    Mode {
        id,
        name: format!("{width}x{height}"),
        width,
        height,
        dot_clock: htotal as u32 * vtotal as u32 * hz,
        htotal,
        vtotal,
    }
}
