use tracing::{debug, warn};

use crate::backend::ScreenSize;
use crate::constants::physical::{FALLBACK_DPI, MM_PER_INCH};
use crate::error::{Axis, OversizeError};
use crate::topology::Topology;

/// Bounding box of every active controller's footprint, clamped up to the
/// server minimum. Physical size keeps the server's current DPI unless the
/// pixel size is unchanged, in which case the current millimetres are reused.
pub fn resolve_screen_size(topology: &Topology) -> Result<ScreenSize, OversizeError> {
    let mut max_width: u32 = 0;
    let mut max_height: u32 = 0;
    // Moded controllers with nothing bound are disabled by apply; skip them
    for controller in topology.controllers().iter().filter(|c| c.is_active()) {
        let Some((w, h)) = topology.footprint(controller) else {
            warn!(crtc = controller.id(), mode = ?controller.mode(), "controller mode missing from mode table");
            continue;
        };
        let (x, y) = controller.position();
        max_width = max_width.max((x.max(0) as u32).saturating_add(w));
        max_height = max_height.max((y.max(0) as u32).saturating_add(h));
    }

    let range = topology.size_range();
    let width = clamp_axis(Axis::Width, max_width, range.min_width, range.max_width)?;
    let height = clamp_axis(Axis::Height, max_height, range.min_height, range.max_height)?;

    let current = topology.screen_size();
    let (mm_width, mm_height) = if width == current.width && height == current.height {
        (current.mm_width, current.mm_height)
    } else {
        let dpi = if current.height > 0 && current.mm_height > 0 {
            MM_PER_INCH * current.height as f64 / current.mm_height as f64
        } else {
            FALLBACK_DPI
        };
        (
            (MM_PER_INCH * width as f64 / dpi) as u32,
            (MM_PER_INCH * height as f64 / dpi) as u32,
        )
    };

    debug!(width, height, mm_width, mm_height, "resolved screen size");
    Ok(ScreenSize {
        width,
        height,
        mm_width,
        mm_height,
    })
}

fn clamp_axis(axis: Axis, requested: u32, min: u16, max: u16) -> Result<u16, OversizeError> {
    if requested > max as u32 {
        warn!(%axis, requested, max, "requested screen size exceeds server maximum");
        return Err(OversizeError { axis, requested, max });
    }
    // requested <= max fits in u16
    Ok((requested as u16).max(min))
}
