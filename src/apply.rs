//! Commit a topology to the display server
//!
//! Order matters: the layout and screen size are resolved before anything is
//! sent, controllers that would hang off the new screen are switched off, the
//! screen is resized, and only then is every controller programmed. Controller
//! failures in the last step are collected instead of aborting the batch.

use anyhow::Context;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::backend::{ConfigStatus, CrtcConfig, CrtcId, DisplayServer, ScreenSize};
use crate::error::{ApplyError, ControllerFailure, FailureReason, OversizeError};
use crate::layout::{LayoutPlan, ZoneMap};
use crate::mode::Rotation;
use crate::screen_size::resolve_screen_size;
use crate::topology::{Slot, Topology};

/// Everything apply would send, in order
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApplyPlan {
    pub layout: LayoutPlan,
    pub screen: ScreenSize,
    pub controllers: Vec<(CrtcId, CrtcConfig)>,
}

/// Run the layout and resolve the screen size and per-controller requests.
/// Controller positions in `topology` are updated; the server is not touched.
pub fn plan(topology: &mut Topology, zones: &ZoneMap) -> Result<ApplyPlan, OversizeError> {
    let layout = topology.run_layout(zones);
    let screen = resolve_screen_size(topology)?;
    let topology = &*topology;
    let controllers = topology
        .controllers()
        .iter()
        .enumerate()
        .map(|(i, c)| (c.id(), target_config(topology, Slot(i))))
        .collect();
    Ok(ApplyPlan {
        layout,
        screen,
        controllers,
    })
}

fn target_config(topology: &Topology, slot: Slot) -> CrtcConfig {
    let controller = &topology.controllers[slot.0];
    if controller.bound_outputs == 0 {
        return CrtcConfig::disabled();
    }
    CrtcConfig {
        x: clamp_position(controller.x),
        y: clamp_position(controller.y),
        mode: controller.mode,
        rotation: controller.rotation,
        outputs: topology.outputs_in_slot(slot),
    }
}

fn clamp_position(value: i32) -> i16 {
    value.clamp(i16::MIN as i32, i16::MAX as i32) as i16
}

/// Commit `topology`, laid out by `zones`, to the server.
///
/// Oversize layouts are refused before any request is made. Once the screen
/// has been resized every controller is attempted; the ones the server
/// refused come back as [`ApplyError::Controllers`].
pub fn apply<S: DisplayServer + ?Sized>(
    topology: &mut Topology,
    zones: &ZoneMap,
    server: &mut S,
) -> Result<(), ApplyError> {
    if topology.clone_mode() {
        warn!("clone mode is not implemented, using the zone layout");
    }
    let plan = plan(topology, zones)?;
    disable_out_of_bounds(topology, server, &plan.screen)?;
    commit_screen_size(topology, server, plan.screen)?;

    let failures = commit_controllers(topology, server, plan.controllers);
    if !failures.is_empty() {
        return Err(ApplyError::Controllers(failures));
    }
    info!(
        width = plan.screen.width,
        height = plan.screen.height,
        controllers = topology.controllers.len(),
        "configuration applied"
    );
    Ok(())
}

/// Switch off every live controller whose current footprint would not fit in
/// `screen`; the server refuses to shrink the screen under a lit controller.
fn disable_out_of_bounds<S: DisplayServer + ?Sized>(
    topology: &Topology,
    server: &mut S,
    screen: &ScreenSize,
) -> Result<(), ApplyError> {
    let ts = topology.config_timestamp;
    for controller in topology.controllers() {
        let crtc = controller.id();
        let live = server
            .crtc_info(crtc, ts)
            .context(format!("Failed to read controller {}", crtc))?;
        let Some(mode_id) = live.mode else {
            continue;
        };
        let Some(mode) = topology.mode(mode_id) else {
            warn!(crtc, mode = mode_id, "live mode missing from mode table");
            continue;
        };
        let right = live.x.max(0) as u32 + mode.effective_width(live.rotation);
        let bottom = live.y.max(0) as u32 + mode.effective_height(live.rotation);
        if right <= screen.width as u32 && bottom <= screen.height as u32 {
            continue;
        }

        debug!(crtc, right, bottom, "disabling controller ahead of screen resize");
        let status = server
            .set_crtc_config(crtc, ts, &CrtcConfig::disabled())
            .context(format!("Failed to disable controller {}", crtc))?;
        if status != ConfigStatus::Success {
            error!(crtc, %status, "controller refused to be disabled");
            return Err(ApplyError::ShrinkRejected(ControllerFailure {
                crtc,
                reason: FailureReason::Status(status),
            }));
        }
    }
    Ok(())
}

fn commit_screen_size<S: DisplayServer + ?Sized>(
    topology: &mut Topology,
    server: &mut S,
    screen: ScreenSize,
) -> Result<(), ApplyError> {
    let current = server
        .fresh_screen_size()
        .context("Failed to read the current screen size")?;
    if current == screen {
        debug!(width = screen.width, height = screen.height, "screen size unchanged");
    } else {
        info!(
            from_width = current.width,
            from_height = current.height,
            width = screen.width,
            height = screen.height,
            mm_width = screen.mm_width,
            mm_height = screen.mm_height,
            "resizing screen"
        );
        server
            .set_screen_size(&screen)
            .context(format!("Failed to resize screen to {}x{}", screen.width, screen.height))?;
    }
    topology.set_screen(screen);
    Ok(())
}

fn commit_controllers<S: DisplayServer + ?Sized>(
    topology: &mut Topology,
    server: &mut S,
    requests: Vec<(CrtcId, CrtcConfig)>,
) -> Vec<ControllerFailure> {
    let ts = topology.config_timestamp;
    let mut failures = Vec::new();
    for (index, (crtc, config)) in requests.into_iter().enumerate() {
        let controller = &mut topology.controllers[index];
        match server.set_crtc_config(crtc, ts, &config) {
            Ok(ConfigStatus::Success) => {
                debug!(crtc, x = config.x, y = config.y, mode = ?config.mode, outputs = config.outputs.len(), "controller configured");
                // Model follows the server only once the request took
                if controller.bound_outputs == 0 {
                    controller.mode = None;
                    controller.rotation = Rotation::Normal;
                }
                controller.dirty = false;
            }
            Ok(status) => {
                error!(crtc, %status, "controller rejected its configuration");
                failures.push(ControllerFailure {
                    crtc,
                    reason: FailureReason::Status(status),
                });
            }
            Err(e) => {
                error!(crtc, error = %format!("{:#}", e), "failed to configure controller");
                failures.push(ControllerFailure {
                    crtc,
                    reason: FailureReason::Transport(format!("{:#}", e)),
                });
            }
        }
    }
    failures
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::Request;
    use crate::error::Axis;
    use crate::layout::Zone;
    use crate::topology::fixtures::*;

    #[test]
    fn test_both_center_end_to_end() {
        let mut server = two_head_server();
        let mut topology = Topology::discover(&mut server).unwrap();
        let zones = ZoneMap::initial(&topology);

        apply(&mut topology, &zones, &mut server).unwrap();

        assert_eq!(topology.screen_size().width, 1920);
        assert_eq!(topology.screen_size().height, 1080);
        assert_eq!(topology.controller(CRTC_A).unwrap().position(), (0, 0));
        assert_eq!(topology.controller(CRTC_B).unwrap().position(), (0, 0));
        // Same pixel size: no resize request
        assert!(!server.requests.iter().any(|r| matches!(r, Request::SetScreenSize(_))));

        let sent = server.crtc_requests();
        assert_eq!(sent.len(), 3);
        assert_eq!(
            sent[0],
            (
                CRTC_A,
                CrtcConfig {
                    x: 0,
                    y: 0,
                    mode: Some(MODE_1080P),
                    rotation: Rotation::Normal,
                    outputs: vec![OUT_A],
                }
            )
        );
        assert_eq!(sent[1].1.outputs, vec![OUT_B]);
        assert_eq!(sent[2], (CRTC_C, CrtcConfig::disabled()));
        assert!(topology.controllers().iter().all(|c| !c.is_dirty()));
    }

    #[test]
    fn test_left_and_center_resizes_before_programming() {
        let mut server = two_head_server();
        let mut topology = Topology::discover(&mut server).unwrap();
        topology.set_mode(CRTC_A, MODE_SVGA).unwrap();
        topology.set_mode(CRTC_B, MODE_1080P).unwrap();
        let mut zones = ZoneMap::new();
        zones.move_output(OUT_A, Zone::Left);
        zones.move_output(OUT_B, Zone::Center);

        apply(&mut topology, &zones, &mut server).unwrap();

        assert!(matches!(
            server.requests[0],
            Request::SetScreenSize(ScreenSize {
                width: 2720,
                height: 1080,
                ..
            })
        ));
        assert_eq!((server.size.width, server.size.height), (2720, 1080));
        assert_eq!(server.crtcs[&CRTC_A].x, 0);
        assert_eq!(server.crtcs[&CRTC_B].x, 800);
        assert_eq!(server.crtcs[&CRTC_B].mode, Some(MODE_1080P));
        assert_eq!(topology.screen_size().width, 2720);
    }

    #[test]
    fn test_oversize_sends_nothing() {
        let mut server = two_head_server();
        server.range.max_width = 2000;
        let mut topology = Topology::discover(&mut server).unwrap();
        let mut zones = ZoneMap::new();
        zones.move_output(OUT_A, Zone::Left);
        zones.move_output(OUT_B, Zone::Center);

        let err = apply(&mut topology, &zones, &mut server).unwrap_err();
        match err {
            ApplyError::Oversize(e) => assert_eq!(e.axis, Axis::Width),
            other => panic!("unexpected error: {other}"),
        }
        assert!(server.requests.is_empty());
        assert_eq!(topology.screen_size().width, 1920);
    }

    #[test]
    fn test_shrink_disables_out_of_bounds_controller_first() {
        let mut server = two_head_server();
        server.size.width = 3200;
        server.crtcs.get_mut(&CRTC_B).unwrap().x = 1920;
        let mut topology = Topology::discover(&mut server).unwrap();
        let zones = ZoneMap::initial(&topology);

        apply(&mut topology, &zones, &mut server).unwrap();

        assert_eq!(server.requests[0], Request::SetCrtc(CRTC_B, CrtcConfig::disabled()));
        assert!(matches!(
            server.requests[1],
            Request::SetScreenSize(ScreenSize {
                width: 1920,
                height: 1080,
                ..
            })
        ));
        assert_eq!(server.requests.len(), 5);
        // B comes back at the origin
        assert_eq!(server.crtcs[&CRTC_B].x, 0);
        assert_eq!(server.crtcs[&CRTC_B].mode, Some(MODE_SXGA));
    }

    #[test]
    fn test_shrink_rejected_aborts_before_resize() {
        let mut server = two_head_server();
        server.size.width = 3200;
        server.crtcs.get_mut(&CRTC_B).unwrap().x = 1920;
        server.rejected.insert(CRTC_B);
        let mut topology = Topology::discover(&mut server).unwrap();
        let zones = ZoneMap::initial(&topology);

        let err = apply(&mut topology, &zones, &mut server).unwrap_err();
        match err {
            ApplyError::ShrinkRejected(failure) => {
                assert_eq!(failure.crtc, CRTC_B);
                assert_eq!(failure.reason, FailureReason::Status(ConfigStatus::Failed));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(server.requests.len(), 1);
        assert_eq!(server.size.width, 3200);
    }

    #[test]
    fn test_rejected_controller_does_not_stop_the_batch() {
        let mut server = two_head_server();
        server.rejected.insert(CRTC_A);
        let mut topology = Topology::discover(&mut server).unwrap();
        topology.set_mode(CRTC_A, MODE_1080P).unwrap();
        topology.set_rotation(CRTC_B, Rotation::Inverted).unwrap();
        let zones = ZoneMap::initial(&topology);

        let err = apply(&mut topology, &zones, &mut server).unwrap_err();
        assert_eq!(
            err.controller_failures(),
            &[ControllerFailure {
                crtc: CRTC_A,
                reason: FailureReason::Status(ConfigStatus::Failed),
            }]
        );
        assert_eq!(server.crtc_requests().len(), 3);
        assert_eq!(server.crtcs[&CRTC_B].rotation, Rotation::Inverted);
        assert!(topology.controller(CRTC_A).unwrap().is_dirty());
        assert!(!topology.controller(CRTC_B).unwrap().is_dirty());
    }

    #[test]
    fn test_power_off_then_apply_disables_controller() {
        let mut server = two_head_server();
        let mut topology = Topology::discover(&mut server).unwrap();
        topology.set_rotation(CRTC_B, Rotation::Left).unwrap();
        topology.power_off(OUT_B).unwrap();
        let zones = ZoneMap::initial(&topology);
        assert_eq!(zones.zone_of(OUT_B), None);

        apply(&mut topology, &zones, &mut server).unwrap();

        let b = topology.controller(CRTC_B).unwrap();
        assert_eq!(b.mode(), None);
        assert_eq!(b.bound_outputs(), 0);
        assert_eq!(b.rotation(), Rotation::Normal);
        assert_eq!(server.crtcs[&CRTC_B].mode, None);
        assert!(server.crtcs[&CRTC_B].outputs.is_empty());
        assert_eq!(server.outputs[&OUT_B].crtc, None);
    }

    #[test]
    fn test_rejected_disable_keeps_model_mode() {
        let mut server = two_head_server();
        server.rejected.insert(CRTC_B);
        let mut topology = Topology::discover(&mut server).unwrap();
        topology.power_off(OUT_B).unwrap();
        let zones = ZoneMap::initial(&topology);

        let err = apply(&mut topology, &zones, &mut server).unwrap_err();
        assert_eq!(err.controller_failures().len(), 1);
        assert_eq!(err.controller_failures()[0].crtc, CRTC_B);

        // Server still lights B, and so does the model
        let b = topology.controller(CRTC_B).unwrap();
        assert_eq!(server.crtcs[&CRTC_B].mode, Some(MODE_SXGA));
        assert_eq!(b.mode(), Some(MODE_SXGA));
        assert_eq!(b.bound_outputs(), 0);
        assert!(b.is_dirty());
    }

    #[test]
    fn test_physical_size_change_alone_resizes() {
        let mut server = two_head_server();
        let mut topology = Topology::discover(&mut server).unwrap();
        server.size.mm_width = 600;
        let zones = ZoneMap::initial(&topology);

        apply(&mut topology, &zones, &mut server).unwrap();

        assert!(matches!(
            server.requests[0],
            Request::SetScreenSize(ScreenSize {
                width: 1920,
                height: 1080,
                mm_width: 508,
                mm_height: 285,
            })
        ));
        assert_eq!((server.size.mm_width, server.size.mm_height), (508, 285));
        assert_eq!(topology.screen_size().mm_width, 508);
    }

    #[test]
    fn test_auto_configured_output_is_programmed() {
        let mut server = two_head_server();
        let mut topology = Topology::discover(&mut server).unwrap();
        topology.auto_configure(&mut server, OUT_C).unwrap();
        let mut zones = ZoneMap::initial(&topology);
        zones.move_output(OUT_C, Zone::Right);

        apply(&mut topology, &zones, &mut server).unwrap();

        assert_eq!(server.crtcs[&CRTC_C].mode, Some(MODE_SVGA));
        assert_eq!(server.crtcs[&CRTC_C].outputs, vec![OUT_C]);
        assert_eq!(server.crtcs[&CRTC_C].x, 1920);
        assert_eq!(server.outputs[&OUT_C].crtc, Some(CRTC_C));
    }

    #[test]
    fn test_transport_failure_while_probing_aborts() {
        let mut server = two_head_server();
        let mut topology = Topology::discover(&mut server).unwrap();
        server.crtcs.remove(&CRTC_C);
        let zones = ZoneMap::initial(&topology);

        let err = apply(&mut topology, &zones, &mut server).unwrap_err();
        assert!(matches!(err, ApplyError::Transport(_)));
        assert!(server.requests.is_empty());
    }

    #[test]
    fn test_plan_does_not_touch_the_server() {
        let mut server = two_head_server();
        let mut topology = Topology::discover(&mut server).unwrap();
        let mut zones = ZoneMap::initial(&topology);
        zones.move_output(OUT_A, Zone::Above);

        let plan = plan(&mut topology, &zones).unwrap();
        assert_eq!((plan.screen.width, plan.screen.height), (1920, 2104));
        assert_eq!(plan.layout.position_of(CRTC_B), Some((0, 1080)));
        assert_eq!(plan.controllers.len(), 3);
        assert_eq!(plan.controllers[2].1, CrtcConfig::disabled());
        assert!(server.requests.is_empty());
    }

    #[test]
    fn test_clone_mode_falls_back_to_zones() {
        let mut server = two_head_server();
        let mut topology = Topology::discover(&mut server).unwrap();
        topology.set_clone_mode(true);
        let zones = ZoneMap::initial(&topology);
        apply(&mut topology, &zones, &mut server).unwrap();
        assert_eq!(server.crtc_requests().len(), 3);
    }
}
