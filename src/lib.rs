//! RandR output topology: discovery, five-zone layout and ordered apply

#![forbid(unsafe_code)]

pub mod apply;
pub mod auto;
pub mod backend;
pub mod config;
pub mod constants;
pub mod error;
pub mod layout;
pub mod mode;
pub mod screen_size;
pub mod topology;

pub use apply::{ApplyPlan, apply, plan};
pub use auto::preferred_mode;
pub use backend::{DisplayServer, X11Server};
pub use config::Settings;
pub use error::{ApplyError, OversizeError, TopologyError};
pub use layout::{Zone, ZoneMap};
pub use mode::{Mode, ModeId, Rotation};
pub use screen_size::resolve_screen_size;
pub use topology::{Controller, ControllerReuse, Output, OutputFilter, Topology};
