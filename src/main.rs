#![forbid(unsafe_code)]

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use serde::Serialize;
use tracing::{error, info, warn};
use tracing_subscriber::FmtSubscriber;

use randr_layout::backend::{ConnectionState, CrtcId, OutputId};
use randr_layout::config;
use randr_layout::{
    ApplyError, OutputFilter, Rotation, Settings, Topology, X11Server, Zone, ZoneMap, apply, plan,
};

/// Arrange RandR outputs around a center zone
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// X display to use instead of the configured one
    #[arg(long, global = true)]
    display: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// List outputs, their controllers and compatible modes
    List {
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
        /// Include disconnected outputs
        #[arg(long)]
        all: bool,
    },

    /// Edit the live configuration and commit it
    Apply(ApplyArgs),
}

#[derive(clap::Args, Debug, Default, PartialEq)]
struct ApplyArgs {
    #[arg(long, value_name = "OUTPUT")]
    left: Vec<String>,
    #[arg(long, value_name = "OUTPUT")]
    right: Vec<String>,
    #[arg(long, value_name = "OUTPUT")]
    above: Vec<String>,
    #[arg(long, value_name = "OUTPUT")]
    below: Vec<String>,
    #[arg(long, value_name = "OUTPUT")]
    center: Vec<String>,

    /// Explicit mode, e.g. DP-1=1920x1080@60
    #[arg(long = "mode", value_name = "OUTPUT=MODE[@RATE]")]
    modes: Vec<String>,

    /// Rotation: normal, left, inverted or right
    #[arg(long = "rotate", value_name = "OUTPUT=ROTATION")]
    rotations: Vec<String>,

    /// Let the output pick its preferred mode
    #[arg(long, value_name = "OUTPUT")]
    auto: Vec<String>,

    #[arg(long, value_name = "OUTPUT")]
    off: Vec<String>,

    #[arg(long, value_name = "OUTPUT")]
    primary: Option<String>,

    /// Print what would be sent instead of applying it
    #[arg(long)]
    dry_run: bool,

    /// With --dry-run, print the plan as JSON
    #[arg(long, requires = "dry_run")]
    json: bool,
}

#[derive(Serialize)]
struct OutputReport<'a> {
    name: &'a str,
    connection: ConnectionState,
    crtc: Option<CrtcId>,
    position: Option<(i32, i32)>,
    rotation: Option<Rotation>,
    mode: Option<String>,
    primary: bool,
    modes: Vec<ModeReport>,
}

#[derive(Serialize)]
struct ModeReport {
    name: String,
    current: bool,
    preferred: bool,
}

fn report(topology: &Topology, filter: OutputFilter) -> Result<Vec<OutputReport<'_>>> {
    let mut reports = Vec::new();
    for output in topology.outputs_matching(filter) {
        let controller = topology.controller_of(output.id());
        let current = controller.and_then(|c| c.mode());
        let modes = topology
            .compatible_modes(output.id())?
            .into_iter()
            .map(|id| ModeReport {
                name: topology.mode_display_name(id),
                current: current == Some(id),
                preferred: output.is_preferred(id),
            })
            .collect();
        reports.push(OutputReport {
            name: output.name(),
            connection: output.connection(),
            crtc: controller.map(|c| c.id()),
            position: controller.map(|c| c.position()),
            rotation: controller.map(|c| c.rotation()),
            mode: current.map(|id| topology.mode_display_name(id)),
            primary: controller.is_some_and(|c| topology.primary() == Some(c.id())),
            modes,
        });
    }
    Ok(reports)
}

fn print_reports(reports: &[OutputReport<'_>]) {
    for output in reports {
        let state = match (&output.mode, output.position, output.rotation) {
            (Some(mode), Some((x, y)), Some(rotation)) => format!("{mode} +{x}+{y} {rotation}"),
            _ => "off".to_string(),
        };
        let connection = match output.connection {
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Unknown => "unknown",
        };
        let primary = if output.primary { " primary" } else { "" };
        println!("{} {} {}{}", output.name, connection, state, primary);
        for mode in &output.modes {
            let current = if mode.current { "*" } else { " " };
            let preferred = if mode.preferred { "+" } else { " " };
            println!("    {}{}{}", mode.name, current, preferred);
        }
    }
}

fn output_id(topology: &Topology, name: &str) -> Result<OutputId> {
    topology
        .output_by_name(name)
        .map(|o| o.id())
        .ok_or_else(|| anyhow!("No output named '{}'", name))
}

/// Split `OUTPUT=VALUE`
fn split_assignment(arg: &str) -> Result<(&str, &str)> {
    arg.split_once('=')
        .map(|(name, value)| (name.trim(), value.trim()))
        .filter(|(name, value)| !name.is_empty() && !value.is_empty())
        .ok_or_else(|| anyhow!("Expected OUTPUT=VALUE, got '{}'", arg))
}

/// Split `MODE[@RATE]`
fn split_mode(value: &str) -> Result<(&str, Option<f64>)> {
    match value.split_once('@') {
        None => Ok((value, None)),
        Some((name, rate)) => {
            let rate = rate
                .trim_end_matches("Hz")
                .parse::<f64>()
                .context(format!("Invalid refresh rate '{}'", rate))?;
            Ok((name, Some(rate)))
        }
    }
}

fn edit(
    topology: &mut Topology,
    zones: &mut ZoneMap,
    server: &mut X11Server,
    args: &ApplyArgs,
    settings: &Settings,
) -> Result<()> {
    for name in &args.off {
        let id = output_id(topology, name)?;
        topology.power_off(id)?;
        zones.remove_output(id);
    }

    for name in &args.auto {
        let id = output_id(topology, name)?;
        match topology.auto_configure(server, id)? {
            Some(_) if zones.zone_of(id).is_none() => zones.move_output(id, settings.default_zone),
            Some(_) => {}
            None => warn!(output = %name, "no usable mode, leaving output as it is"),
        }
    }

    for arg in &args.modes {
        let (name, value) = split_assignment(arg)?;
        let id = output_id(topology, name)?;
        let (mode_name, rate) = split_mode(value)?;
        let mode = topology
            .find_mode(id, mode_name, rate)
            .ok_or_else(|| anyhow!("Output {} has no mode '{}'", name, value))?;
        topology.set_output_mode(id, mode)?;
        if zones.zone_of(id).is_none() {
            zones.move_output(id, settings.default_zone);
        }
    }

    for arg in &args.rotations {
        let (name, value) = split_assignment(arg)?;
        let id = output_id(topology, name)?;
        let rotation: Rotation = value.parse()?;
        let crtc = topology
            .controller_of(id)
            .map(|c| c.id())
            .ok_or_else(|| anyhow!("Output {} is off, give it a mode first", name))?;
        topology.set_rotation(crtc, rotation)?;
    }

    let placements = [
        (Zone::Left, &args.left),
        (Zone::Right, &args.right),
        (Zone::Above, &args.above),
        (Zone::Below, &args.below),
        (Zone::Center, &args.center),
    ];
    for (zone, names) in placements {
        for name in names {
            zones.move_output(output_id(topology, name)?, zone);
        }
    }

    if let Some(name) = &args.primary {
        let id = output_id(topology, name)?;
        let crtc = topology
            .controller_of(id)
            .map(|c| c.id())
            .ok_or_else(|| anyhow!("Output {} is off and cannot be primary", name))?;
        topology.set_primary(crtc)?;
    }
    Ok(())
}

fn run_apply(server: &mut X11Server, args: &ApplyArgs, settings: &Settings) -> Result<(), Box<dyn std::error::Error>> {
    let mut topology = Topology::discover(server)?;
    topology.set_controller_reuse(settings.controller_reuse());
    let mut zones = ZoneMap::initial(&topology);
    edit(&mut topology, &mut zones, server, args, settings)?;

    if args.dry_run {
        let plan = plan(&mut topology, &zones)?;
        if args.json {
            println!("{}", serde_json::to_string_pretty(&plan)?);
            return Ok(());
        }
        let screen = plan.screen;
        println!(
            "screen {}x{} ({}x{} mm)",
            screen.width, screen.height, screen.mm_width, screen.mm_height
        );
        for (crtc, config) in &plan.controllers {
            match config.mode {
                Some(mode) if !config.outputs.is_empty() => {
                    let outputs: Vec<&str> = config.outputs.iter().map(|o| topology.output_name(*o)).collect();
                    println!(
                        "crtc {}: {} +{}+{} {} -> {}",
                        crtc,
                        topology.mode_display_name(mode),
                        config.x,
                        config.y,
                        config.rotation,
                        outputs.join(", ")
                    );
                }
                _ => println!("crtc {}: disabled", crtc),
            }
        }
        return Ok(());
    }

    match apply(&mut topology, &zones, server) {
        Ok(()) => {
            let screen = topology.screen_size();
            info!(width = screen.width, height = screen.height, "layout applied");
            Ok(())
        }
        Err(err) => {
            for failure in err.controller_failures() {
                error!(crtc = failure.crtc, reason = %failure.reason, "controller not configured");
            }
            if let ApplyError::Oversize(oversize) = &err {
                error!(%oversize, "layout does not fit the screen");
            }
            Err(err.into())
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Config warnings need a subscriber before the configured level is known
    let bootstrap = FmtSubscriber::builder()
        .with_max_level(config::bootstrap_level())
        .finish();
    let mut settings = tracing::subscriber::with_default(bootstrap, Settings::load)?;
    if cli.display.is_some() {
        settings.display = cli.display.clone();
    }

    let subscriber = FmtSubscriber::builder()
        .with_max_level(settings.trace_level())
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut server = X11Server::connect(settings.display.as_deref())?;

    match &cli.command {
        Commands::List { json, all } => {
            let topology = Topology::discover(&mut server)?;
            let filter = if *all { OutputFilter::All } else { OutputFilter::Connected };
            let reports = report(&topology, filter)?;
            if *json {
                println!("{}", serde_json::to_string_pretty(&reports)?);
            } else {
                print_reports(&reports);
            }
        }
        Commands::Apply(args) => {
            if args == &ApplyArgs::default() {
                return Err("Nothing to do; pass at least one placement or output option".into());
            }
            run_apply(&mut server, args, &settings)?;
        }
    }
    Ok(())
}
