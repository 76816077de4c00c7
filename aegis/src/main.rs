use std::path::PathBuf;

use aegis::app::App;
use aegis::config::Settings;
use aegis::ipc::{subscribe_and_print, IpcClient};
use aegis_ipc::{Axis, EventKind, LayoutMode, MoveTarget, Request, Response};
use anyhow::{bail, Result};
use argh::FromArgs;
use tracing_subscriber::EnvFilter;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Aegis - window manager mirror and desktop signal daemon
#[derive(FromArgs)]
struct Cli {
    #[argh(subcommand)]
    command: Option<SubCommand>,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum SubCommand {
    Start(StartCmd),
    Version(VersionCmd),
    Spaces(SpacesCmd),
    Windows(WindowsCmd),
    FocusedSpace(FocusedSpaceCmd),
    FocusSpace(FocusSpaceCmd),
    FocusWindow(FocusWindowCmd),
    MoveWindow(MoveWindowCmd),
    CreateSpace(CreateSpaceCmd),
    DestroySpace(DestroySpaceCmd),
    Rotate(RotateCmd),
    Balance(BalanceCmd),
    Layout(LayoutCmd),
    Mirror(MirrorCmd),
    ToggleFloat(ToggleFloatCmd),
    StackAll(StackAllCmd),
    UnstackAll(UnstackAllCmd),
    Refresh(RefreshCmd),
    Volume(VolumeCmd),
    Brightness(BrightnessCmd),
    Subscribe(SubscribeCmd),
    Quit(QuitCmd),
}

/// Start the aegis daemon
#[derive(FromArgs)]
#[argh(subcommand, name = "start")]
struct StartCmd {
    /// path to a config file (default: ~/.config/aegis/config.json)
    #[argh(option)]
    config: Option<PathBuf>,
}

/// Show version information
#[derive(FromArgs)]
#[argh(subcommand, name = "version")]
struct VersionCmd {}

/// List spaces
#[derive(FromArgs)]
#[argh(subcommand, name = "spaces")]
struct SpacesCmd {}

/// List windows on a space in display order
#[derive(FromArgs)]
#[argh(subcommand, name = "windows")]
struct WindowsCmd {
    /// space index
    #[argh(positional)]
    space: u32,
}

/// Show the focused space
#[derive(FromArgs)]
#[argh(subcommand, name = "focused-space")]
struct FocusedSpaceCmd {}

/// Focus a space
#[derive(FromArgs)]
#[argh(subcommand, name = "focus-space")]
struct FocusSpaceCmd {
    /// space index
    #[argh(positional)]
    space: u32,
}

/// Focus a window
#[derive(FromArgs)]
#[argh(subcommand, name = "focus-window")]
struct FocusWindowCmd {
    /// window id
    #[argh(positional)]
    id: u64,
}

/// Move a window to a space, or stack/insert it next to another window
#[derive(FromArgs)]
#[argh(subcommand, name = "move-window")]
struct MoveWindowCmd {
    /// window id
    #[argh(positional)]
    id: u64,
    /// target space index
    #[argh(option)]
    space: Option<u32>,
    /// window to stack onto
    #[argh(option)]
    stack: Option<u64>,
    /// window to insert next to
    #[argh(option)]
    insert: Option<u64>,
}

/// Create a space
#[derive(FromArgs)]
#[argh(subcommand, name = "create-space")]
struct CreateSpaceCmd {}

/// Destroy a space
#[derive(FromArgs)]
#[argh(subcommand, name = "destroy-space")]
struct DestroySpaceCmd {
    /// space index
    #[argh(positional)]
    space: u32,
}

/// Rotate the focused space's layout tree
#[derive(FromArgs)]
#[argh(subcommand, name = "rotate")]
struct RotateCmd {
    /// degrees: 90, 180 or 270
    #[argh(positional)]
    degrees: u32,
}

/// Balance the focused space's layout tree
#[derive(FromArgs)]
#[argh(subcommand, name = "balance")]
struct BalanceCmd {}

/// Set the focused space's layout
#[derive(FromArgs)]
#[argh(subcommand, name = "layout")]
struct LayoutCmd {
    /// bsp or float
    #[argh(positional)]
    layout: String,
}

/// Mirror the focused space's layout tree
#[derive(FromArgs)]
#[argh(subcommand, name = "mirror")]
struct MirrorCmd {
    /// x or y
    #[argh(positional)]
    axis: String,
}

/// Toggle floating for a window
#[derive(FromArgs)]
#[argh(subcommand, name = "toggle-float")]
struct ToggleFloatCmd {
    /// window id
    #[argh(positional)]
    id: u64,
}

/// Stack every window of the focused space onto one
#[derive(FromArgs)]
#[argh(subcommand, name = "stack-all")]
struct StackAllCmd {}

/// Unstack every window of the focused space
#[derive(FromArgs)]
#[argh(subcommand, name = "unstack-all")]
struct UnstackAllCmd {}

/// Force a full refresh of spaces and windows
#[derive(FromArgs)]
#[argh(subcommand, name = "refresh")]
struct RefreshCmd {}

/// Set the output volume
#[derive(FromArgs)]
#[argh(subcommand, name = "volume")]
struct VolumeCmd {
    /// level between 0.0 and 1.0
    #[argh(positional)]
    level: f32,
}

/// Set the display brightness
#[derive(FromArgs)]
#[argh(subcommand, name = "brightness")]
struct BrightnessCmd {
    /// level between 0.0 and 1.0
    #[argh(positional)]
    level: f32,
}

/// Stream events as JSON lines
#[derive(FromArgs)]
#[argh(subcommand, name = "subscribe")]
struct SubscribeCmd {
    /// only this kind of event (repeatable), e.g. windows-changed
    #[argh(option)]
    kind: Vec<String>,
    /// replay current spaces and windows first
    #[argh(switch)]
    snapshot: bool,
}

/// Stop the daemon
#[derive(FromArgs)]
#[argh(subcommand, name = "quit")]
struct QuitCmd {}

fn main() -> Result<()> {
    let cli: Cli = argh::from_env();

    match cli.command {
        None => {
            let args: Vec<&str> = vec!["aegis", "--help"];
            if let Err(e) = Cli::from_args(&args[..1], &args[1..]) {
                println!("{}", e.output);
            }
            Ok(())
        }
        Some(SubCommand::Start(cmd)) => {
            tracing_subscriber::fmt()
                .with_env_filter(EnvFilter::from_default_env())
                .init();

            tracing::info!("aegis {} starting", VERSION);
            let settings = match Settings::load(cmd.config.as_deref()) {
                Ok(settings) => settings,
                Err(e) => {
                    tracing::error!("{:#}, using defaults", e);
                    Settings::default()
                }
            };
            App::new(settings).run()
        }
        Some(SubCommand::Version(_)) => {
            println!("aegis {}", VERSION);
            Ok(())
        }
        Some(SubCommand::Subscribe(cmd)) => {
            let kinds = cmd
                .kind
                .iter()
                .map(|k| k.parse::<EventKind>())
                .collect::<Result<Vec<_>, _>>()
                .map_err(anyhow::Error::msg)?;
            subscribe_and_print(cmd.snapshot, kinds)
        }
        Some(subcmd) => run_cli(subcmd),
    }
}

fn run_cli(subcmd: SubCommand) -> Result<()> {
    let request = to_request(subcmd)?;
    let mut client = IpcClient::connect()?;
    let response = client.send(&request)?;

    match response {
        Response::Ok => {}
        Response::Error { message } => {
            eprintln!("Error: {}", message);
            std::process::exit(1);
        }
        Response::Spaces { spaces } => {
            for s in spaces {
                println!(
                    "{}: display {} [{} windows]{}{}",
                    s.index,
                    s.display,
                    s.windows.len(),
                    s.label.map(|l| format!(" {}", l)).unwrap_or_default(),
                    if s.focused { " *" } else { "" }
                );
            }
        }
        Response::WindowIcons { icons } => {
            for w in icons {
                println!(
                    "{}: {} - {}{}{}",
                    w.id,
                    w.app,
                    w.title,
                    if w.is_minimized { " (minimized)" } else { "" },
                    if w.has_focus { " *" } else { "" }
                );
            }
        }
        Response::Space { space } => match space {
            Some(space) => println!("{}", space.index),
            None => std::process::exit(1),
        },
    }

    Ok(())
}

fn to_request(subcmd: SubCommand) -> Result<Request> {
    match subcmd {
        SubCommand::Start(_) | SubCommand::Version(_) | SubCommand::Subscribe(_) => {
            unreachable!("handled in main")
        }
        SubCommand::Spaces(_) => Ok(Request::ListSpaces),
        SubCommand::Windows(cmd) => Ok(Request::WindowIcons { space: cmd.space }),
        SubCommand::FocusedSpace(_) => Ok(Request::FocusedSpace),
        SubCommand::FocusSpace(cmd) => Ok(Request::FocusSpace { space: cmd.space }),
        SubCommand::FocusWindow(cmd) => Ok(Request::FocusWindow { window_id: cmd.id }),
        SubCommand::MoveWindow(cmd) => {
            let target = match (cmd.space, cmd.stack, cmd.insert) {
                (Some(space), None, None) => MoveTarget::Space { space },
                (None, Some(window_id), None) => MoveTarget::Stack { window_id },
                (None, None, Some(window_id)) => MoveTarget::Insert { window_id },
                _ => bail!("move-window needs exactly one of --space, --stack or --insert"),
            };
            Ok(Request::MoveWindow {
                window_id: cmd.id,
                target,
            })
        }
        SubCommand::CreateSpace(_) => Ok(Request::CreateSpace),
        SubCommand::DestroySpace(cmd) => Ok(Request::DestroySpace { space: cmd.space }),
        SubCommand::Rotate(cmd) => Ok(Request::Rotate {
            degrees: cmd.degrees,
        }),
        SubCommand::Balance(_) => Ok(Request::Balance),
        SubCommand::Layout(cmd) => Ok(Request::SetLayout {
            layout: parse_layout(&cmd.layout)?,
        }),
        SubCommand::Mirror(cmd) => Ok(Request::Mirror {
            axis: parse_axis(&cmd.axis)?,
        }),
        SubCommand::ToggleFloat(cmd) => Ok(Request::ToggleFloat { window_id: cmd.id }),
        SubCommand::StackAll(_) => Ok(Request::StackAll),
        SubCommand::UnstackAll(_) => Ok(Request::UnstackAll),
        SubCommand::Refresh(_) => Ok(Request::Refresh),
        SubCommand::Volume(cmd) => Ok(Request::SetVolume { level: cmd.level }),
        SubCommand::Brightness(cmd) => Ok(Request::SetBrightness { level: cmd.level }),
        SubCommand::Quit(_) => Ok(Request::Quit),
    }
}

fn parse_layout(s: &str) -> Result<LayoutMode> {
    match s.to_lowercase().as_str() {
        "bsp" => Ok(LayoutMode::Bsp),
        "float" => Ok(LayoutMode::Float),
        _ => bail!("Invalid layout: {} (expected bsp or float)", s),
    }
}

fn parse_axis(s: &str) -> Result<Axis> {
    match s.to_lowercase().as_str() {
        "x" | "x-axis" => Ok(Axis::X),
        "y" | "y-axis" => Ok(Axis::Y),
        _ => bail!("Invalid axis: {} (expected x or y)", s),
    }
}
