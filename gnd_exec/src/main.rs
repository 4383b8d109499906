//! # Ground Station Executable
//!
//! This executable runs on the operator station and is responsible for:
//! - Reading operator input and sending control commands to the vehicle
//! - Receiving the vehicle's video stream and displaying the newest frame

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

// External
use color_eyre::{eyre::WrapErr, Result};
use log::{info, warn};
use serde::Serialize;
use std::{path::PathBuf, time::Duration};
use structopt::StructOpt;

// Internal
use gnd_lib::{
    cam_client::{FrameReceiver, ReceiverStats},
    ctrl_client::{ClientStats, CtrlClient, SenderExit},
    display::{self, DisplayStats, SnapshotDisplay},
    input::{
        js::JoystickSource, script::ScriptSource, CommandSource, InputMapper, NeutralSource,
    },
    params::GndExecParams,
};
use util::{
    host,
    logger::{logger_init, LevelFilter},
    session::Session,
    slot::SharedLatestSlot,
    task::{LoopTask, Shutdown},
};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Interval at which the main thread checks on the loops.
const SUPERVISE_INTERVAL: Duration = Duration::from_millis(100);

/// Name of the snapshot file in the session directory.
const SNAPSHOT_FILE: &str = "latest_frame.jpg";

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, StructOpt)]
#[structopt(name = "gnd_exec", about = "Operator station control sender and video receiver")]
struct Opts {
    /// Parameter file, relative to the params directory of the software root
    #[structopt(long, default_value = "gnd_exec.toml")]
    params: String,

    /// Write the default parameters to the parameter file if it does not exist
    #[structopt(long)]
    persist_params: bool,

    /// Replay operator input from a script instead of reading the joystick
    #[structopt(long, parse(from_os_str), conflicts_with = "neutral")]
    script: Option<PathBuf>,

    /// Send the neutral command instead of reading the joystick
    #[structopt(long)]
    neutral: bool,

    /// Joystick device, overrides the parameter file
    #[structopt(long)]
    js: Option<String>,

    /// Do not receive video
    #[structopt(long)]
    no_video: bool,

    /// Minimum log level, must be at least as verbose as `info`
    #[structopt(long, default_value = "debug")]
    log_level: LevelFilter,
}

/// Summary saved into the session at shutdown.
#[derive(Serialize)]
struct GndSessionStats {
    exit: Option<SenderExit>,
    ctrl: Option<ClientStats>,
    video: Option<ReceiverStats>,
    display: Option<DisplayStats>,
}

// ------------------------------------------------------------------------------------------------
// MAIN
// ------------------------------------------------------------------------------------------------

fn main() -> Result<()> {
    color_eyre::install()?;
    let opts = Opts::from_args();

    // ---- EARLY INITIALISATION ----

    // Initialise session
    let session = Session::new("gnd_exec", "sessions").wrap_err("Failed to create the session")?;

    // Initialise logger
    logger_init(opts.log_level, &session).wrap_err("Failed to initialise logging")?;

    // Log information on this execution.
    info!("Ground Station Executable\n");
    info!(
        "Running on: {:#?}",
        host::get_uname().wrap_err("Failed to get host information")?
    );
    info!("Session directory: {:?}\n", session.session_root);

    info!("Initialising...");

    // ---- LOAD PARAMETERS ----

    let mut params: GndExecParams =
        util::params::load_or_default(&opts.params, opts.persist_params)
            .wrap_err("Failed to load parameters")?;
    if let Some(ref js) = opts.js {
        params.js_device = js.clone();
    }
    params
        .schema
        .validate()
        .wrap_err("Invalid command schema in parameters")?;

    let mapper = InputMapper::new(params.mapping.clone(), params.schema.clone())
        .wrap_err("Invalid input mapping in parameters")?;

    info!("Parameters loaded");

    let shutdown = Shutdown::new();
    shutdown
        .install_interrupt_handler()
        .wrap_err("Failed to install the interrupt handler")?;

    // ---- INPUT AND CONTROL LINK ----

    let source: Box<dyn CommandSource> = match (&opts.script, opts.neutral) {
        (Some(path), _) => Box::new(ScriptSource::load(path).wrap_err("Failed to load the script")?),
        (None, true) => Box::new(NeutralSource::new()),
        (None, false) => Box::new(
            JoystickSource::open(&params.js_device).wrap_err("Failed to open the joystick")?,
        ),
    };
    info!("Input from {}", source.describe());

    let client = CtrlClient::connect(&params).wrap_err("Failed to open the control link")?;

    // ---- VIDEO ----

    let frames = SharedLatestSlot::new();

    let video = if opts.no_video {
        info!("Video disabled");
        None
    } else {
        let receiver = FrameReceiver::bind(&params, frames.clone())
            .wrap_err("Failed to initialise the video receiver")?;
        let display = SnapshotDisplay::new(
            session.session_root.join(SNAPSHOT_FILE),
            params.snapshot_interval(),
        );
        Some((receiver, display))
    };

    // ---- START LOOPS ----

    let client_shutdown = shutdown.clone();
    let client_task = LoopTask::spawn("ctrl_client", move |state| {
        client.run(source, &mapper, &client_shutdown, state)
    })
    .wrap_err("Failed to start the control client")?;

    let video_tasks = match video {
        Some((receiver, snapshot)) => {
            let receiver_shutdown = shutdown.clone();
            let receiver_task = LoopTask::spawn("frame_receiver", move |state| {
                receiver.run(&receiver_shutdown, state)
            })
            .wrap_err("Failed to start the video receiver")?;

            let display_shutdown = shutdown.clone();
            let display_rate_hz = params.display_rate_hz;
            let display_task = LoopTask::spawn("display", move |state| {
                display::run_display(snapshot, frames, display_rate_hz, &display_shutdown, state)
            })
            .wrap_err("Failed to start the display")?;

            Some((receiver_task, display_task))
        }
        None => None,
    };

    info!("Initialisation complete, running until interrupted");

    while shutdown.should_continue() && !client_task.is_finished() {
        shutdown.sleep(SUPERVISE_INTERVAL);
    }
    shutdown.request();

    // ---- SHUTDOWN ----

    info!("Shutting down");

    let (exit, ctrl) = match client_task.join_timeout(params.join_timeout()) {
        Ok((exit, stats)) => (Some(exit), Some(stats)),
        Err(e) => {
            warn!("{}", e);
            (None, None)
        }
    };

    let (video, display) = match video_tasks {
        Some((receiver_task, display_task)) => {
            let video = match receiver_task.join_timeout(params.join_timeout()) {
                Ok(s) => Some(s),
                Err(e) => {
                    warn!("{}", e);
                    None
                }
            };
            let display = match display_task.join_timeout(params.join_timeout()) {
                Ok(Ok(s)) => Some(s),
                Ok(Err(e)) => {
                    warn!("Display failed: {}", e);
                    None
                }
                Err(e) => {
                    warn!("{}", e);
                    None
                }
            };
            (video, display)
        }
        None => (None, None),
    };

    match exit {
        Some(SenderExit::PeerDisconnected) => warn!("The vehicle disconnected"),
        Some(SenderExit::SourceExhausted) => info!("Input finished"),
        _ => (),
    }

    session.save(
        "link_stats.json",
        GndSessionStats {
            exit,
            ctrl,
            video,
            display,
        },
    );

    session.exit();

    Ok(())
}
