//! # Mechanisms Control Executable
//!
//! This executable runs on the vehicle and is responsible for:
//! - Receiving control commands from the operator station
//! - Writing actuator frames to the actuator controller at a fixed rate

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

// External
use color_eyre::{eyre::WrapErr, Result};
use log::{info, warn};
use serde::Serialize;
use std::time::Duration;
use structopt::StructOpt;

// Internal
use mech_lib::{
    act_bridge::{ActuatorBridge, BridgeStats},
    ctrl_server::{CtrlServer, LinkStatsSnapshot},
    params::MechExecParams,
    sink::{ActuatorSink, LogSink, SerialSink},
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

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, StructOpt)]
#[structopt(name = "mech_exec", about = "Vehicle side control receiver and actuator bridge")]
struct Opts {
    /// Parameter file, relative to the params directory of the software root
    #[structopt(long, default_value = "mech_exec.toml")]
    params: String,

    /// Write the default parameters to the parameter file if it does not exist
    #[structopt(long)]
    persist_params: bool,

    /// Log actuator frames instead of writing them to the serial port
    #[structopt(long)]
    dry_run: bool,

    /// Minimum log level, must be at least as verbose as `info`
    #[structopt(long, default_value = "debug")]
    log_level: LevelFilter,
}

/// Summary saved into the session at shutdown.
#[derive(Serialize)]
struct MechSessionStats {
    link: LinkStatsSnapshot,
    bridge: Option<BridgeStats>,
}

// ------------------------------------------------------------------------------------------------
// MAIN
// ------------------------------------------------------------------------------------------------

fn main() -> Result<()> {
    color_eyre::install()?;
    let opts = Opts::from_args();

    // ---- EARLY INITIALISATION ----

    // Initialise session
    let session = Session::new("mech_exec", "sessions").wrap_err("Failed to create the session")?;

    // Initialise logger
    logger_init(opts.log_level, &session).wrap_err("Failed to initialise logging")?;

    // Log information on this execution.
    info!("Mechanisms Control Executable\n");
    info!(
        "Running on: {:#?}",
        host::get_uname().wrap_err("Failed to get host information")?
    );
    info!("Session directory: {:?}\n", session.session_root);

    info!("Initialising...");

    // ---- LOAD PARAMETERS ----

    let params: MechExecParams =
        util::params::load_or_default(&opts.params, opts.persist_params)
            .wrap_err("Failed to load parameters")?;
    params.validate().wrap_err("Invalid parameters")?;

    info!("Parameters loaded");

    let shutdown = Shutdown::new();
    shutdown
        .install_interrupt_handler()
        .wrap_err("Failed to install the interrupt handler")?;

    // ---- SERVER AND BRIDGE INITIALISATION ----

    let slot = SharedLatestSlot::new();

    let server = CtrlServer::new(&params, slot.clone())
        .wrap_err("Failed to initialise the control server")?;
    let link_stats = server.stats();

    let sink: Box<dyn ActuatorSink> = if opts.dry_run {
        info!("Dry run, actuator frames will be logged");
        Box::new(LogSink::new())
    } else {
        Box::new(
            SerialSink::open(
                &params.serial_device,
                params.serial_baud,
                Duration::from_millis(params.serial_timeout_ms),
            )
            .wrap_err("Failed to open the actuator serial port")?,
        )
    };

    let bridge = ActuatorBridge::new(&params, slot, sink)
        .wrap_err("Failed to initialise the actuator bridge")?;

    // ---- START LOOPS ----

    let server_shutdown = shutdown.clone();
    let server_task = LoopTask::spawn("ctrl_server", move |state| {
        server.run(&server_shutdown, state)
    })
    .wrap_err("Failed to start the control server")?;

    let bridge_shutdown = shutdown.clone();
    let bridge_task = LoopTask::spawn("act_bridge", move |state| {
        bridge.run(&bridge_shutdown, state)
    })
    .wrap_err("Failed to start the actuator bridge")?;

    info!("Initialisation complete, running until interrupted");

    while shutdown.should_continue() {
        if server_task.is_finished() || bridge_task.is_finished() {
            warn!("A loop stopped unexpectedly, shutting down");
            shutdown.request();
            break;
        }
        shutdown.sleep(SUPERVISE_INTERVAL);
    }

    // ---- SHUTDOWN ----

    info!("Shutting down");

    if let Err(e) = server_task.join_timeout(params.join_timeout()) {
        warn!("{}", e);
    }

    let bridge_stats = match bridge_task.join_timeout(params.join_timeout()) {
        Ok(s) => Some(s),
        Err(e) => {
            warn!("{}", e);
            None
        }
    };

    let stats = MechSessionStats {
        link: link_stats.snapshot(),
        bridge: bridge_stats,
    };
    info!("Control link: {}", stats.link);
    session.save("link_stats.json", stats);

    session.exit();

    Ok(())
}
