//! # Camera Executable
//!
//! This executable runs on the vehicle and streams camera frames to the operator station.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use color_eyre::{eyre::WrapErr, Result};
use log::{info, warn};
use std::time::Duration;
use structopt::StructOpt;

use cam_lib::{
    params::{CamExecParams, SourceKind},
    source,
    stream::FrameSender,
};
use util::{
    host,
    logger::{logger_init, LevelFilter},
    session::Session,
    task::{LoopTask, Shutdown},
};

// -----------------------------------------------------------------------------------------------
// CONSTANTS
// -----------------------------------------------------------------------------------------------

/// Interval at which the main thread checks on the stream loop.
const SUPERVISE_INTERVAL: Duration = Duration::from_millis(100);

// -----------------------------------------------------------------------------------------------
// STRUCTS
// -----------------------------------------------------------------------------------------------

#[derive(Debug, StructOpt)]
#[structopt(name = "cam_exec", about = "Vehicle side camera streamer")]
struct Opts {
    /// Parameter file, relative to the params directory of the software root
    #[structopt(long, default_value = "cam_exec.toml")]
    params: String,

    /// Write the default parameters to the parameter file if it does not exist
    #[structopt(long)]
    persist_params: bool,

    /// Stream the test pattern whatever source the parameters select
    #[structopt(long)]
    test_pattern: bool,

    /// Minimum log level, must be at least as verbose as `info`
    #[structopt(long, default_value = "debug")]
    log_level: LevelFilter,
}

// -----------------------------------------------------------------------------------------------
// MAIN
// -----------------------------------------------------------------------------------------------

fn main() -> Result<()> {
    color_eyre::install()?;
    let opts = Opts::from_args();

    // ---- EARLY INITIALISATION ----

    // Initialise session
    let session = Session::new("cam_exec", "sessions").wrap_err("Failed to create the session")?;

    // Initialise logger
    logger_init(opts.log_level, &session).wrap_err("Failed to initialise logging")?;

    // Log information on this execution.
    info!("Camera Executable\n");
    info!(
        "Running on: {:#?}",
        host::get_uname().wrap_err("Failed to get host information")?
    );
    info!("Session directory: {:?}\n", session.session_root);

    info!("Initialising...");

    // ---- LOAD PARAMETERS ----

    let mut params: CamExecParams =
        util::params::load_or_default(&opts.params, opts.persist_params)
            .wrap_err("Failed to load parameters")?;
    if opts.test_pattern {
        params.source = SourceKind::TestPattern;
    }
    params.validate().wrap_err("Invalid parameters")?;

    info!("Parameters loaded");

    let shutdown = Shutdown::new();
    shutdown
        .install_interrupt_handler()
        .wrap_err("Failed to install the interrupt handler")?;

    // ---- INIT SOURCE AND STREAM ----

    let source = source::open_source(&params).wrap_err("Failed to open the frame source")?;

    let sender = FrameSender::new(&params).wrap_err("Failed to initialise the stream")?;

    info!("Stream initialised");

    // ---- MAIN LOOP ----

    let sender_shutdown = shutdown.clone();
    let sender_task = LoopTask::spawn("frame_sender", move |state| {
        sender.run(source, &sender_shutdown, state)
    })
    .wrap_err("Failed to start the frame sender")?;

    info!("Initialisation complete, running until interrupted");

    while shutdown.should_continue() && !sender_task.is_finished() {
        shutdown.sleep(SUPERVISE_INTERVAL);
    }
    shutdown.request();

    // ---- SHUTDOWN ----

    info!("Shutting down");

    match sender_task.join_timeout(params.join_timeout()) {
        Ok(Ok(stats)) => session.save("stream_stats.json", stats),
        Ok(Err(e)) => warn!("Frame sender failed: {}", e),
        Err(e) => warn!("{}", e),
    }

    session.exit();

    Ok(())
}
