//! # Display Module
//!
//! Shows the frames published by the video receiver. The display loop peeks the frame slot at its
//! own rate and hands each new frame to a [`FrameDisplay`], so a slow display never holds up
//! reception and simply skips the frames it was too slow to see.
//!
//! [`SnapshotDisplay`] keeps the newest frame on disk as a JPEG, for viewing with any image viewer
//! which reloads on change.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::{debug, info, warn};
use serde::Serialize;
use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, Instant},
};
use util::{
    rate::{RateError, RateGovernor},
    slot::SharedLatestSlot,
    task::{LoopState, Shutdown, StateCell},
};

use crate::cam_client::ReceivedFrame;

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// Something which can show a frame to the operator.
pub trait FrameDisplay: Send {
    /// Show the frame. Returns false if the frame was skipped.
    fn show(&mut self, frame: &ReceivedFrame) -> Result<bool, DisplayError>;

    /// Human readable description used in logs.
    fn describe(&self) -> String;
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Writes the newest frame to a file, at most once per interval.
///
/// The file is replaced by renaming a temporary file over it, so readers never see a partly
/// written frame.
pub struct SnapshotDisplay {
    path: PathBuf,
    tmp_path: PathBuf,
    min_interval: Duration,
    last_write: Option<Instant>,
    num_written: u64,
}

/// Counters for the display loop, returned when it stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DisplayStats {
    /// Distinct frames handed to the display
    pub frames: u64,

    /// Frames the display actually showed
    pub shown: u64,

    /// Attempts to show a frame which failed
    pub failures: u64,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum DisplayError {
    #[error("Could not write the frame to {0:?}: {1}")]
    WriteError(PathBuf, std::io::Error),

    #[error("Could not replace {0:?}: {1}")]
    RenameError(PathBuf, std::io::Error),

    #[error("Invalid display rate: {0}")]
    RateError(#[from] RateError),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl SnapshotDisplay {
    pub fn new<P: AsRef<Path>>(path: P, min_interval: Duration) -> Self {
        let path = path.as_ref().to_path_buf();
        let tmp_path = path.with_extension("jpg.tmp");

        Self {
            path,
            tmp_path,
            min_interval,
            last_write: None,
            num_written: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn num_written(&self) -> u64 {
        self.num_written
    }

    /// Show the frame as if at the given time.
    pub fn show_at(&mut self, frame: &ReceivedFrame, now: Instant) -> Result<bool, DisplayError> {
        if let Some(last) = self.last_write {
            if now.saturating_duration_since(last) < self.min_interval {
                return Ok(false);
            }
        }

        fs::write(&self.tmp_path, frame.data.as_bytes())
            .map_err(|e| DisplayError::WriteError(self.tmp_path.clone(), e))?;
        fs::rename(&self.tmp_path, &self.path)
            .map_err(|e| DisplayError::RenameError(self.path.clone(), e))?;

        self.last_write = Some(now);
        self.num_written += 1;

        match frame.fps {
            Some(fps) => debug!("Snapshot of frame {} written ({:.1} fps)", frame.seq, fps),
            None => debug!("Snapshot of frame {} written", frame.seq),
        }

        Ok(true)
    }
}

impl FrameDisplay for SnapshotDisplay {
    fn show(&mut self, frame: &ReceivedFrame) -> Result<bool, DisplayError> {
        self.show_at(frame, Instant::now())
    }

    fn describe(&self) -> String {
        format!("snapshot:{}", self.path.display())
    }
}

impl<T: FrameDisplay + ?Sized> FrameDisplay for Box<T> {
    fn show(&mut self, frame: &ReceivedFrame) -> Result<bool, DisplayError> {
        (**self).show(frame)
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Show each new frame from the slot until shutdown is requested.
///
/// The slot is only peeked, the frame stays available to anything else reading the slot.
pub fn run_display<D: FrameDisplay>(
    mut display: D,
    frames: SharedLatestSlot<Arc<ReceivedFrame>>,
    rate_hz: f64,
    shutdown: &Shutdown,
    state: &StateCell,
) -> Result<DisplayStats, DisplayError> {
    let mut rate = RateGovernor::from_hz("display", rate_hz)?;
    let mut stats = DisplayStats::default();
    let mut last_seen = 0;
    let mut last_shown = 0;
    let mut num_consec_failures = 0u64;

    state.set(LoopState::Running);
    info!("Display running on {}", display.describe());

    while shutdown.should_continue() {
        rate.cycle_start();

        // A frame the display declined or failed on is offered again next cycle
        if let Some(frame) = frames.peek() {
            if frame.seq != last_shown {
                if frame.seq != last_seen {
                    last_seen = frame.seq;
                    stats.frames += 1;
                }

                match display.show(&frame) {
                    Ok(shown) => {
                        if shown {
                            last_shown = frame.seq;
                            stats.shown += 1;
                        }
                        if num_consec_failures > 0 {
                            info!("Display recovered after {} failures", num_consec_failures);
                            num_consec_failures = 0;
                        }
                    }
                    Err(e) => {
                        stats.failures += 1;
                        num_consec_failures += 1;
                        if num_consec_failures == 1 {
                            warn!("Could not show frame {}: {}", frame.seq, e);
                        } else {
                            debug!("Could not show frame {} either: {}", frame.seq, e);
                        }
                    }
                }
            }
        }

        rate.cycle_end();
    }

    state.set(LoopState::Draining);
    info!(
        "Display stopping, {} frames, {} shown, {} failures",
        stats.frames, stats.shown, stats.failures
    );

    Ok(stats)
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use chrono::Utc;
    use comms_if::eqpt::cam::{decode_jpeg, CamImage};
    use image::{DynamicImage, RgbImage};
    use util::task::LoopTask;

    fn frame(seq: u64) -> ReceivedFrame {
        let image = DynamicImage::ImageRgb8(RgbImage::new(8, 8));
        let data = CamImage::now(image.clone()).encode(80).unwrap();
        ReceivedFrame {
            seq,
            received: Utc::now(),
            image,
            data,
            fps: None,
        }
    }

    #[test]
    fn test_snapshot_interval() {
        let dir = tempfile::tempdir().unwrap();
        let mut display = SnapshotDisplay::new(dir.path().join("latest.jpg"), Duration::from_secs(1));
        let t0 = Instant::now();

        assert!(display.show_at(&frame(1), t0).unwrap());
        assert!(!display.show_at(&frame(2), t0 + Duration::from_millis(500)).unwrap());
        assert!(display.show_at(&frame(3), t0 + Duration::from_millis(1000)).unwrap());
        assert_eq!(display.num_written(), 2);

        let written = fs::read(display.path()).unwrap();
        assert_eq!(decode_jpeg(&written).unwrap().to_rgb8().dimensions(), (8, 8));
        assert!(!dir.path().join("latest.jpg.tmp").exists());
    }

    #[test]
    fn test_snapshot_write_error() {
        let mut display = SnapshotDisplay::new("/this/dir/does/not/exist/latest.jpg", Duration::ZERO);
        assert!(matches!(
            display.show(&frame(1)),
            Err(DisplayError::WriteError(_, _))
        ));
    }

    /// Records the sequence number of every frame shown.
    struct Recorder(Arc<std::sync::Mutex<Vec<u64>>>);

    impl FrameDisplay for Recorder {
        fn show(&mut self, frame: &ReceivedFrame) -> Result<bool, DisplayError> {
            self.0.lock().unwrap().push(frame.seq);
            Ok(true)
        }

        fn describe(&self) -> String {
            "recorder".into()
        }
    }

    #[test]
    fn test_run_display_shows_each_frame_once() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let slot = SharedLatestSlot::new();
        let shutdown = Shutdown::new();

        slot.publish(Arc::new(frame(1)));

        let task_slot = slot.clone();
        let task_shutdown = shutdown.clone();
        let recorder = Recorder(seen.clone());
        let task = LoopTask::spawn("display", move |state| {
            run_display(recorder, task_slot, 100.0, &task_shutdown, state)
        })
        .unwrap();

        std::thread::sleep(Duration::from_millis(100));
        slot.publish(Arc::new(frame(2)));
        std::thread::sleep(Duration::from_millis(100));

        shutdown.request();
        let stats = task.join_timeout(Duration::from_secs(1)).unwrap().unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
        assert_eq!(stats.frames, 2);
        assert_eq!(stats.shown, 2);

        // Peeking leaves the frame in the slot
        assert_eq!(slot.peek().unwrap().seq, 2);
    }

    /// Declines the first frame offered, as a snapshot display does inside its interval.
    struct Declines(Recorder, bool);

    impl FrameDisplay for Declines {
        fn show(&mut self, frame: &ReceivedFrame) -> Result<bool, DisplayError> {
            if !self.1 {
                self.1 = true;
                return Ok(false);
            }
            self.0.show(frame)
        }

        fn describe(&self) -> String {
            "declines".into()
        }
    }

    #[test]
    fn test_run_display_retries_declined_frame() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let slot = SharedLatestSlot::new();
        let shutdown = Shutdown::new();

        // Only one frame ever arrives
        slot.publish(Arc::new(frame(1)));

        let task_slot = slot.clone();
        let task_shutdown = shutdown.clone();
        let display = Declines(Recorder(seen.clone()), false);
        let task = LoopTask::spawn("display", move |state| {
            run_display(display, task_slot, 100.0, &task_shutdown, state)
        })
        .unwrap();

        std::thread::sleep(Duration::from_millis(150));
        shutdown.request();
        let stats = task.join_timeout(Duration::from_secs(1)).unwrap().unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![1]);
        assert_eq!(stats.frames, 1);
        assert_eq!(stats.shown, 1);
    }
}
