//! Live input/output level metering.
//!
//! Each direction runs its own level-meter subprocess that prints one dB
//! value per line. Only the newest complete line of every read is used, and
//! it is published as a `[0, 1]` level into a lock-free slot.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::Child;
use tokio::task::JoinHandle;

use crate::config::Configuration;
use crate::services::{CommandSpec, Toolchain};

/// Readings at or below this are silence.
pub const FLOOR_DB: f32 = -60.0;

/// Longest unterminated tail kept between reads. A meter line is a few bytes,
/// so anything longer is noise and is dropped.
pub const MAX_PENDING_BYTES: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Direction {
    Input,
    Output,
}

#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error("Failed to start {direction:?} level meter {program}: {source}")]
    Spawn {
        direction: Direction,
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// `clamp((db + 60) / 60, 0, 1)`; NaN reads as silence.
pub fn normalize_db(db: f32) -> f32 {
    if db.is_nan() {
        return 0.0;
    }
    ((db - FLOOR_DB) / -FLOOR_DB).clamp(0.0, 1.0)
}

/// dB value in the last whitespace-separated token of `line` (`-inf` included).
pub fn parse_db(line: &str) -> Option<f32> {
    line.split_whitespace().last()?.parse().ok()
}

/// Holds the unterminated tail between reads.
#[derive(Debug, Default)]
pub struct LatestLine {
    pending: Vec<u8>,
}

impl LatestLine {
    /// Feed one read; returns the dB value of the newest line it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Option<f32> {
        self.pending.extend_from_slice(chunk);
        let newest = match self.pending.iter().rposition(|&b| b == b'\n') {
            Some(end) => {
                let complete: Vec<u8> = self.pending.drain(..=end).collect();
                newest_db(&complete)
            }
            None => None,
        };
        if self.pending.len() > MAX_PENDING_BYTES {
            log::debug!("Dropping {} bytes of unterminated meter output", self.pending.len());
            self.pending.clear();
        }
        newest
    }
}

fn newest_db(complete: &[u8]) -> Option<f32> {
    let text = String::from_utf8_lossy(complete);
    let line = text.lines().rev().find(|l| !l.trim().is_empty())?;
    parse_db(line)
}

/// One published level. The generation in the high half makes readers of a
/// stopped monitor unable to overwrite the reset value.
#[derive(Debug, Default)]
pub struct LevelSlot(AtomicU64);

impl LevelSlot {
    fn pack(generation: u32, level: f32) -> u64 {
        (u64::from(generation) << 32) | u64::from(level.to_bits())
    }

    pub fn level(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Acquire) as u32)
    }

    fn generation(&self) -> u32 {
        (self.0.load(Ordering::Acquire) >> 32) as u32
    }

    fn publish(&self, generation: u32, level: f32) -> bool {
        self.0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                ((current >> 32) as u32 == generation).then(|| Self::pack(generation, level))
            })
            .is_ok()
    }

    /// Zero the level and invalidate every reader started before.
    fn reset(&self) {
        let _ = self
            .0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                let next = ((current >> 32) as u32).wrapping_add(1);
                Some(Self::pack(next, 0.0))
            });
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LevelReadings {
    pub input: f32,
    pub output: f32,
}

struct Meter {
    child: Child,
    tasks: Vec<JoinHandle<()>>,
}

/// Input and output meters. Each direction runs on its own; a blank device
/// leaves that direction idle at 0.
#[derive(Default)]
pub struct LevelMonitorPair {
    input: Arc<LevelSlot>,
    output: Arc<LevelSlot>,
    meters: Vec<(Direction, Meter)>,
}

impl LevelMonitorPair {
    pub fn new() -> Self {
        Self::default()
    }

    /// `level_meter.py --device <recording>` and
    /// `level_meter.py --device <playback> --loopback`. `None` for a
    /// direction whose device is blank.
    pub fn commands(
        toolchain: &Toolchain,
        config: &Configuration,
    ) -> (Option<CommandSpec>, Option<CommandSpec>) {
        let script = &toolchain.settings().level_meter_script;
        let recording = config.recording_device.trim();
        let playback = config.playback_device.trim();
        let input = (!recording.is_empty())
            .then(|| toolchain.script_command(script, ["--device", recording]));
        let output = (!playback.is_empty())
            .then(|| toolchain.script_command(script, ["--device", playback, "--loopback"]));
        (input, output)
    }

    pub fn start(&mut self, toolchain: &Toolchain, config: &Configuration) -> Result<(), MonitorError> {
        let (input, output) = Self::commands(toolchain, config);
        self.start_with(input, output)
    }

    /// Stop any running meters, then start one per given command. A
    /// direction that fails to spawn stays at 0 without affecting the
    /// other; the first failure is returned. Must be called from within a
    /// Tokio runtime.
    pub fn start_with(
        &mut self,
        input: Option<CommandSpec>,
        output: Option<CommandSpec>,
    ) -> Result<(), MonitorError> {
        self.stop();
        let mut first_error = None;
        for (direction, command) in [(Direction::Input, input), (Direction::Output, output)] {
            let Some(command) = command else {
                log::debug!("No device for {:?} level meter", direction);
                continue;
            };
            match self.spawn_meter(direction, &command) {
                Ok(meter) => {
                    log::info!("{:?} level meter started", direction);
                    self.meters.push((direction, meter));
                }
                Err(e) => {
                    log::error!("{}", e);
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Kill both meters and zero the readings. Does not wait for the
    /// processes to exit.
    pub fn stop(&mut self) {
        let was_active = !self.meters.is_empty();
        for (direction, mut meter) in self.meters.drain(..) {
            if let Err(e) = meter.child.start_kill() {
                log::debug!("{:?} level meter already gone: {}", direction, e);
            }
            for task in meter.tasks {
                task.abort();
            }
        }
        self.input.reset();
        self.output.reset();
        if was_active {
            log::info!("Level monitors stopped");
        }
    }

    pub fn is_active(&self) -> bool {
        !self.meters.is_empty()
    }

    pub fn is_running(&self, direction: Direction) -> bool {
        self.meters.iter().any(|(d, _)| *d == direction)
    }

    pub fn levels(&self) -> LevelReadings {
        LevelReadings {
            input: self.input.level(),
            output: self.output.level(),
        }
    }

    fn slot(&self, direction: Direction) -> &Arc<LevelSlot> {
        match direction {
            Direction::Input => &self.input,
            Direction::Output => &self.output,
        }
    }

    fn spawn_meter(&self, direction: Direction, command: &CommandSpec) -> Result<Meter, MonitorError> {
        log::debug!("Starting {:?} level meter: {}", direction, command);
        let mut child = command
            .to_tokio_command()
            .spawn()
            .map_err(|source| MonitorError::Spawn {
                direction,
                program: command.program.display().to_string(),
                source,
            })?;

        let slot = self.slot(direction).clone();
        let generation = slot.generation();
        let mut tasks = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            tasks.push(tokio::spawn(read_levels(stdout, direction, slot, generation)));
        }
        if let Some(stderr) = child.stderr.take() {
            tasks.push(tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    log::debug!("[{:?} level meter] {}", direction, line);
                }
            }));
        }
        Ok(Meter { child, tasks })
    }
}

impl Drop for LevelMonitorPair {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn read_levels<R>(mut pipe: R, direction: Direction, slot: Arc<LevelSlot>, generation: u32)
where
    R: AsyncRead + Unpin,
{
    let mut latest = LatestLine::default();
    let mut buf = [0u8; 1024];
    loop {
        match pipe.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if let Some(db) = latest.push(&buf[..n]) {
                    if !slot.publish(generation, normalize_db(db)) {
                        break;
                    }
                }
            }
            Err(e) => {
                log::warn!("{:?} level meter read error: {}", direction, e);
                break;
            }
        }
    }
    log::debug!("{:?} level meter output closed", direction);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn normalization_bounds() {
        assert_eq!(normalize_db(-60.0), 0.0);
        assert_eq!(normalize_db(0.0), 1.0);
        assert_eq!(normalize_db(10.0), 1.0);
        assert_eq!(normalize_db(-30.0), 0.5);
        assert_eq!(normalize_db(-90.0), 0.0);
        assert_eq!(normalize_db(f32::NEG_INFINITY), 0.0);
        assert_eq!(normalize_db(f32::NAN), 0.0);
    }

    #[test]
    fn parses_last_token() {
        assert_eq!(parse_db("-12.5"), Some(-12.5));
        assert_eq!(parse_db("level: -3"), Some(-3.0));
        assert_eq!(parse_db("-inf"), Some(f32::NEG_INFINITY));
        assert_eq!(parse_db("peak dB"), None);
        assert_eq!(parse_db(""), None);
    }

    #[test]
    fn only_newest_complete_line_counts() {
        let mut latest = LatestLine::default();
        assert_eq!(latest.push(b"-40\n-20\n-1"), Some(-20.0));
        assert_eq!(latest.push(b"0"), None);
        assert_eq!(latest.push(b"\n"), Some(-10.0));
        assert_eq!(latest.push(b"-5\n\n"), Some(-5.0));
    }

    #[test]
    fn oversized_tail_is_dropped() {
        let mut latest = LatestLine::default();
        assert_eq!(latest.push(&[b'x'; MAX_PENDING_BYTES + 1]), None);
        assert!(latest.pending.is_empty());
        assert_eq!(latest.push(b"-10\n"), Some(-10.0));

        assert_eq!(latest.push(b"-20\n-3"), Some(-20.0));
        assert_eq!(latest.pending, b"-3");
    }

    #[test]
    fn stale_generation_cannot_publish() {
        let slot = LevelSlot::default();
        let generation = slot.generation();
        assert!(slot.publish(generation, 0.75));
        assert_eq!(slot.level(), 0.75);

        slot.reset();
        assert_eq!(slot.level(), 0.0);
        assert!(!slot.publish(generation, 0.9));
        assert_eq!(slot.level(), 0.0);
    }

    fn sh(script: &str) -> CommandSpec {
        CommandSpec::new("sh").arg("-c").arg(script)
    }

    async fn wait_for(monitors: &LevelMonitorPair, check: impl Fn(LevelReadings) -> bool) {
        for _ in 0..200 {
            if check(monitors.levels()) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("levels never matched: {:?}", monitors.levels());
    }

    #[tokio::test]
    async fn meters_publish_and_stop_resets() {
        let mut monitors = LevelMonitorPair::new();
        monitors
            .start_with(
                Some(sh("echo -50; echo -30; exec sleep 30")),
                Some(sh("echo 'rms -6'; exec sleep 30")),
            )
            .unwrap();
        assert!(monitors.is_active());

        wait_for(&monitors, |l| l.input == 0.5 && l.output == 0.9).await;

        monitors.stop();
        assert!(!monitors.is_active());
        assert_eq!(
            monitors.levels(),
            LevelReadings {
                input: 0.0,
                output: 0.0,
            }
        );
        monitors.stop();
    }

    #[tokio::test]
    async fn restart_replaces_running_meters() {
        let mut monitors = LevelMonitorPair::new();
        monitors
            .start_with(Some(sh("echo 0; exec sleep 30")), Some(sh("echo 0; exec sleep 30")))
            .unwrap();
        wait_for(&monitors, |l| l.input == 1.0).await;

        monitors
            .start_with(Some(sh("echo -inf; exec sleep 30")), Some(sh("echo -60; exec sleep 30")))
            .unwrap();
        assert_eq!(monitors.meters.len(), 2);
        assert_eq!(monitors.levels().input, 0.0);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(monitors.levels().input, 0.0);
    }

    #[tokio::test]
    async fn spawn_failure_keeps_other_direction() {
        let mut monitors = LevelMonitorPair::new();
        let err = monitors
            .start_with(
                Some(sh("echo -30; exec sleep 30")),
                Some(CommandSpec::new("/nonexistent/level_meter")),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            MonitorError::Spawn {
                direction: Direction::Output,
                ..
            }
        ));
        assert!(monitors.is_running(Direction::Input));
        assert!(!monitors.is_running(Direction::Output));

        wait_for(&monitors, |l| l.input == 0.5).await;
        assert_eq!(monitors.levels().output, 0.0);
        monitors.stop();
    }

    #[tokio::test]
    async fn missing_direction_stays_silent() {
        let mut monitors = LevelMonitorPair::new();
        monitors
            .start_with(None, Some(sh("echo -6; exec sleep 30")))
            .unwrap();
        assert!(!monitors.is_running(Direction::Input));
        assert!(monitors.is_running(Direction::Output));

        wait_for(&monitors, |l| l.output == 0.9).await;
        assert_eq!(monitors.levels().input, 0.0);
        monitors.stop();
        assert!(!monitors.is_active());
    }

    #[test]
    fn commands_target_selected_devices() {
        let toolchain = Toolchain::new(Default::default());
        let config = Configuration {
            playback_device: "3".to_string(),
            recording_device: "1".to_string(),
            ..Configuration::default()
        };
        let (input, output) = LevelMonitorPair::commands(&toolchain, &config);
        assert_eq!(input.unwrap().args[1..], ["--device", "1"]);
        assert_eq!(output.unwrap().args[1..], ["--device", "3", "--loopback"]);
    }

    #[test]
    fn blank_device_has_no_command() {
        let toolchain = Toolchain::new(Default::default());
        let config = Configuration {
            playback_device: "3".to_string(),
            recording_device: "  ".to_string(),
            ..Configuration::default()
        };
        let (input, output) = LevelMonitorPair::commands(&toolchain, &config);
        assert!(input.is_none());
        assert_eq!(output.unwrap().args[1..], ["--device", "3", "--loopback"]);
    }
}
