//! PCM audio capture via a child process.
//!
//! Capturing through an `arecord`-compatible command keeps the daemon free of
//! native audio library dependencies on the target SBC; the child writes raw
//! 16-bit little-endian mono PCM to stdout and this driver slices it into
//! 20 ms blocks timestamped at acquisition.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use nightwatch_core::Clock;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdout, Command};
use tokio::time::timeout;
use tracing::debug;

use crate::error::{DriverError, DriverResult};
use crate::traits::{AudioSource, PcmBlock};

/// Frame period, seconds.
const FRAME_SECONDS: f64 = 0.020;
/// Read timeout for one block; generous against scheduler hiccups.
const READ_TIMEOUT: Duration = Duration::from_secs(2);

/// Audio capture driver reading raw PCM from a spawned capture process.
pub struct PcmCaptureDriver {
    device: String,
    sample_rate: u32,
    clock: Arc<dyn Clock>,
    child: Option<Child>,
    stdout: Option<ChildStdout>,
    frame_bytes: usize,
}

impl PcmCaptureDriver {
    /// Creates a driver; `device` is the ALSA selector, empty for default.
    pub fn new(device: impl Into<String>, sample_rate: u32, clock: Arc<dyn Clock>) -> Self {
        let samples_per_frame = (f64::from(sample_rate) * FRAME_SECONDS).round() as usize;
        Self {
            device: device.into(),
            sample_rate,
            clock,
            child: None,
            stdout: None,
            frame_bytes: samples_per_frame * 2,
        }
    }

    fn capture_command(&self) -> Command {
        let mut cmd = Command::new("arecord");
        cmd.arg("-q")
            .arg("-t")
            .arg("raw")
            .arg("-f")
            .arg("S16_LE")
            .arg("-c")
            .arg("1")
            .arg("-r")
            .arg(self.sample_rate.to_string());
        if !self.device.is_empty() {
            cmd.arg("-D").arg(&self.device);
        }
        cmd.stdout(Stdio::piped()).stderr(Stdio::null());
        cmd
    }
}

#[async_trait]
impl AudioSource for PcmCaptureDriver {
    async fn connect(&mut self) -> DriverResult<()> {
        let mut child = self
            .capture_command()
            .spawn()
            .map_err(|e| DriverError::init(format!("spawn capture: {e}")))?;
        self.stdout = child.stdout.take();
        if self.stdout.is_none() {
            return Err(DriverError::init("capture process has no stdout"));
        }
        self.child = Some(child);
        debug!(device = %self.device, rate = self.sample_rate, "audio capture started");
        Ok(())
    }

    async fn disconnect(&mut self) -> DriverResult<()> {
        self.stdout = None;
        if let Some(mut child) = self.child.take() {
            let _ = child.kill().await;
        }
        Ok(())
    }

    async fn read_block(&mut self) -> DriverResult<PcmBlock> {
        let frame_bytes = self.frame_bytes;
        let stdout = self
            .stdout
            .as_mut()
            .ok_or_else(|| DriverError::fatal("audio not connected"))?;

        let mut buf = vec![0u8; frame_bytes];
        let mut filled = 0usize;
        let timestamp = self.clock.now_monotonic();

        while filled < frame_bytes {
            let n = match timeout(READ_TIMEOUT, stdout.read(&mut buf[filled..])).await {
                Err(_) => return Err(DriverError::transient("audio read timeout (underrun)")),
                Ok(Err(e)) => return Err(DriverError::fatal(format!("audio read: {e}"))),
                Ok(Ok(0)) => return Err(DriverError::fatal("capture process closed stdout")),
                Ok(Ok(n)) => n,
            };
            filled += n;
        }

        let samples = buf
            .chunks_exact(2)
            .map(|pair| f64::from(i16::from_le_bytes([pair[0], pair[1]])) / 32768.0)
            .collect();

        Ok(PcmBlock {
            samples,
            timestamp,
            sample_rate: f64::from(self.sample_rate),
        })
    }
}
