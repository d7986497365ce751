//! HLK-LD2450 mmWave radar driver.
//!
//! The LD2450 streams 30-byte binary frames over UART at 256000 baud:
//!
//! ```text
//! Offset  Size  Field
//! ------  ----  -----
//! 0       4     Header: AA FF 03 00
//! 4       8     Target 1: x u16 (bit15 = sign), y u16 (bit15 = sign),
//!               speed i16 cm/s, resolution u16  (all little-endian)
//! 12      8     Target 2, same layout
//! 20      8     Target 3, same layout
//! 28      2     Footer: 55 CC
//! ```
//!
//! The assembler tolerates byte loss: it scans for the header, validates the
//! footer, drops malformed frames, and counts every discard in `resync`.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use nightwatch_core::Clock;
use tokio::io::AsyncReadExt;
use tokio::time::timeout;
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, warn};

use crate::error::{DriverError, DriverResult};
use crate::traits::RadarSource;

/// Frame header marker.
pub const FRAME_HEADER: [u8; 4] = [0xAA, 0xFF, 0x03, 0x00];
/// Frame footer marker.
pub const FRAME_FOOTER: [u8; 2] = [0x55, 0xCC];
/// Full frame length in bytes.
pub const FRAME_LEN: usize = 30;
/// Targets carried per frame.
pub const TARGETS_PER_FRAME: usize = 3;

/// UART read timeout — three times the slowest frame period.
const READ_TIMEOUT: Duration = Duration::from_secs(1);

/// One detected target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RadarTarget {
    /// Horizontal position, mm. Negative is left of boresight.
    pub x_mm: i32,
    /// Depth, mm.
    pub y_mm: i32,
    /// Radial speed, cm/s. Positive approaches the sensor.
    pub speed_cm_s: i32,
    /// Internal detection resolution.
    pub resolution: u16,
}

impl RadarTarget {
    /// Straight-line distance from the sensor, mm.
    pub fn distance_mm(&self) -> f64 {
        ((self.x_mm as f64).powi(2) + (self.y_mm as f64).powi(2)).sqrt()
    }

    /// All-zero slots are placeholders for absent targets.
    pub fn is_valid(&self) -> bool {
        !(self.x_mm == 0 && self.y_mm == 0 && self.speed_cm_s == 0)
    }
}

/// One parsed radar frame with its acquisition timestamp.
#[derive(Debug, Clone)]
pub struct RadarFrame {
    /// Valid targets in this frame (placeholders removed), nearest first.
    pub targets: Vec<RadarTarget>,
    /// Monotonic acquisition timestamp.
    pub timestamp: f64,
}

impl RadarFrame {
    /// The nearest valid target, the one the vital-sign DSP tracks.
    pub fn primary(&self) -> Option<&RadarTarget> {
        self.targets.first()
    }
}

/// Decodes the sensor's bit-15 sign-magnitude coordinate encoding.
fn decode_coordinate(raw: u16) -> i32 {
    if raw & 0x8000 != 0 {
        -i32::from(raw & 0x7FFF)
    } else {
        i32::from(raw)
    }
}

fn parse_target(data: &[u8]) -> RadarTarget {
    let x = u16::from_le_bytes([data[0], data[1]]);
    let y = u16::from_le_bytes([data[2], data[3]]);
    let speed = i16::from_le_bytes([data[4], data[5]]);
    let resolution = u16::from_le_bytes([data[6], data[7]]);
    RadarTarget {
        x_mm: decode_coordinate(x),
        y_mm: decode_coordinate(y),
        speed_cm_s: i32::from(speed),
        resolution,
    }
}

/// Resynchronizing frame assembler.
///
/// Feed it raw serial bytes; it yields every complete, well-formed frame and
/// discards garbage while counting resyncs.
#[derive(Debug, Default)]
pub struct FrameAssembler {
    buffer: Vec<u8>,
    resync: u64,
}

impl FrameAssembler {
    /// Creates an empty assembler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames dropped due to missing/damaged framing so far.
    pub fn resync_count(&self) -> u64 {
        self.resync
    }

    /// Pushes received bytes, returning all complete frames. `timestamp` is
    /// the acquisition time of this read.
    pub fn push(&mut self, data: &[u8], timestamp: f64) -> Vec<RadarFrame> {
        self.buffer.extend_from_slice(data);
        let mut frames = Vec::new();

        loop {
            match find_header(&self.buffer) {
                None => {
                    // Keep a partial header tail, drop the rest.
                    if self.buffer.len() > FRAME_HEADER.len() {
                        let tail = self.buffer.len() - (FRAME_HEADER.len() - 1);
                        self.buffer.drain(..tail);
                    }
                    break;
                }
                Some(start) => {
                    if start > 0 {
                        self.resync += 1;
                        debug!(discarded = start, "radar resync: garbage before header");
                        self.buffer.drain(..start);
                    }
                    if self.buffer.len() < FRAME_LEN {
                        break;
                    }

                    let frame_bytes = &self.buffer[..FRAME_LEN];
                    if frame_bytes[FRAME_LEN - 2..] != FRAME_FOOTER {
                        // Damaged frame: skip the header and rescan.
                        self.resync += 1;
                        warn!("radar resync: bad footer, dropping frame");
                        self.buffer.drain(..FRAME_HEADER.len());
                        continue;
                    }

                    let mut targets = Vec::with_capacity(TARGETS_PER_FRAME);
                    for i in 0..TARGETS_PER_FRAME {
                        let offset = FRAME_HEADER.len() + i * 8;
                        let target = parse_target(&frame_bytes[offset..offset + 8]);
                        if target.is_valid() {
                            targets.push(target);
                        }
                    }
                    targets.sort_by(|a, b| {
                        a.distance_mm().partial_cmp(&b.distance_mm()).unwrap()
                    });

                    frames.push(RadarFrame { targets, timestamp });
                    self.buffer.drain(..FRAME_LEN);
                }
            }
        }

        frames
    }
}

fn find_header(buffer: &[u8]) -> Option<usize> {
    buffer
        .windows(FRAME_HEADER.len())
        .position(|w| w == FRAME_HEADER)
}

/// Async UART driver for the LD2450 (and LD2410 units running the compatible
/// multi-target reporting firmware).
pub struct Ld2450Driver {
    device: String,
    baud_rate: u32,
    clock: Arc<dyn Clock>,
    port: Option<tokio_serial::SerialStream>,
    assembler: FrameAssembler,
    pending: VecDeque<RadarFrame>,
}

impl Ld2450Driver {
    /// Creates a driver for the given serial device.
    pub fn new(device: impl Into<String>, baud_rate: u32, clock: Arc<dyn Clock>) -> Self {
        Self {
            device: device.into(),
            baud_rate,
            clock,
            port: None,
            assembler: FrameAssembler::new(),
            pending: VecDeque::new(),
        }
    }
}

#[async_trait]
impl RadarSource for Ld2450Driver {
    async fn connect(&mut self) -> DriverResult<()> {
        let port = tokio_serial::new(self.device.as_str(), self.baud_rate)
            .timeout(READ_TIMEOUT)
            .open_native_async()
            .map_err(|e| DriverError::init(format!("open {}: {e}", self.device)))?;
        self.port = Some(port);
        self.assembler = FrameAssembler::new();
        self.pending.clear();
        debug!(device = %self.device, baud = self.baud_rate, "radar connected");
        Ok(())
    }

    async fn disconnect(&mut self) -> DriverResult<()> {
        self.port = None;
        Ok(())
    }

    async fn read_frame(&mut self) -> DriverResult<RadarFrame> {
        loop {
            if let Some(frame) = self.pending.pop_front() {
                return Ok(frame);
            }

            let port = self
                .port
                .as_mut()
                .ok_or_else(|| DriverError::fatal("radar not connected"))?;

            let mut chunk = [0u8; 256];
            let n = match timeout(READ_TIMEOUT, port.read(&mut chunk)).await {
                Err(_) => return Err(DriverError::transient("radar read timeout")),
                Ok(Err(e)) => return Err(DriverError::fatal(format!("radar read: {e}"))),
                Ok(Ok(0)) => return Err(DriverError::fatal("radar serial closed")),
                Ok(Ok(n)) => n,
            };

            let timestamp = self.clock.now_monotonic();
            for frame in self.assembler.push(&chunk[..n], timestamp) {
                self.pending.push_back(frame);
            }
        }
    }

    fn resync_count(&self) -> u64 {
        self.assembler.resync_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Builds a well-formed frame carrying the given targets (x, y, speed).
    fn build_frame(targets: &[(i32, i32, i32)]) -> Vec<u8> {
        let mut buf = Vec::with_capacity(FRAME_LEN);
        buf.extend_from_slice(&FRAME_HEADER);

        for i in 0..TARGETS_PER_FRAME {
            let (x, y, speed) = targets.get(i).copied().unwrap_or((0, 0, 0));
            let encode = |v: i32| -> u16 {
                if v < 0 {
                    (v.unsigned_abs() as u16) | 0x8000
                } else {
                    v as u16
                }
            };
            buf.extend_from_slice(&encode(x).to_le_bytes());
            buf.extend_from_slice(&encode(y).to_le_bytes());
            buf.extend_from_slice(&(speed as i16).to_le_bytes());
            buf.extend_from_slice(&360u16.to_le_bytes());
        }

        buf.extend_from_slice(&FRAME_FOOTER);
        buf
    }

    #[test]
    fn parses_single_frame() {
        let mut assembler = FrameAssembler::new();
        let frames = assembler.push(&build_frame(&[(100, 1500, -3)]), 1.0);

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].timestamp, 1.0);
        let target = frames[0].primary().unwrap();
        assert_eq!(target.x_mm, 100);
        assert_eq!(target.y_mm, 1500);
        assert_eq!(target.speed_cm_s, -3);
        assert_eq!(assembler.resync_count(), 0);
    }

    #[test]
    fn decodes_negative_coordinates() {
        let mut assembler = FrameAssembler::new();
        let frames = assembler.push(&build_frame(&[(-250, 2000, 5)]), 0.0);
        let target = frames[0].primary().unwrap();
        assert_eq!(target.x_mm, -250);
        assert_eq!(target.y_mm, 2000);
    }

    #[test]
    fn drops_placeholder_targets() {
        let mut assembler = FrameAssembler::new();
        let frames = assembler.push(&build_frame(&[(100, 1500, 2), (0, 0, 0)]), 0.0);
        assert_eq!(frames[0].targets.len(), 1);
    }

    #[test]
    fn resyncs_over_garbage() {
        let mut assembler = FrameAssembler::new();
        let mut data = vec![0x13, 0x37, 0xFF];
        data.extend_from_slice(&build_frame(&[(50, 900, 0)]));

        let frames = assembler.push(&data, 0.0);
        assert_eq!(frames.len(), 1);
        assert_eq!(assembler.resync_count(), 1);
    }

    #[test]
    fn bad_footer_drops_frame_and_recovers() {
        let mut assembler = FrameAssembler::new();
        let mut bad = build_frame(&[(50, 900, 0)]);
        bad[FRAME_LEN - 1] = 0x00;
        let good = build_frame(&[(60, 1000, 1)]);

        let mut data = bad;
        data.extend_from_slice(&good);

        let frames = assembler.push(&data, 0.0);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].primary().unwrap().y_mm, 1000);
        assert!(assembler.resync_count() >= 1);
    }

    #[test]
    fn handles_split_frames_across_reads() {
        let mut assembler = FrameAssembler::new();
        let frame = build_frame(&[(10, 800, 0)]);

        let first = assembler.push(&frame[..17], 0.0);
        assert!(first.is_empty());
        let second = assembler.push(&frame[17..], 0.1);
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].timestamp, 0.1);
    }

    #[test]
    fn targets_sorted_by_distance() {
        let mut assembler = FrameAssembler::new();
        let frames = assembler.push(&build_frame(&[(0, 3000, 0), (0, 1200, 0)]), 0.0);
        let targets = &frames[0].targets;
        assert_eq!(targets[0].y_mm, 1200);
        assert_eq!(targets[1].y_mm, 3000);
    }
}
