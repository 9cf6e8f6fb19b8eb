//! Replays recorded detections as a frame source.
//!
//! One JSON object per line:
//! `{"faces": 2, "detections": [{"label": "Alice"}, {"label": null}]}`.
//! `faces` is the cheap detector's count and defaults to the number of detections.

use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::Path;
use std::time::Duration;

use presence_core::session::{FrameSource, Recognizer, SessionError};
use presence_core::Detection;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct ReplayFrame {
    #[serde(default)]
    pub faces: Option<usize>,
    #[serde(default)]
    pub detections: Vec<Detection>,
}

pub struct ReplaySource<R> {
    lines: Lines<R>,
    line_no: usize,
    interval: Option<Duration>,
}

impl ReplaySource<BufReader<File>> {
    pub fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
        Ok(Self::new(BufReader::new(File::open(path)?)))
    }
}

impl<R: BufRead> ReplaySource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            line_no: 0,
            interval: None,
        }
    }

    /// Sleep this long before handing out each frame.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval).filter(|d| !d.is_zero());
        self
    }
}

impl<R: BufRead> FrameSource for ReplaySource<R> {
    type Frame = ReplayFrame;

    fn next_frame(&mut self) -> Result<Option<ReplayFrame>, SessionError> {
        loop {
            let Some(line) = self.lines.next() else {
                return Ok(None);
            };
            self.line_no += 1;
            let line = line.map_err(|e| SessionError::Source(format!("line {}: {e}", self.line_no)))?;
            if line.trim().is_empty() {
                continue;
            }
            if let Some(interval) = self.interval {
                std::thread::sleep(interval);
            }
            return serde_json::from_str(&line)
                .map(Some)
                .map_err(|e| SessionError::Source(format!("line {}: {e}", self.line_no)));
        }
    }
}

/// Recognizer whose answers were recorded alongside the frame.
#[derive(Debug, Default)]
pub struct ReplayRecognizer;

impl Recognizer<ReplayFrame> for ReplayRecognizer {
    fn count_faces(&mut self, frame: &ReplayFrame) -> Result<usize, SessionError> {
        Ok(frame.faces.unwrap_or(frame.detections.len()))
    }

    fn recognize(&mut self, frame: &ReplayFrame) -> Result<Vec<Detection>, SessionError> {
        Ok(frame.detections.clone())
    }
}
