//! Transcoder diagnostic stream handling
//!
//! ffmpeg writes its status to stderr, terminating progress lines with `\r`
//! rather than `\n`. The [`LineBuffer`] splits the raw byte stream on either,
//! keeps a bounded tail for error context, and the [`StartSignal`] fires
//! exactly once on the first progress line.

use std::collections::VecDeque;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::oneshot;

/// Lines kept for error context
pub const TAIL_CAPACITY: usize = 32;

/// Longest partial line held before it is flushed as a line
const MAX_PARTIAL_LINE: usize = 4096;

/// Bounded line splitter over a byte stream
#[derive(Debug)]
pub struct LineBuffer {
    partial: Vec<u8>,
    tail: VecDeque<String>,
    capacity: usize,
}

impl LineBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            partial: Vec::new(),
            tail: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Feed bytes, returning the lines they completed
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &byte in bytes {
            if byte == b'\n' || byte == b'\r' {
                self.complete_line(&mut lines);
            } else {
                self.partial.push(byte);
                if self.partial.len() >= MAX_PARTIAL_LINE {
                    self.complete_line(&mut lines);
                }
            }
        }
        lines
    }

    /// Flush whatever is left once the stream ends
    pub fn finish(&mut self) -> Option<String> {
        let mut lines = Vec::new();
        self.complete_line(&mut lines);
        lines.pop()
    }

    /// Most recent lines, oldest first
    pub fn tail(&self) -> Vec<String> {
        self.tail.iter().cloned().collect()
    }

    fn complete_line(&mut self, out: &mut Vec<String>) {
        if self.partial.is_empty() {
            return;
        }
        let line = String::from_utf8_lossy(&self.partial).trim().to_string();
        self.partial.clear();
        if line.is_empty() {
            return;
        }
        if self.tail.len() == self.capacity {
            self.tail.pop_front();
        }
        self.tail.push_back(line.clone());
        out.push(line);
    }
}

/// Whether a diagnostic line reports encoding progress
pub fn is_progress_line(line: &str) -> bool {
    line.contains("frame=") || line.contains("fps=")
}

/// Extract `key=value` from a progress line, tolerating padding after `=`
pub fn extract_value(line: &str, key: &str) -> Option<String> {
    let start = line.find(key)?;
    let after_key = &line[start + key.len()..];
    let value_part = after_key.trim_start();
    let end = value_part
        .find(|c: char| c.is_whitespace())
        .unwrap_or(value_part.len());
    let value = &value_part[..end];
    (!value.is_empty()).then(|| value.to_string())
}

/// Fire-once notification that recording is underway
#[derive(Debug)]
pub struct StartSignal {
    tx: Option<oneshot::Sender<()>>,
}

impl StartSignal {
    pub fn channel() -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// Resolve the signal; later calls are no-ops. Returns true on the first call.
    pub fn fire(&mut self) -> bool {
        match self.tx.take() {
            Some(tx) => {
                let _ = tx.send(());
                true
            }
            None => false,
        }
    }

    pub fn has_fired(&self) -> bool {
        self.tx.is_none()
    }
}

/// Drain a diagnostic stream until EOF
///
/// Every completed line goes into `buffer`; the first progress line fires
/// `signal`. Returns the number of lines seen.
pub async fn drain_diagnostics<R>(
    mut reader: R,
    buffer: &parking_lot::Mutex<LineBuffer>,
    mut signal: StartSignal,
    label: &str,
) -> usize
where
    R: AsyncRead + Unpin,
{
    let mut chunk = [0u8; 4096];
    let mut seen = 0;
    let mut last_progress_log = std::time::Instant::now();

    loop {
        let read = match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                tracing::debug!("{}: diagnostic stream closed: {}", label, e);
                break;
            }
        };

        let lines = buffer.lock().push(&chunk[..read]);
        for line in lines {
            seen += 1;
            if is_progress_line(&line) {
                if signal.fire() {
                    tracing::info!("{}: recording started ({})", label, line);
                    last_progress_log = std::time::Instant::now();
                } else if last_progress_log.elapsed() >= std::time::Duration::from_secs(5) {
                    tracing::debug!(
                        "{}: frame={} fps={} time={}",
                        label,
                        extract_value(&line, "frame=").unwrap_or_else(|| "??".to_string()),
                        extract_value(&line, "fps=").unwrap_or_else(|| "??".to_string()),
                        extract_value(&line, "time=").unwrap_or_else(|| "??".to_string()),
                    );
                    last_progress_log = std::time::Instant::now();
                }
            } else {
                tracing::debug!("{}: {}", label, line);
            }
        }
    }

    if let Some(line) = buffer.lock().finish() {
        seen += 1;
        if is_progress_line(&line) {
            signal.fire();
        }
        tracing::debug!("{}: {}", label, line);
    }
    seen
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_value() {
        let line = "frame=  123 fps= 60.0 q=-1.0 size=  1024kB time=00:00:10.00 bitrate=2000.0kbits/s speed=1.0x";

        assert_eq!(extract_value(line, "frame="), Some("123".to_string()));
        assert_eq!(extract_value(line, "fps="), Some("60.0".to_string()));
        assert_eq!(extract_value(line, "time="), Some("00:00:10.00".to_string()));
        assert_eq!(extract_value(line, "speed="), Some("1.0x".to_string()));
        assert_eq!(extract_value(line, "missing="), None);
    }

    #[test]
    fn test_progress_detection() {
        assert!(is_progress_line("frame=   12 fps=0.0 q=0.0 size=0kB"));
        assert!(is_progress_line("fps=30"));
        assert!(!is_progress_line("Input #0, dshow, from 'video=Logitech BRIO':"));
    }

    #[test]
    fn test_line_buffer_splits_carriage_returns() {
        let mut buffer = LineBuffer::new(4);
        let lines = buffer.push(b"Input #0\nframe=1 fps=0\rframe=2 fps=");
        assert_eq!(lines, vec!["Input #0".to_string(), "frame=1 fps=0".to_string()]);

        let lines = buffer.push(b"30\r\n");
        assert_eq!(lines, vec!["frame=2 fps=30".to_string()]);
        assert_eq!(buffer.finish(), None);
    }

    #[test]
    fn test_line_buffer_is_bounded() {
        let mut buffer = LineBuffer::new(3);
        for i in 0..10 {
            buffer.push(format!("line {}\n", i).as_bytes());
        }
        assert_eq!(buffer.tail(), vec!["line 7", "line 8", "line 9"]);
    }

    #[test]
    fn test_start_signal_fires_once() {
        let (mut signal, mut rx) = StartSignal::channel();
        assert!(!signal.has_fired());
        assert!(signal.fire());
        assert!(!signal.fire());
        assert!(signal.has_fired());
        assert!(rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_drain_fires_on_progress() {
        let input: &[u8] = b"Stream #0:0: Video: rawvideo\nframe=    1 fps=0.0 q=0.0\rframe=    2 fps=0.0\r";
        let buffer = parking_lot::Mutex::new(LineBuffer::new(TAIL_CAPACITY));
        let (signal, rx) = StartSignal::channel();

        let seen = drain_diagnostics(input, &buffer, signal, "test").await;

        assert_eq!(seen, 3);
        assert!(rx.await.is_ok());
        assert_eq!(buffer.lock().tail().len(), 3);
    }

    #[tokio::test]
    async fn test_drain_without_progress_drops_signal() {
        let input: &[u8] = b"Could not find video device with name [nope]\nError opening input\n";
        let buffer = parking_lot::Mutex::new(LineBuffer::new(TAIL_CAPACITY));
        let (signal, rx) = StartSignal::channel();

        drain_diagnostics(input, &buffer, signal, "test").await;

        assert!(rx.await.is_err());
        assert_eq!(buffer.lock().tail()[1], "Error opening input");
    }
}
