/*!
 * Stream Readers
 *
 * Background threads draining the child's stdout and stderr. Every read is
 * forwarded as one output notification; the stdout reader additionally
 * scans completed lines for the readiness marker.
 */

use super::dispatch::EventSink;
use super::traits::OutputStream;
use super::types::OutputSource;
use std::io::{self, Read};
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};

/// Detects the first completed line containing a marker
#[derive(Debug)]
pub struct LineScanner {
    marker: Vec<u8>,
    line: Vec<u8>,
    max_line: usize,
    // Marker already seen in the discarded head of the current line
    line_hit: bool,
    matched: bool,
}

impl LineScanner {
    pub fn new(marker: impl Into<String>, max_line: usize) -> Self {
        let marker = marker.into().into_bytes();
        Self {
            max_line: max_line.max(marker.len()),
            marker,
            line: Vec::new(),
            line_hit: false,
            matched: false,
        }
    }

    /// Whether the marker has been seen
    pub fn matched(&self) -> bool {
        self.matched
    }

    /// Feed raw bytes; returns `true` exactly once, for the chunk that
    /// completes the first line containing the marker
    pub fn feed(&mut self, bytes: &[u8]) -> bool {
        if self.matched {
            return false;
        }

        for segment in bytes.split_inclusive(|&b| b == b'\n') {
            let (content, complete) = match segment.split_last() {
                Some((b'\n', head)) => (head, true),
                _ => (segment, false),
            };
            self.line.extend_from_slice(content);

            if complete {
                if self.line_hit || self.line_has_marker() {
                    self.matched = true;
                    self.line = Vec::new();
                    return true;
                }
                self.line.clear();
            } else if self.line.len() > self.max_line {
                self.line_hit |= self.line_has_marker();
                // Keep just enough tail to catch a marker straddling the cut
                let keep = self.marker.len().saturating_sub(1);
                let cut = self.line.len() - keep;
                self.line.drain(..cut);
            }
        }
        false
    }

    fn line_has_marker(&self) -> bool {
        !self.marker.is_empty()
            && self
                .line
                .windows(self.marker.len())
                .any(|window| window == self.marker.as_slice())
    }
}

/// Decodes a byte stream chunk by chunk without splitting UTF-8 sequences
#[derive(Debug, Default)]
pub struct ChunkDecoder {
    pending: Vec<u8>,
}

impl ChunkDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode `bytes`, holding back an incomplete trailing sequence
    pub fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);

        let mut out = String::with_capacity(self.pending.len());
        let mut rest: &[u8] = &self.pending;
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    out.push_str(valid);
                    rest = &[];
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    out.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[len..];
                        }
                        None => {
                            // Incomplete sequence at the end: wait for more bytes
                            rest = after;
                            break;
                        }
                    }
                }
            }
        }

        let leftover = rest.to_vec();
        self.pending = leftover;
        out
    }

    /// Flush whatever is held back, lossily
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let text = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        Some(text)
    }
}

/// Readiness hook for the stdout reader
pub(crate) struct Readiness {
    pub scanner: LineScanner,
    pub on_ready: Box<dyn FnOnce() + Send + 'static>,
}

/// Spawn the reader thread for one stream
pub(crate) fn spawn_reader(
    source: OutputSource,
    pid: u32,
    stream: OutputStream,
    sink: EventSink,
    chunk_size: usize,
    readiness: Option<Readiness>,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(format!("{source}-reader-{pid}"))
        .spawn(move || read_stream(source, pid, stream, &sink, chunk_size, readiness))
}

fn read_stream(
    source: OutputSource,
    pid: u32,
    mut stream: OutputStream,
    sink: &EventSink,
    chunk_size: usize,
    mut readiness: Option<Readiness>,
) {
    let mut buf = vec![0u8; chunk_size.max(1)];
    let mut decoder = ChunkDecoder::new();
    let mut forwarded = 0usize;

    loop {
        let n = match stream.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                warn!(pid, stream = %source, error = %e, "Read failed, abandoning stream");
                break;
            }
        };
        forwarded += n;
        let chunk = &buf[..n];

        let text = decoder.decode(chunk);
        if !text.is_empty() {
            sink.output(source, text);
        }

        // Forward first so the marker line precedes the Running notification
        let ready = readiness
            .as_mut()
            .map(|r| r.scanner.feed(chunk))
            .unwrap_or(false);
        if ready {
            if let Some(r) = readiness.take() {
                debug!(pid, "Readiness marker seen");
                (r.on_ready)();
            }
        }
    }

    if let Some(rest) = decoder.finish() {
        sink.output(source, rest);
    }
    debug!(pid, stream = %source, bytes = forwarded, "Stream closed");
}
