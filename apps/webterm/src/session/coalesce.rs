//! Per-session batching of terminal input and output.
//!
//! Both coalescers are single-writer: the session pushes chunks and the
//! driver's timer hands them back when it fires. Each keeps a single flag
//! so at most one timer is outstanding per buffer.

use bytes::{Bytes, BytesMut};

use crate::telemetry;

/// Accumulates inbound output until the next render tick.
#[derive(Debug, Default)]
pub struct OutputCoalescer {
    buffer: BytesMut,
    flush_scheduled: bool,
}

impl OutputCoalescer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk. Returns `true` when the caller must schedule a flush.
    pub fn push(&mut self, chunk: &[u8]) -> bool {
        if chunk.is_empty() {
            return false;
        }
        self.buffer.extend_from_slice(chunk);
        if self.flush_scheduled {
            false
        } else {
            self.flush_scheduled = true;
            true
        }
    }

    /// Render tick: hand back everything accumulated since the last tick.
    pub fn flush(&mut self) -> Option<Bytes> {
        self.flush_scheduled = false;
        if self.buffer.is_empty() {
            return None;
        }
        let bytes = self.buffer.split().freeze();
        telemetry::record_batch("output_flush", bytes.len());
        Some(bytes)
    }

    /// Drop pending output without rendering it.
    pub fn discard(&mut self) {
        self.buffer.clear();
        self.flush_scheduled = false;
    }

    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_flush_scheduled(&self) -> bool {
        self.flush_scheduled
    }
}

/// Accumulates keystrokes for one short send window.
#[derive(Debug, Default)]
pub struct InputCoalescer {
    buffer: BytesMut,
    timer_running: bool,
}

impl InputCoalescer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append keystrokes. Returns `true` when the caller must start the
    /// send timer.
    pub fn push(&mut self, chunk: &[u8]) -> bool {
        if chunk.is_empty() {
            return false;
        }
        self.buffer.extend_from_slice(chunk);
        if self.timer_running {
            false
        } else {
            self.timer_running = true;
            true
        }
    }

    /// Timer expiry: take the batch and clear the timer so the next
    /// keystroke opens a fresh window.
    pub fn take(&mut self) -> Option<Bytes> {
        self.timer_running = false;
        self.drain()
    }

    /// Take the batch ahead of the timer (before an interrupt). The timer
    /// stays armed and will find the buffer empty.
    ///
    /// A UTF-8 sequence cut off at the end of the buffer stays behind for
    /// the next batch, so a character split across reads is never sent in
    /// two halves.
    pub fn drain(&mut self) -> Option<Bytes> {
        let cut = complete_prefix_len(&self.buffer);
        if cut == 0 {
            return None;
        }
        let bytes = self.buffer.split_to(cut).freeze();
        telemetry::record_batch("input_batch", bytes.len());
        Some(bytes)
    }

    pub fn discard(&mut self) {
        self.buffer.clear();
        self.timer_running = false;
    }

    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_timer_running(&self) -> bool {
        self.timer_running
    }
}

/// Length of `bytes` without a truncated trailing UTF-8 sequence. Input
/// that is not UTF-8 at all is taken whole.
fn complete_prefix_len(bytes: &[u8]) -> usize {
    match std::str::from_utf8(bytes) {
        Err(err) if err.error_len().is_none() => err.valid_up_to(),
        _ => bytes.len(),
    }
}
