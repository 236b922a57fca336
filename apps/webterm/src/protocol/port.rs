use once_cell::sync::Lazy;
use regex::Regex;
use tokio::sync::watch;

// The run service announces a listening port as `[PORT DETECTED] <digits>`
// (usually wrapped in colour escapes). The trailing non-digit makes sure a
// number split across two messages is not published half-read.
static PORT_SENTINEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[PORT DETECTED\] ([0-9]+)[^0-9]").unwrap());

const MAX_CARRY: usize = 128;

/// Watches one session's output for port announcements.
///
/// Holds the unfinished tail of the current line between chunks so a
/// sentinel split across messages is still seen. It never touches the
/// bytes that are rendered.
#[derive(Debug, Default)]
pub struct PortScanner {
    carry: String,
}

impl PortScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scan a decoded chunk and return the last port it completes, if any.
    pub fn scan(&mut self, chunk: &[u8]) -> Option<u16> {
        self.carry.push_str(&String::from_utf8_lossy(chunk));

        let mut found = None;
        let mut consumed = 0;
        for caps in PORT_SENTINEL.captures_iter(&self.carry) {
            if let Some(port) = caps.get(1).and_then(|m| m.as_str().parse::<u16>().ok()) {
                found = Some(port);
            }
            if let Some(whole) = caps.get(0) {
                consumed = whole.end();
            }
        }

        let line_start = self.carry.rfind('\n').map(|idx| idx + 1).unwrap_or(0);
        let keep_from = consumed.max(line_start);
        let mut tail = self.carry.split_off(keep_from);
        if tail.len() > MAX_CARRY {
            let mut start = tail.len() - MAX_CARRY;
            while !tail.is_char_boundary(start) {
                start += 1;
            }
            tail = tail.split_off(start);
        }
        self.carry = tail;
        found
    }
}

/// Process-wide "last detected port" shared with other UI affordances.
#[derive(Debug, Clone)]
pub struct PortTracker {
    tx: watch::Sender<Option<u16>>,
}

impl PortTracker {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    pub fn record(&self, port: u16) {
        self.tx.send_replace(Some(port));
    }

    pub fn latest(&self) -> Option<u16> {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<u16>> {
        self.tx.subscribe()
    }
}

impl Default for PortTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_plain_sentinel() {
        let mut scanner = PortScanner::new();
        assert_eq!(scanner.scan(b"[PORT DETECTED] 3000\n"), Some(3000));
    }

    #[test]
    fn detects_coloured_sentinel() {
        let mut scanner = PortScanner::new();
        assert_eq!(
            scanner.scan(b"\x1b[32m[PORT DETECTED] 8080\x1b[0m\r\n"),
            Some(8080)
        );
    }

    #[test]
    fn last_sentinel_in_a_chunk_wins() {
        let mut scanner = PortScanner::new();
        let chunk = b"[PORT DETECTED] 3000\nlog line\n[PORT DETECTED] 5173\n";
        assert_eq!(scanner.scan(chunk), Some(5173));
    }

    #[test]
    fn split_number_is_not_published_early() {
        let mut scanner = PortScanner::new();
        assert_eq!(scanner.scan(b"[PORT DETECTED] 30"), None);
        assert_eq!(scanner.scan(b"00\n"), Some(3000));
    }

    #[test]
    fn split_marker_is_detected() {
        let mut scanner = PortScanner::new();
        assert_eq!(scanner.scan(b"server up [PORT DET"), None);
        assert_eq!(scanner.scan(b"ECTED] 4321\r\n"), Some(4321));
    }

    #[test]
    fn matched_sentinel_is_not_reported_twice() {
        let mut scanner = PortScanner::new();
        assert_eq!(scanner.scan(b"[PORT DETECTED] 3000 "), Some(3000));
        assert_eq!(scanner.scan(b"still the same line"), None);
    }

    #[test]
    fn out_of_range_ports_are_ignored() {
        let mut scanner = PortScanner::new();
        assert_eq!(scanner.scan(b"[PORT DETECTED] 99999\n"), None);
    }

    #[test]
    fn carry_stays_bounded() {
        let mut scanner = PortScanner::new();
        let noise = "é".repeat(500);
        scanner.scan(noise.as_bytes());
        assert!(scanner.carry.len() <= MAX_CARRY);
    }

    #[tokio::test]
    async fn tracker_notifies_subscribers() {
        let tracker = PortTracker::new();
        let mut rx = tracker.subscribe();
        assert_eq!(tracker.latest(), None);

        tracker.record(3000);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), Some(3000));
        assert_eq!(tracker.latest(), Some(3000));
    }
}
