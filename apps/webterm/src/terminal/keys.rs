/// Ctrl-]; the local prefix for session management keys.
pub const PREFIX: u8 = 0x1d;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyAction {
    /// Bytes meant for the focused session.
    Forward(Vec<u8>),
    NewShell,
    NewRunLog,
    /// Focus the session at this index (0-based, creation order).
    Focus(usize),
    Next,
    Prev,
    CloseFocused,
    StopAll,
    Clear,
    Quit,
}

/// Splits raw tty input into keystrokes and prefix commands.
///
/// The prefix may arrive at the end of one read and its command key at the
/// start of the next, so the armed state carries across calls.
#[derive(Debug, Default)]
pub struct PrefixKeys {
    armed: bool,
}

impl PrefixKeys {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, bytes: &[u8]) -> Vec<KeyAction> {
        let mut actions = Vec::new();
        let mut pending = Vec::new();
        for &byte in bytes {
            if !self.armed {
                if byte == PREFIX {
                    self.armed = true;
                } else {
                    pending.push(byte);
                }
                continue;
            }

            self.armed = false;
            let action = match byte {
                PREFIX => {
                    pending.push(PREFIX);
                    continue;
                }
                b'c' => KeyAction::NewShell,
                b'r' => KeyAction::NewRunLog,
                b'1'..=b'9' => KeyAction::Focus(usize::from(byte - b'1')),
                b'n' => KeyAction::Next,
                b'p' => KeyAction::Prev,
                b'x' => KeyAction::CloseFocused,
                b's' => KeyAction::StopAll,
                b'l' => KeyAction::Clear,
                b'q' => KeyAction::Quit,
                _ => continue,
            };
            if !pending.is_empty() {
                actions.push(KeyAction::Forward(std::mem::take(&mut pending)));
            }
            actions.push(action);
        }
        if !pending.is_empty() {
            actions.push(KeyAction::Forward(pending));
        }
        actions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_input_is_forwarded_whole() {
        let mut keys = PrefixKeys::new();
        assert_eq!(
            keys.feed(b"ls -la\r"),
            vec![KeyAction::Forward(b"ls -la\r".to_vec())]
        );
    }

    #[test]
    fn prefix_commands_split_the_stream() {
        let mut keys = PrefixKeys::new();
        assert_eq!(
            keys.feed(b"ab\x1dcde"),
            vec![
                KeyAction::Forward(b"ab".to_vec()),
                KeyAction::NewShell,
                KeyAction::Forward(b"de".to_vec()),
            ]
        );
    }

    #[test]
    fn prefix_survives_across_reads() {
        let mut keys = PrefixKeys::new();
        assert!(keys.feed(b"\x1d").is_empty());
        assert_eq!(keys.feed(b"3"), vec![KeyAction::Focus(2)]);
    }

    #[test]
    fn double_prefix_sends_literal() {
        let mut keys = PrefixKeys::new();
        assert_eq!(
            keys.feed(b"\x1d\x1d"),
            vec![KeyAction::Forward(vec![PREFIX])]
        );
    }

    #[test]
    fn unknown_command_key_is_swallowed() {
        let mut keys = PrefixKeys::new();
        assert_eq!(keys.feed(b"\x1dzq"), vec![KeyAction::Forward(b"q".to_vec())]);
    }
}
