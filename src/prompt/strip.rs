use vte::{Parser as VteParser, Perform};

struct ControlStripper {
    output: String,
}

impl Perform for ControlStripper {
    fn print(&mut self, c: char) {
        self.output.push(c);
    }

    fn execute(&mut self, byte: u8) {
        match byte {
            b'\n' | b'\r' | b'\t' => self.output.push(byte as char),
            _ => {}
        }
    }
}

/// Remove every terminal escape sequence (CSI, OSC, DCS, charset selection) and every
/// control byte except newline, carriage return and tab.
pub fn strip_terminal_sequences(bytes: &[u8]) -> String {
    let mut stripper = TerminalText::new();
    stripper.feed(bytes);
    stripper.into_string()
}

/// Incremental form of [`strip_terminal_sequences`]: an escape sequence or UTF-8 character
/// split across two chunks is still recognized.
pub struct TerminalText {
    parser: VteParser,
    stripper: ControlStripper,
}

impl TerminalText {
    pub fn new() -> Self {
        Self {
            parser: VteParser::new(),
            stripper: ControlStripper {
                output: String::new(),
            },
        }
    }

    /// Feed raw bytes; returns the byte offset in [`Self::as_str`] where the new text starts.
    pub fn feed(&mut self, bytes: &[u8]) -> usize {
        let start = self.stripper.output.len();
        self.parser.advance(&mut self.stripper, bytes);
        start
    }

    pub fn as_str(&self) -> &str {
        &self.stripper.output
    }

    pub fn len(&self) -> usize {
        self.stripper.output.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stripper.output.is_empty()
    }

    /// Keep at most the last `max_bytes` of text (cut on a character boundary).
    /// Returns how many bytes were dropped from the front.
    pub fn truncate_front(&mut self, max_bytes: usize) -> usize {
        let text = &mut self.stripper.output;
        if text.len() <= max_bytes {
            return 0;
        }
        let mut cut = text.len() - max_bytes;
        while !text.is_char_boundary(cut) {
            cut += 1;
        }
        text.drain(..cut);
        cut
    }

    pub fn into_string(self) -> String {
        self.stripper.output
    }
}

impl Default for TerminalText {
    fn default() -> Self {
        Self::new()
    }
}
