//! Output sanitization: ANSI stripping and shell-artifact removal.

use vte::{Params, Parser, Perform};

use crate::execution::PROMPT_MARKER;

/// Bracketed-paste toggles that survive as text when the ESC byte is split
/// across reads.
const PASTE_MARKERS: &[&str] = &["[?2004h", "[?2004l"];

/// Output sanitizer using VTE parser.
pub struct OutputSanitizer;

impl OutputSanitizer {
    /// Strip ANSI escape codes from raw bytes.
    ///
    /// Returns clean UTF-8 text with all control sequences removed.
    pub fn strip_ansi(input: &[u8]) -> String {
        let mut extractor = PlainTextExtractor::new();
        let mut parser = Parser::new();

        parser.advance(&mut extractor, input);

        extractor.into_string()
    }

    /// Strip ANSI codes from a string.
    pub fn strip_ansi_str(input: &str) -> String {
        Self::strip_ansi(input.as_bytes())
    }

    /// Turn drained channel bytes into the command's own output.
    ///
    /// Drops blank lines, the echoed `command` (with or without a prompt in
    /// front), bare or `user@host:dir` prompts, late prompt-probe replies
    /// and bracketed-paste leftovers. A bare `$ ` prompt that output landed
    /// behind is cut off. Whatever remains is joined with `\n`, without a
    /// trailing newline.
    pub fn clean(raw: &[u8], command: &str) -> String {
        let text = Self::strip_ansi(raw);
        let command = command.trim();

        text.split(['\n', '\r'])
            .map(remove_paste_markers)
            .filter_map(|line| {
                let line = strip_prompt_prefix(&line);
                let trimmed = line.trim();
                let drop = trimmed.is_empty()
                    || trimmed.contains(PROMPT_MARKER)
                    || is_echo(trimmed, command)
                    || is_prompt_line(trimmed);
                (!drop).then(|| line.to_string())
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn remove_paste_markers(line: &str) -> String {
    let mut line = line.to_string();
    for marker in PASTE_MARKERS {
        if line.contains(marker) {
            line = line.replace(marker, "");
        }
    }
    line
}

/// Cut bare `$ ` prompts off the front of a line.
fn strip_prompt_prefix(line: &str) -> &str {
    let mut rest = line;
    while let Some(stripped) = rest.strip_prefix("$ ") {
        rest = stripped;
    }
    rest
}

/// The command echoed back, alone or behind a prompt.
fn is_echo(line: &str, command: &str) -> bool {
    if command.is_empty() {
        return false;
    }
    match line.strip_suffix(command) {
        Some(prefix) => {
            let prefix = prefix.trim();
            prefix.is_empty() || is_prompt_line(prefix)
        }
        None => false,
    }
}

/// A line that is nothing but a shell prompt.
///
/// Recognises the bare `$`/`#`/`>`/`%` prompt set during bootstrap and the
/// common distribution defaults `user@host:dir$` and `[user@host dir]$`.
pub fn is_prompt_line(line: &str) -> bool {
    let line = line.trim();
    let Some(body) = line
        .strip_suffix('$')
        .or_else(|| line.strip_suffix('#'))
        .or_else(|| line.strip_suffix('>'))
        .or_else(|| line.strip_suffix('%'))
    else {
        return false;
    };
    let body = body.trim_end();

    if body.is_empty() {
        return true;
    }

    if let Some(inner) = body.strip_prefix('[').and_then(|b| b.strip_suffix(']')) {
        return inner
            .split_once(' ')
            .is_some_and(|(user_host, _)| is_user_at_host(user_host));
    }

    match body.split_once(':') {
        Some((user_host, dir)) => is_user_at_host(user_host) && !dir.contains(char::is_whitespace),
        None => false,
    }
}

fn is_user_at_host(s: &str) -> bool {
    match s.split_once('@') {
        Some((user, host)) => {
            !user.is_empty()
                && !host.is_empty()
                && !s.contains(char::is_whitespace)
                && !host.contains('@')
        }
        None => false,
    }
}

/// VTE performer that extracts plain text.
struct PlainTextExtractor {
    output: Vec<u8>,
}

impl PlainTextExtractor {
    fn new() -> Self {
        Self { output: Vec::new() }
    }

    fn into_string(self) -> String {
        String::from_utf8_lossy(&self.output).into_owned()
    }
}

impl Perform for PlainTextExtractor {
    fn print(&mut self, c: char) {
        let mut buf = [0u8; 4];
        let encoded = c.encode_utf8(&mut buf);
        self.output.extend_from_slice(encoded.as_bytes());
    }

    fn execute(&mut self, byte: u8) {
        // Keep newline, carriage return and tab only
        if let 0x0A | 0x0D | 0x09 = byte {
            self.output.push(byte);
        }
    }

    fn hook(&mut self, _params: &Params, _intermediates: &[u8], _ignore: bool, _action: char) {}

    fn put(&mut self, _byte: u8) {}

    fn unhook(&mut self) {}

    fn osc_dispatch(&mut self, _params: &[&[u8]], _bell_terminated: bool) {
        // Window titles set by PROMPT_COMMAND land here
    }

    fn csi_dispatch(
        &mut self,
        _params: &Params,
        _intermediates: &[u8],
        _ignore: bool,
        _action: char,
    ) {
    }

    fn esc_dispatch(&mut self, _intermediates: &[u8], _ignore: bool, _byte: u8) {}
}
