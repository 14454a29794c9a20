//! Command classification and quoting.

/// Maximum accepted command length in bytes.
pub const MAX_COMMAND_LENGTH: usize = 4096;

/// Full-screen editors. Requests for these are redirected to the file API.
pub const EDITORS: &[&str] = &[
    "vi", "vim", "nvim", "nano", "emacs", "pico", "micro", "joe", "ne",
];

/// Programs that need direct terminal control and are never run.
pub const INTERACTIVE_PROGRAMS: &[&str] = &[
    "less", "more", "most", "top", "htop", "btop", "atop", "iotop", "watch", "tmux", "screen",
    "man", "ssh", "telnet", "ftp", "sftp", "mc", "ranger", "nmtui", "alsamixer",
];

/// What a command line asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandKind {
    /// Ordinary line-oriented command.
    Plain,
    /// A full-screen editor on `path` (empty when no file was named).
    Editor { path: String },
    /// A pager, multiplexer or other full-screen program.
    Interactive { program: String },
}

/// Classify a command line by its first word, looking through `sudo`.
pub fn classify(command: &str) -> CommandKind {
    let mut words = command.split_whitespace().peekable();
    if words.peek() == Some(&"sudo") {
        words.next();
        // Skip sudo's own options, e.g. `sudo -E vim`.
        while matches!(words.peek(), Some(w) if w.starts_with('-')) {
            words.next();
        }
    }

    let Some(first) = words.next() else {
        return CommandKind::Plain;
    };
    // `/usr/bin/vim` and `vim` are the same program.
    let program = first.rsplit('/').next().unwrap_or(first);

    if EDITORS.contains(&program) {
        let path = words
            .find(|w| !w.starts_with('-') && !w.starts_with('+'))
            .unwrap_or_default()
            .to_string();
        return CommandKind::Editor { path };
    }

    if INTERACTIVE_PROGRAMS.contains(&program) {
        return CommandKind::Interactive {
            program: program.to_string(),
        };
    }

    CommandKind::Plain
}

/// Reason a command is refused before classification.
pub fn check_command(command: &str) -> Result<(), String> {
    if command.trim().is_empty() {
        return Err("command cannot be empty".to_string());
    }
    if command.len() > MAX_COMMAND_LENGTH {
        return Err(format!(
            "command too long: {} bytes (max {})",
            command.len(),
            MAX_COMMAND_LENGTH
        ));
    }
    if command.contains('\0') {
        return Err("command contains a NUL byte".to_string());
    }
    if command.contains('\n') || command.contains('\r') {
        return Err("command must be a single line".to_string());
    }
    Ok(())
}

/// Quote `value` as a single POSIX shell word.
pub fn shell_quote(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('\'');
    for c in value.chars() {
        if c == '\'' {
            quoted.push_str("'\\''");
        } else {
            quoted.push(c);
        }
    }
    quoted.push('\'');
    quoted
}

/// Sanitize a command string for logging.
pub fn sanitize_for_display(command: &str) -> String {
    command
        .chars()
        .filter(|c| !c.is_control() || *c == '\t')
        .take(200)
        .collect()
}
