//! Output processing and sanitization.
//!
//! Raw channel output carries ANSI sequences, the echoed command and the
//! shell prompt. [`OutputSanitizer::clean`] reduces it to what the command
//! itself printed.
//!
//! # Example
//!
//! ```
//! use shell_bridge::output::OutputSanitizer;
//!
//! let raw = b"\x1b[31mRed text\x1b[0m";
//! assert_eq!(OutputSanitizer::strip_ansi(raw), "Red text");
//!
//! assert_eq!(OutputSanitizer::clean(b"$ echo hi\nhi\n$ ", "echo hi"), "hi");
//! ```

mod sanitizer;

pub use sanitizer::{is_prompt_line, OutputSanitizer};
