//! Terminal-encoding detection.
//!
//! Legacy BBS clients render CP437 box art; modern terminal emulators
//! expect UTF-8. The backend runs one listener per encoding, and the
//! gateway picks which to dial from the hints an SSH client provides:
//! locale environment variables first, then the terminal type. A plain
//! TCP connection carries no hints and always classifies as CP437.

use std::collections::HashMap;
use std::fmt;

/// Locale variables consulted, in priority order.
const ENV_KEYS: [&str; 3] = ["LANG", "LC_ALL", "LC_CTYPE"];

/// Terminal types (substring match, lower-case) that indicate a UTF-8
/// capable emulator.
const UTF8_TERMS: [&str; 11] = [
    "xterm",
    "xterm-color",
    "xterm-256color",
    "screen",
    "screen-256color",
    "rxvt-unicode",
    "konsole",
    "gnome",
    "linux",
    "vt220",
    "vt100",
];

/// Terminal types (substring match, lower-case) used by CP437-native
/// BBS clients.
const CP437_TERMS: [&str; 6] = [
    "ansi",
    "ansi-bbs",
    "ansi-mono",
    "ansi-color",
    "pcansi",
    "scoansi",
];

/// The character encoding a session is classified as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TermEncoding {
    Utf8,
    Cp437,
}

impl TermEncoding {
    pub fn as_str(self) -> &'static str {
        match self {
            TermEncoding::Utf8 => "utf8",
            TermEncoding::Cp437 => "cp437",
        }
    }
}

impl fmt::Display for TermEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify a session from its environment variables and terminal type.
///
/// The environment wins over the terminal type; within each source the
/// first match wins. Anything unrecognized is CP437, the safe default
/// for a BBS audience.
pub fn detect(env: &HashMap<String, String>, term: Option<&str>) -> TermEncoding {
    for key in ENV_KEYS {
        if let Some(value) = env.get(key) {
            let upper = value.to_ascii_uppercase();
            if upper.contains("UTF-8") || upper.contains("UTF8") {
                return TermEncoding::Utf8;
            }
        }
    }

    if let Some(term) = term {
        let term = term.trim().to_ascii_lowercase();
        if !term.is_empty() {
            if UTF8_TERMS.iter().any(|known| term.contains(known)) {
                return TermEncoding::Utf8;
            }
            if CP437_TERMS.iter().any(|known| term.contains(known)) {
                return TermEncoding::Cp437;
            }
        }
    }

    TermEncoding::Cp437
}
