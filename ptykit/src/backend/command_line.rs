//! Windows command lines and environment blocks
//!
//! Windows passes a process one command line string, which the C runtime
//! splits back into argv with the `CommandLineToArgvW` rules. These
//! helpers are plain string manipulation so they build and test on every
//! platform.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Quote one argument so `CommandLineToArgvW` yields it back unchanged
pub fn quote_arg(arg: &str) -> String {
    let needs_quotes = arg.is_empty() || arg.contains([' ', '\t', '\n', '\u{b}', '"']);
    if !needs_quotes {
        return arg.to_string();
    }

    let mut quoted = String::with_capacity(arg.len() + 2);
    quoted.push('"');
    let mut backslashes = 0usize;
    for c in arg.chars() {
        match c {
            '\\' => backslashes += 1,
            '"' => {
                // Backslashes before a quote are escapes, and so is the quote
                quoted.extend(std::iter::repeat('\\').take(backslashes * 2 + 1));
                quoted.push('"');
                backslashes = 0;
            }
            _ => {
                quoted.extend(std::iter::repeat('\\').take(backslashes));
                quoted.push(c);
                backslashes = 0;
            }
        }
    }
    // Trailing backslashes precede the closing quote
    quoted.extend(std::iter::repeat('\\').take(backslashes * 2));
    quoted.push('"');
    quoted
}

/// Command line for `file` followed by `args`
pub fn argv_to_command_line(file: &str, args: &[String]) -> String {
    std::iter::once(file)
        .chain(args.iter().map(String::as_str))
        .map(quote_arg)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Command line for `file` followed by an already escaped argument string
pub fn with_raw_args(file: &str, raw: &str) -> String {
    if raw.is_empty() {
        quote_arg(file)
    } else {
        format!("{} {}", quote_arg(file), raw)
    }
}

/// `KEY=value` entries in the order Windows expects
///
/// Keys are unique ignoring case (the last occurrence wins) and sorted
/// case-insensitively.
pub fn environment_entries<I, K, V>(vars: I) -> Vec<String>
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut by_key: BTreeMap<String, (String, String)> = BTreeMap::new();
    for (key, value) in vars {
        let key = key.as_ref();
        if key.is_empty() {
            continue;
        }
        by_key.insert(
            key.to_uppercase(),
            (key.to_string(), value.as_ref().to_string()),
        );
    }
    by_key
        .into_values()
        .map(|(key, value)| format!("{}={}", key, value))
        .collect()
}

/// A `CREATE_UNICODE_ENVIRONMENT` block: entries separated and terminated
/// by NUL, with a final extra NUL
pub fn environment_block(entries: &[String]) -> Vec<u16> {
    let mut block: Vec<u16> = Vec::new();
    for entry in entries {
        block.extend(entry.encode_utf16());
        block.push(0);
    }
    if entries.is_empty() {
        block.push(0);
    }
    block.push(0);
    block
}

/// NUL-terminated UTF-16
pub fn to_wide(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(std::iter::once(0)).collect()
}

/// Locate `file` the way the Windows backends do
///
/// A name that already refers to a file is used as given; otherwise each
/// `;`-separated entry of `search_path` is tried in order.
pub fn resolve_on_path(
    file: &str,
    search_path: Option<&str>,
    exists: impl Fn(&Path) -> bool,
) -> Option<PathBuf> {
    if file.is_empty() {
        return None;
    }
    let direct = PathBuf::from(file);
    if exists(&direct) {
        return Some(direct);
    }

    search_path?
        .split(';')
        .map(str::trim)
        .filter(|dir| !dir.is_empty())
        .map(|dir| join_windows(dir, file))
        .find(|candidate| exists(candidate))
}

fn join_windows(dir: &str, file: &str) -> PathBuf {
    if dir.ends_with('\\') || dir.ends_with('/') {
        PathBuf::from(format!("{}{}", dir, file))
    } else {
        PathBuf::from(format!("{}\\{}", dir, file))
    }
}
