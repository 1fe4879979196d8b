//! Formatted output helpers for CLI commands.
//!
//! Reports go to stdout; everything else is logged to stderr.

use std::io::Write;

use serde::Serialize;

const GREEN: &str = "\x1b[32m";
const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const DIM: &str = "\x1b[2m";
const RESET: &str = "\x1b[0m";

/// Result of one host readiness check.
#[derive(Debug, Clone, Serialize)]
pub struct Check {
    /// What was checked.
    pub name: &'static str,
    /// Whether it passed.
    pub ok: bool,
    /// Whether a failure prevents container runs.
    pub required: bool,
    /// Supporting detail.
    pub detail: String,
}

impl Check {
    /// A check that must pass.
    pub const fn required(name: &'static str, ok: bool, detail: String) -> Self {
        Self {
            name,
            ok,
            required: true,
            detail,
        }
    }

    /// A check whose failure is only informational.
    pub const fn optional(name: &'static str, ok: bool, detail: String) -> Self {
        Self {
            name,
            ok,
            required: false,
            detail,
        }
    }
}

/// Writes `value` as pretty JSON to stdout.
///
/// # Errors
///
/// Returns an error if serialization or the write fails.
pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, value)?;
    writeln!(stdout)?;
    Ok(())
}

/// Prints one line per check.
#[allow(clippy::print_stdout)]
pub fn print_checks(checks: &[Check]) {
    for check in checks {
        let mark = match (check.ok, check.required) {
            (true, _) => format!("{GREEN}ok{RESET}  "),
            (false, true) => format!("{RED}FAIL{RESET}"),
            (false, false) => format!("{YELLOW}warn{RESET}"),
        };
        println!("  {mark} {:<16} {DIM}{}{RESET}", check.name, check.detail);
    }
}

/// Formats a byte count into a human-readable string (e.g., "128.0 MiB").
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn format_bytes(bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = KIB * 1024;
    const GIB: u64 = MIB * 1024;

    if bytes >= GIB {
        format!("{:.1} GiB", bytes as f64 / GIB as f64)
    } else if bytes >= MIB {
        format!("{:.1} MiB", bytes as f64 / MIB as f64)
    } else if bytes >= KIB {
        format!("{:.1} KiB", bytes as f64 / KIB as f64)
    } else {
        format!("{bytes} B")
    }
}
