//!
//! # Report Rows & Rendering
//!
//! The per-terminal result tuple the engine exposes, and a CSV renderer
//! over any [std::io::Write]. Storage policy for the rendered report is
//! the caller's concern; the engine only produces the rows.
//!

// Std-Lib
use std::io::Write;

// Local Imports
use crate::check::CheckOutcome;
use crate::config::PortKind;
use crate::correlate::GlobalTerminal;
use crate::error::StackResult;

/// # Report Row
///
/// One classified result: a physical terminal, a missing-terminal
/// position, or a netlist net with no layout presence (in which case the
/// location fields are empty).
#[derive(Debug, Clone, PartialEq)]
pub struct ReportRow {
    /// Chip instance, when the row concerns one chip
    pub instance: Option<String>,
    /// Global net name, when one was resolved
    pub net: Option<String>,
    /// Terminal kind, when known
    pub kind: Option<PortKind>,
    /// Rounded global coordinates, in user units
    pub x: Option<f64>,
    pub y: Option<f64>,
    /// Diagnostic classification
    pub outcome: CheckOutcome,
    /// Connection summary: coil winding or via size
    pub detail: String,
}
impl ReportRow {
    /// Create the row for one classified [GlobalTerminal]
    pub fn terminal(term: &GlobalTerminal, outcome: CheckOutcome, detail: String) -> Self {
        Self {
            instance: Some(term.instance.clone()),
            net: term.net.clone(),
            kind: Some(term.kind),
            x: Some(term.x),
            y: Some(term.y),
            outcome,
            detail,
        }
    }
}

/// Write `rows` in CSV form to `dest`, one line per row plus a header
pub fn write_csv(rows: &[ReportRow], dest: &mut impl Write) -> StackResult<()> {
    writeln!(dest, "Check,Net,Type,X,Y,Instance,Detail")?;
    for row in rows {
        writeln!(
            dest,
            "{},{},{},{},{},{},{}",
            row.outcome,
            row.net.as_deref().unwrap_or(""),
            row.kind.map(|k| k.to_string()).unwrap_or_default(),
            row.x.map(fmt_coord).unwrap_or_default(),
            row.y.map(fmt_coord).unwrap_or_default(),
            row.instance.as_deref().unwrap_or(""),
            row.detail,
        )?;
    }
    dest.flush()?;
    Ok(())
}

/// Format a user-unit coordinate: fixed six decimals, trailing zeros
/// trimmed
pub(crate) fn fmt_coord(v: f64) -> String {
    let s = format!("{:.6}", v);
    let s = s.trim_end_matches('0').trim_end_matches('.');
    match s {
        "-0" => "0".to_string(),
        _ => s.to_string(),
    }
}
