//!
//! # Consistency Classification
//!
//! Runs the consistency rules over every net and every terminal stack,
//! producing exactly one diagnostic outcome per physical terminal, plus
//! rows for netlist connectivity with no terminal at all. Classification
//! is a pure pass over the already-correlated in-memory structures; it
//! performs no I/O and never fails. Every condition it detects is a
//! reportable layout/netlist defect, not a tool error.
//!

// Std-Lib
use std::collections::{BTreeMap, BTreeSet};

// Local Imports
use crate::config::{PortKind, StackJob};
use crate::correlate::{Correlation, GlobalTerminal, NetSource, TerminalStack, TextStatus};
use crate::netlist::{NetBinding, Netlist};
use crate::report::{fmt_coord, ReportRow};

///
/// # Check Outcome Enumeration
///
/// The closed set of diagnostic classifications, in precedence order:
/// the first applicable outcome wins for each terminal or net.
///
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CheckOutcome {
    /// Terminal with no corresponding net in the netlist
    NoNet,
    /// Netlist connectivity with no matching terminal
    NoPort,
    /// Expected net-name label absent or inconsistent
    NoText,
    /// Unconnected pass-through member of a via stack; informational
    Blank,
    /// Via chain broken on an intermediate chip
    NoTsv,
    /// Via stack not spanning every chip expected to carry its net
    NoConnection,
    /// Via stack members of differing size
    Size,
    /// Coupled coil pair without opposing windings
    Winding,
    /// Coil stack with more than two members
    MultiTci,
    /// Coil with no coupling partner
    Floating,
    /// None of the above
    Ok,
}
impl std::fmt::Display for CheckOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let s = match self {
            CheckOutcome::NoNet => "NO_NET",
            CheckOutcome::NoPort => "NO_PORT",
            CheckOutcome::NoText => "NO_TEXT",
            CheckOutcome::Blank => "BLANK",
            CheckOutcome::NoTsv => "NO_TSV",
            CheckOutcome::NoConnection => "NO_CONNECTION",
            CheckOutcome::Size => "SIZE",
            CheckOutcome::Winding => "WINDING",
            CheckOutcome::MultiTci => "MULTI_TCI",
            CheckOutcome::Floating => "FLOATING",
            CheckOutcome::Ok => "OK",
        };
        write!(f, "{}", s)
    }
}

/// Classify every terminal and net of the correlated stack.
///
/// `bindings` parallels `job.chips`; `top` is the top-level netlist, whose
/// net connectivity drives the nothing-in-the-layout rows. Row order is
/// deterministic: stacks in correlation order with members bottom-to-top,
/// then missing-terminal rows, then netlist-only rows sorted by net.
pub fn classify(
    job: &StackJob,
    top: &Netlist,
    bindings: &[NetBinding],
    corr: &Correlation,
) -> Vec<ReportRow> {
    let mut rows = Vec::new();
    for stack in &corr.stacks {
        match stack.kind {
            PortKind::Tsv => classify_tsv(job, bindings, corr, stack, &mut rows),
            PortKind::Coil => classify_coil(corr, stack, &mut rows),
        }
    }
    netlist_only_rows(job, top, corr, &mut rows);
    rows
}

/// Per-terminal outcomes that pre-empt any stack-level classification
fn terminal_outcome(term: &GlobalTerminal) -> Option<CheckOutcome> {
    if term.source == NetSource::Unresolved {
        return Some(CheckOutcome::NoNet);
    }
    match term.text {
        TextStatus::Missing | TextStatus::Mismatch => Some(CheckOutcome::NoText),
        _ => None,
    }
}

/// Classify one via stack: per-net chain continuity across the chips the
/// netlist expects, blank pass-through members, and size consistency.
fn classify_tsv(
    job: &StackJob,
    bindings: &[NetBinding],
    corr: &Correlation,
    stack: &TerminalStack,
    rows: &mut Vec<ReportRow>,
) {
    // Partition members: named net groups, blanks, and dangling terminals
    let mut net_groups: BTreeMap<&String, Vec<usize>> = BTreeMap::new();
    let mut blanks: Vec<usize> = Vec::new();
    let mut dangling: Vec<usize> = Vec::new();
    for m in &stack.members {
        let term = &corr.terminals[*m];
        match (&term.net, term.source) {
            (Some(net), _) => net_groups.entry(net).or_default().push(*m),
            (None, NetSource::PassThrough) => blanks.push(*m),
            (None, _) => dangling.push(*m),
        }
    }
    let blank_chips: BTreeSet<usize> = blanks.iter().map(|m| corr.terminals[*m].chip).collect();

    for (net, members) in &net_groups {
        // Chips the netlist wires this net to
        let expected: BTreeSet<usize> = bindings
            .iter()
            .enumerate()
            .filter(|(_, b)| b.nets.iter().any(|n| &n == net))
            .map(|(c, _)| c)
            .collect();
        // Physically present chips: this net's members, plus blank fills
        let present: BTreeSet<usize> = members
            .iter()
            .map(|m| corr.terminals[*m].chip)
            .chain(blank_chips.iter().copied())
            .collect();
        let gaps: Vec<usize> = expected.difference(&present).copied().collect();
        // Connectivity is only demanded of nets spanning two or more chips
        let chain = if expected.len() < 2 || gaps.is_empty() {
            None
        } else {
            let lo = *present.iter().next().unwrap();
            let hi = *present.iter().next_back().unwrap();
            if gaps.iter().any(|g| lo < *g && *g < hi) {
                Some(CheckOutcome::NoTsv)
            } else {
                Some(CheckOutcome::NoConnection)
            }
        };
        // Size consistency across the stack members, blanks included
        let size_ok = {
            let mut sizes = members
                .iter()
                .chain(blanks.iter())
                .map(|m| corr.terminals[*m].size);
            let first = sizes.next();
            sizes.all(|s| Some(s) == first)
        };
        for m in members {
            let term = &corr.terminals[*m];
            let outcome = terminal_outcome(term)
                .or(chain)
                .or(if size_ok { None } else { Some(CheckOutcome::Size) })
                .unwrap_or(CheckOutcome::Ok);
            rows.push(ReportRow::terminal(term, outcome, size_detail(term, job)));
        }
        // One missing-terminal row per expected chip with nothing there
        for gap in gaps {
            rows.push(ReportRow {
                instance: Some(job.chips[gap].instance.clone()),
                net: Some((*net).clone()),
                kind: Some(PortKind::Tsv),
                x: Some(stack.x),
                y: Some(stack.y),
                outcome: CheckOutcome::NoPort,
                detail: String::new(),
            });
        }
    }
    // Pass-throughs are informational; dangling terminals are defects
    for m in blanks {
        let term = &corr.terminals[m];
        rows.push(ReportRow::terminal(
            term,
            CheckOutcome::Blank,
            size_detail(term, job),
        ));
    }
    for m in dangling {
        let term = &corr.terminals[m];
        rows.push(ReportRow::terminal(
            term,
            CheckOutcome::NoNet,
            size_detail(term, job),
        ));
    }
}

/// Classify one coil stack: exactly two members with opposing windings
/// couple correctly; anything else reports per the multiplicity.
fn classify_coil(corr: &Correlation, stack: &TerminalStack, rows: &mut Vec<ReportRow>) {
    let members = &stack.members;
    let group = match members.len() {
        1 => Some(CheckOutcome::Floating),
        2 => {
            let w0 = corr.terminals[members[0]].winding;
            let w1 = corr.terminals[members[1]].winding;
            // Coupled faces wind oppositely when viewed from one side
            if w0 != w1 {
                None
            } else {
                Some(CheckOutcome::Winding)
            }
        }
        _ => Some(CheckOutcome::MultiTci),
    };
    for m in members {
        let term = &corr.terminals[*m];
        let outcome = terminal_outcome(term).or(group).unwrap_or(CheckOutcome::Ok);
        let detail = if term.winding > 0 { "@+" } else { "@-" };
        rows.push(ReportRow::terminal(term, outcome, detail.to_string()));
    }
}

/// Emit one row per connected netlist net absent from the layout
/// everywhere. "Connected" means wired to two or more instances of the top
/// cell; single-ended nets have no stack-level connectivity to demand.
fn netlist_only_rows(job: &StackJob, top: &Netlist, corr: &Correlation, rows: &mut Vec<ReportRow>) {
    let connected: BTreeSet<String> = top
        .connected_nets(&job.top_cell)
        .into_iter()
        .collect();
    let seen: BTreeSet<&String> = corr
        .terminals
        .iter()
        .filter_map(|t| t.net.as_ref())
        .collect();
    for net in connected {
        if !seen.contains(&net) {
            rows.push(ReportRow {
                instance: None,
                net: Some(net),
                kind: None,
                x: None,
                y: None,
                outcome: CheckOutcome::NoPort,
                detail: String::new(),
            });
        }
    }
}

/// Render a terminal's footprint size, in user units
fn size_detail(term: &GlobalTerminal, job: &StackJob) -> String {
    format!(
        "{}x{}",
        fmt_coord(term.size.0 as f64 * job.tolerance),
        fmt_coord(term.size.1 as f64 * job.tolerance)
    )
}
