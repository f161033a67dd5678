//!
//! # Stack Correlation
//!
//! Maps every chip's raw terminals through its placement into the stack's
//! shared user-unit coordinates, assigns each a net name from the chip's
//! [NetBinding] (cross-checked against layout text), and groups the results
//! into vertical [TerminalStack]s keyed by rounded position and kind.
//!
//! Grouping is a single tolerance-rounding step: two terminals share a
//! stack iff their rounded coordinates are bit-equal. The tolerance must be
//! coarse enough that aligned terminals round identically; there is no
//! fuzzy clustering beyond it.
//!

// Std-Lib
use std::collections::BTreeMap;

// Local Imports
use crate::config::{ChipPlacement, PinOrder, PortKind, StackJob};
use crate::error::{StackError, StackResult};
use crate::extract::RawTerminal;
use crate::geom::{round_to, snap, Transform};
use crate::netlist::NetBinding;

/// How a terminal came by its net name (or failed to)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetSource {
    /// Positional netlist binding
    Binding,
    /// Text label, where no positional binding was available
    Text,
    /// Anonymous pass-through: its rule names no text layer and no pins
    PassThrough,
    /// A binding was expected but could not be resolved
    Unresolved,
}

/// Text-label state of a terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextStatus {
    /// Label present and consistent with the netlist
    Found,
    /// The rule configures no text layer; no label expected
    NotExpected,
    /// A label was expected but none was found
    Missing,
    /// The label disagrees with the netlist-derived net
    Mismatch,
}

/// # Global Terminal
///
/// One terminal mapped into stack coordinates and named.
#[derive(Debug, Clone)]
pub struct GlobalTerminal {
    /// Chip index, in stacking order
    pub chip: usize,
    /// Chip instance name
    pub instance: String,
    /// Terminal kind
    pub kind: PortKind,
    /// Rounded grouping key, in tolerance quanta
    pub key: (i64, i64),
    /// Rounded user-unit coordinates
    pub x: f64,
    pub y: f64,
    /// Signed winding of the composed global orientation
    pub winding: i8,
    /// Rounded footprint size, in tolerance quanta
    pub size: (i64, i64),
    /// Resolved global net name
    pub net: Option<String>,
    /// How the net was resolved
    pub source: NetSource,
    /// Label state
    pub text: TextStatus,
}

/// # Terminal Stack
///
/// The set of terminals sharing one rounded position and kind, ordered
/// bottom-to-top by chip. This is the unit the classifier reasons about.
#[derive(Debug, Clone)]
pub struct TerminalStack {
    pub kind: PortKind,
    pub key: (i64, i64),
    pub x: f64,
    pub y: f64,
    /// Member indices into [Correlation::terminals], in chip order
    pub members: Vec<usize>,
}
impl TerminalStack {
    /// The stack's net: the first member with a resolved name
    pub fn net<'c>(&self, corr: &'c Correlation) -> Option<&'c String> {
        self.members
            .iter()
            .find_map(|m| corr.terminals[*m].net.as_ref())
    }
}

/// Correlated view of the whole stack
#[derive(Debug, Clone, Default)]
pub struct Correlation {
    pub terminals: Vec<GlobalTerminal>,
    pub stacks: Vec<TerminalStack>,
}

/// Per-chip inputs to correlation: the resolved net binding, extracted
/// terminals, and the layout's database-unit to user-unit scale.
#[derive(Debug, Clone)]
pub struct ChipExtract {
    pub binding: NetBinding,
    pub terminals: Vec<RawTerminal>,
    /// Size of one database unit, in the job's user unit
    pub dbu_to_user: f64,
}

/// Database-unit to user-unit scale for one decoded library:
/// the library's database-unit size divided by the job unit's size,
/// both in meters. Read per layout source; it may differ between chips.
pub fn dbu_scale(units: &gds21::GdsUnits, user: crate::config::Units) -> f64 {
    units.db_unit() / user.meters()
}

/// Correlate all chips' terminals into [GlobalTerminal]s and group them
/// into [TerminalStack]s. `chips` must parallel `job.chips`, in stacking
/// order; correlation and classification are order-sensitive.
pub fn correlate(job: &StackJob, chips: &[ChipExtract]) -> StackResult<Correlation> {
    if chips.len() != job.chips.len() {
        return StackError::fail(format!(
            "Correlation input length {} does not match job chip count {}",
            chips.len(),
            job.chips.len()
        ));
    }
    let mut corr = Correlation::default();
    for (idx, (placement, extract)) in job.chips.iter().zip(chips.iter()).enumerate() {
        chip_terminals(job, idx, placement, extract, &mut corr.terminals);
    }
    // Group by (kind, rounded position); BTreeMap iteration keeps the
    // stack list deterministic. Member order follows terminal order, which
    // is chip order.
    let mut groups: BTreeMap<(PortKind, i64, i64), Vec<usize>> = BTreeMap::new();
    for (t_idx, term) in corr.terminals.iter().enumerate() {
        groups
            .entry((term.kind, term.key.0, term.key.1))
            .or_default()
            .push(t_idx);
    }
    corr.stacks = groups
        .into_iter()
        .map(|((kind, kx, ky), members)| TerminalStack {
            kind,
            key: (kx, ky),
            x: snap(kx, job.tolerance),
            y: snap(ky, job.tolerance),
            members,
        })
        .collect();
    Ok(corr)
}

/// Map one chip's raw terminals to [GlobalTerminal]s, appending to `out`
fn chip_terminals(
    job: &StackJob,
    chip_idx: usize,
    placement: &ChipPlacement,
    extract: &ChipExtract,
    out: &mut Vec<GlobalTerminal>,
) {
    let scale = placement.shrink * extract.dbu_to_user;
    let trans = Transform::from_placement(
        placement.orientation,
        placement.offset.x,
        placement.offset.y,
        scale,
    );
    // Pair each rule's terminals against pin positions, in the configured
    // order. The ordinal within the rule is the pin-correspondence index.
    let order = rule_order(placement, &extract.terminals);
    let mut ordinals = vec![0usize; extract.terminals.len()];
    let mut next: Vec<usize> = vec![0; placement.ports.len()];
    for t_idx in order {
        let rule = extract.terminals[t_idx].rule;
        ordinals[t_idx] = next[rule];
        next[rule] += 1;
    }
    for (term, ordinal) in extract.terminals.iter().zip(ordinals.iter()) {
        let rule = &placement.ports[term.rule];
        let (gx, gy) = trans.apply(term.origin.x as f64, term.origin.y as f64);
        let key = (round_to(gx, job.tolerance), round_to(gy, job.tolerance));
        let (w, h) = term.bbox.size();
        let size = (
            round_to(w as f64 * scale, job.tolerance),
            round_to(h as f64 * scale, job.tolerance),
        );
        let (net, source, text) = resolve_net(rule, term, *ordinal, &extract.binding);
        out.push(GlobalTerminal {
            chip: chip_idx,
            instance: placement.instance.clone(),
            kind: rule.kind,
            key,
            x: snap(key.0, job.tolerance),
            y: snap(key.1, job.tolerance),
            winding: placement.orientation.cascade(term.orientation).winding(),
            size,
            net,
            source,
            text,
        });
    }
}

/// Terminal indices in pin-pairing order:
/// discovery order as extracted, or sorted by chip-local position.
fn rule_order(placement: &ChipPlacement, terminals: &[RawTerminal]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..terminals.len()).collect();
    if placement.pin_order == PinOrder::SortedPosition {
        order.sort_by_key(|idx| {
            let t = &terminals[*idx];
            (t.rule, t.origin.x, t.origin.y)
        });
    }
    order
}

/// Resolve one terminal's net name.
///
/// The positional binding is authoritative; a text label is cross-checked
/// against it and reported unreliable on disagreement, never fatal. Rules
/// without a text layer or pin list yield anonymous pass-throughs.
fn resolve_net(
    rule: &crate::config::PortRule,
    term: &RawTerminal,
    ordinal: usize,
    binding: &NetBinding,
) -> (Option<String>, NetSource, TextStatus) {
    // Pass-through rules carry no connectivity
    if rule.text.is_none() && rule.pins.is_none() {
        return (None, NetSource::PassThrough, TextStatus::NotExpected);
    }
    // Positional binding: through the rule's pin subset when present,
    // else straight into the formal pin list
    let positional: Option<String> = match &rule.pins {
        Some(pins) => pins
            .get(ordinal)
            .and_then(|pin| binding.net_for_pin(pin))
            .cloned(),
        None => binding.net_at(ordinal).cloned(),
    };
    // Text-derived candidate: a formal pin name, or directly a net name
    let candidate: Option<String> = term.text.as_ref().and_then(|label| {
        binding
            .net_for_pin(label)
            .cloned()
            .or_else(|| binding.nets.iter().find(|n| *n == label).cloned())
    });
    let text = if rule.text.is_none() {
        TextStatus::NotExpected
    } else {
        match (&term.text, &candidate, &positional) {
            (None, _, _) => TextStatus::Missing,
            (Some(_), None, _) => TextStatus::Mismatch,
            (Some(_), Some(c), Some(p)) if c != p => TextStatus::Mismatch,
            _ => TextStatus::Found,
        }
    };
    match (positional, candidate) {
        (Some(net), _) => (Some(net), NetSource::Binding, text),
        (None, Some(net)) => (Some(net), NetSource::Text, text),
        (None, None) => (None, NetSource::Unresolved, text),
    }
}
