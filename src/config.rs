//!
//! # Stack-Job Configuration
//!
//! Defines the job data model: the ordered chip list with per-chip
//! placement (orientation, offset, shrink), port-recognition rules, and the
//! job-wide unit and matching tolerance. Constructed once, immutable for
//! the duration of a run.
//!
//! Jobs are serde-described and may be loaded from JSON, YAML, or TOML
//! files, with the format inferred from the file extension.
//!

// Std-Lib
use std::collections::{HashMap, HashSet};
use std::path::Path;

// Crates.io
use serde::{Deserialize, Serialize};

// Local Imports
use crate::error::{StackError, StackResult};
use crate::geom::Orientation;
use crate::ser::SerializationFormat;

/// Distance Units Enumeration
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Units {
    /// Micrometers, or microns for we olde folke
    #[serde(alias = "um")]
    Micro,
    /// Nanometers
    #[serde(alias = "nm")]
    Nano,
}
impl Units {
    /// Size of one unit, in meters
    pub fn meters(&self) -> f64 {
        match self {
            Units::Micro => 1e-6,
            Units::Nano => 1e-9,
        }
    }
}
impl Default for Units {
    /// Default units are microns
    fn default() -> Units {
        Units::Micro
    }
}

/// Port-Terminal Kind
///
/// Vertical vias must align across every chip carrying their net;
/// inductive coils couple exactly two adjacent chips.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub enum PortKind {
    #[serde(alias = "TSV")]
    Tsv,
    #[serde(alias = "COIL")]
    Coil,
}
impl std::fmt::Display for PortKind {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            PortKind::Tsv => write!(f, "TSV"),
            PortKind::Coil => write!(f, "COIL"),
        }
    }
}

/// # Layer Specification
/// As in seemingly every layout system, this uses two numbers to identify each layer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct LayerSpec(pub i16, pub i16);
impl LayerSpec {
    pub fn new(n1: i16, n2: i16) -> Self {
        Self(n1, n2)
    }
}

/// # Port Recognition Rule
///
/// One rule per recognition layer: terminals are placements of the listed
/// cells containing a rectangle on (`layer`, `datatype`). When `text` is
/// configured, each terminal is expected to carry a net-name label on that
/// layer/texttype pair; rules without one produce anonymous pass-throughs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PortRule {
    /// Terminal kind recognized by this rule
    pub kind: PortKind,
    /// Recognition layer number
    pub layer: i16,
    /// Recognition datatype
    pub datatype: i16,
    /// Accepted port-cell names
    pub cells: Vec<String>,
    /// Net-label text layer/texttype, if labeled
    #[serde(default)]
    pub text: Option<LayerSpec>,
    /// Ordered formal-pin subset this rule's terminals correspond to.
    /// When absent, terminals pair against the subcircuit's full pin list.
    #[serde(default)]
    pub pins: Option<Vec<String>>,
}

/// # Pin-Correspondence Order
///
/// How a rule's terminals are paired against formal pin positions.
/// The pairing directly determines net-name assignment, so it is kept
/// explicit and selectable rather than inherited from decoder iteration
/// order.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum PinOrder {
    /// Layout discovery order: deterministic depth-first element order of
    /// the decoded top structure, arrays expanded row-major.
    #[default]
    Discovery,
    /// Sorted by chip-local (x, y) position before pairing.
    SortedPosition,
}

/// Global placement offset, in user units
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Offset {
    pub x: f64,
    pub y: f64,
}

/// # Chip Placement
///
/// One stacked die: where its netlist and layout come from, and the rigid
/// motion + shrink + offset placing it in the shared stack coordinates.
/// Chips are listed in stacking order, bottom to top.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChipPlacement {
    /// Instance name in the top-level netlist
    pub instance: String,
    /// Subcircuit override; resolved from the top-level instantiation when absent
    #[serde(default)]
    pub subckt: Option<String>,
    /// Per-chip netlist file
    pub cdl_file: String,
    /// Layout (GDSII) file
    pub gds_file: String,
    /// Top structure name within the layout
    pub layout_name: String,
    /// Placement orientation
    #[serde(default)]
    pub orientation: Orientation,
    /// Placement offset, in user units
    #[serde(default)]
    pub offset: Offset,
    /// Uniform shrink factor
    #[serde(default = "default_shrink")]
    pub shrink: f64,
    /// Port recognition rules
    pub ports: Vec<PortRule>,
    /// Terminal-to-pin pairing order
    #[serde(default)]
    pub pin_order: PinOrder,
}
fn default_shrink() -> f64 {
    1.0
}

/// # Stack Verification Job
///
/// The top-level, read-only description of one verification run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StackJob {
    /// Top subcircuit name
    pub top_cell: String,
    /// Reference (top-level) netlist file
    pub top_cdl_file: String,
    /// Coordinate unit for offsets, tolerance, and reporting
    #[serde(default)]
    pub units: Units,
    /// Terminal matching tolerance, in `units`
    pub tolerance: f64,
    /// Ordered chip list, bottom to top
    pub chips: Vec<ChipPlacement>,
}
impl StackJob {
    /// Load a job from file at path `fname`, with the serialization format
    /// inferred from its extension. Validates before returning.
    pub fn open(fname: impl AsRef<Path>) -> StackResult<Self> {
        let fname = fname.as_ref();
        let fmt = SerializationFormat::from_extension(fname).map_err(StackError::from)?;
        let job: StackJob = fmt.open(fname)?;
        job.validate()?;
        Ok(job)
    }
    /// Check the job invariants:
    /// positive tolerance, in-range shrink factors, unique instance names,
    /// and port-cell names bound to a single terminal kind per chip.
    pub fn validate(&self) -> StackResult<()> {
        if !(self.tolerance > 0.0) {
            return Err(StackError::Config(format!(
                "Tolerance must be positive, not {}",
                self.tolerance
            )));
        }
        if self.chips.is_empty() {
            return Err(StackError::Config("Job has no chips".into()));
        }
        let mut seen = HashSet::new();
        for chip in &self.chips {
            if !seen.insert(chip.instance.clone()) {
                return Err(StackError::Config(format!(
                    "Duplicate chip instance name: {}",
                    chip.instance
                )));
            }
            if !(0.1..=1.0).contains(&chip.shrink) {
                return Err(StackError::Config(format!(
                    "Shrink factor for {} out of range: {}",
                    chip.instance, chip.shrink
                )));
            }
            if chip.ports.is_empty() {
                return Err(StackError::Config(format!(
                    "Chip {} has no port rules",
                    chip.instance
                )));
            }
            // A cell may appear in several rules, but always as the same kind
            let mut kinds: HashMap<&str, PortKind> = HashMap::new();
            for rule in &chip.ports {
                for cell in &rule.cells {
                    match kinds.insert(cell, rule.kind) {
                        Some(prior) if prior != rule.kind => {
                            return Err(StackError::Config(format!(
                                "Cell {} on chip {} is defined as both {} and {}",
                                cell, chip.instance, prior, rule.kind
                            )));
                        }
                        _ => (),
                    }
                }
            }
        }
        Ok(())
    }
}
