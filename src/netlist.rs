//!
//! # Netlist Model
//!
//! Reads the slice of CDL-format circuit data the correlation engine needs:
//! subcircuit definitions with their ordered formal pin lists, and the
//! instance cards of each subcircuit body with their ordered actual nets.
//! From those it resolves, per chip placement, the pin-position-to-net
//! [NetBinding] used to name terminals.
//!
//! CDL line structure handled here: `*` comment lines, blank lines,
//! and `+` continuation lines (joined before interpretation, wherever they
//! fall). Directives are matched case-insensitively.
//!

// Std-Lib
use std::collections::{HashMap, HashSet};
use std::io::{BufRead, BufReader};
use std::path::Path;

// Local Imports
use crate::config::ChipPlacement;
use crate::error::{ErrorContext, HasErrors, StackError, StackResult};

/// One instance card: `X<name> <nets...> <master>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instance {
    /// Instance name, including the leading `X`
    pub name: String,
    /// Master subcircuit name
    pub master: String,
    /// Ordered actual net names
    pub nets: Vec<String>,
}

/// # Parsed Netlist
///
/// Subcircuit definitions and per-subcircuit instance cards.
/// All other CDL content (devices, parameters, control cards) is skipped;
/// the correlation engine only consumes connectivity structure.
#[derive(Debug, Clone, Default)]
pub struct Netlist {
    /// Subcircuit name to ordered formal pin list
    pub subckts: HashMap<String, Vec<String>>,
    /// Parent subcircuit name to its instance cards, by instance name
    instances: HashMap<String, HashMap<String, Instance>>,
}
impl Netlist {
    /// Parse netlist text
    pub fn parse(text: &str) -> StackResult<Self> {
        let mut parser = NetlistParser::default();
        for line in text.lines() {
            parser.line(line)?;
        }
        parser.finish()
    }
    /// Read and parse the netlist file at path `fname`
    pub fn open(fname: impl AsRef<Path>) -> StackResult<Self> {
        let fname = fname.as_ref();
        let file = std::fs::File::open(fname).map_err(|e| {
            StackError::msg(format!("Could not open netlist {:?}: {}", fname, e))
        })?;
        let mut parser = NetlistParser::default();
        for line in BufReader::new(file).lines() {
            parser.line(&line?)?;
        }
        parser.finish()
    }
    /// Get the ordered formal pins of subcircuit `name`
    pub fn pins(&self, name: &str) -> Option<&Vec<String>> {
        self.subckts.get(name)
    }
    /// Get instance `inst` of subcircuit `parent`'s body
    pub fn instance(&self, parent: &str, inst: &str) -> Option<&Instance> {
        self.instances.get(parent)?.get(inst)
    }
    /// Collect the nets of subcircuit `parent` touched by two or more of its
    /// instances. Nets below that degree have no stack-level connectivity to
    /// check.
    pub fn connected_nets(&self, parent: &str) -> HashSet<String> {
        let mut used = HashSet::new();
        let mut connected = HashSet::new();
        if let Some(insts) = self.instances.get(parent) {
            for inst in insts.values() {
                // Count each net once per instance
                let unique: HashSet<&String> = inst.nets.iter().collect();
                for net in unique {
                    if !used.insert(net.clone()) {
                        connected.insert(net.clone());
                    }
                }
            }
        }
        connected
    }
}

/// Line-assembly and card-interpretation state
#[derive(Debug, Default)]
struct NetlistParser {
    /// Netlist under construction
    netlist: Netlist,
    /// Pending logical line, continuations joined
    pending: String,
    /// Name of the subcircuit currently being defined
    scope: Option<String>,
}
impl NetlistParser {
    /// Accept one physical line
    fn line(&mut self, line: &str) -> StackResult<()> {
        // Comments and blanks are dropped entirely, even mid-continuation
        if line.starts_with('*') || line.trim().is_empty() {
            return Ok(());
        }
        if let Some(rest) = line.strip_prefix('+') {
            self.pending.push(' ');
            self.pending.push_str(rest);
            return Ok(());
        }
        self.interpret()?;
        self.pending = line.to_string();
        Ok(())
    }
    /// Interpret the pending logical line, if any
    fn interpret(&mut self) -> StackResult<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let line = std::mem::take(&mut self.pending);
        let words: Vec<&str> = line.split_whitespace().collect();
        let first = words[0];
        if let Some(directive) = first.strip_prefix('.') {
            match directive.to_ascii_lowercase().as_str() {
                "subckt" => {
                    if words.len() < 2 {
                        return self.fail("Malformed .SUBCKT card");
                    }
                    let name = words[1].to_string();
                    let pins = words[2..].iter().map(|s| s.to_string()).collect();
                    self.netlist.subckts.insert(name.clone(), pins);
                    self.scope = Some(name);
                }
                "ends" => {
                    self.scope = None;
                }
                // Every other control card is outside our slice of CDL
                _ => (),
            }
        } else if (first.starts_with('X') || first.starts_with('x')) && words.len() >= 2 {
            if let Some(scope) = &self.scope {
                // `/` separators are permitted before the master name; drop them
                let nets = words[1..words.len() - 1]
                    .iter()
                    .filter(|w| **w != "/")
                    .map(|s| s.to_string())
                    .collect();
                let inst = Instance {
                    name: first.to_string(),
                    master: words[words.len() - 1].to_string(),
                    nets,
                };
                self.netlist
                    .instances
                    .entry(scope.clone())
                    .or_default()
                    .insert(inst.name.clone(), inst);
            }
        }
        Ok(())
    }
    /// Flush the final pending line and return the parsed [Netlist]
    fn finish(mut self) -> StackResult<Netlist> {
        self.interpret()?;
        Ok(self.netlist)
    }
}
impl HasErrors for NetlistParser {
    fn err(&self, msg: impl Into<String>) -> StackError {
        StackError::Netlist {
            message: msg.into(),
            stack: match &self.scope {
                Some(s) => vec![ErrorContext::Netlist(s.clone())],
                None => Vec::new(),
            },
        }
    }
}

/// # Net Binding
///
/// The ordered correspondence between one chip subcircuit's formal pin
/// positions and the global net names wired to them at the top level.
/// Derived once per chip; immutable thereafter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetBinding {
    /// Resolved subcircuit name
    pub subckt: String,
    /// Ordered formal pin names
    pub pins: Vec<String>,
    /// Ordered global net names, one per pin
    pub nets: Vec<String>,
    /// Formal pin name to global net lookup
    by_pin: HashMap<String, String>,
}
impl NetBinding {
    /// Resolve the binding for `chip`, from the top-level netlist `top` and
    /// the chip's own netlist `chip_netlist`.
    ///
    /// Fatal when the top cell lacks the chip's instance, the resolved
    /// subcircuit is undefined, or the instantiation's net count differs
    /// from the definition's pin count: the job cannot be scored without a
    /// coherent netlist.
    pub fn bind(
        top: &Netlist,
        top_cell: &str,
        chip_netlist: &Netlist,
        chip: &ChipPlacement,
    ) -> StackResult<Self> {
        let ctx = |message: String| StackError::Netlist {
            message,
            stack: vec![ErrorContext::Chip(chip.instance.clone())],
        };
        let inst = top.instance(top_cell, &chip.instance).ok_or_else(|| {
            ctx(format!(
                "Instance {} not found in subckt {}",
                chip.instance, top_cell
            ))
        })?;
        let subckt = match &chip.subckt {
            Some(name) => name.clone(),
            None => inst.master.clone(),
        };
        let pins = chip_netlist
            .pins(&subckt)
            .ok_or_else(|| ctx(format!("Subckt {} not found in chip netlist", subckt)))?
            .clone();
        if pins.len() != inst.nets.len() {
            return Err(ctx(format!(
                "Pin count mismatch for {}: subckt {} has {} pins, instantiated with {} nets",
                chip.instance,
                subckt,
                pins.len(),
                inst.nets.len()
            )));
        }
        let by_pin = pins.iter().cloned().zip(inst.nets.iter().cloned()).collect();
        Ok(Self {
            subckt,
            pins,
            nets: inst.nets.clone(),
            by_pin,
        })
    }
    /// Global net at formal pin position `idx`
    pub fn net_at(&self, idx: usize) -> Option<&String> {
        self.nets.get(idx)
    }
    /// Global net wired to formal pin `name`
    pub fn net_for_pin(&self, name: &str) -> Option<&String> {
        self.by_pin.get(name)
    }
    /// Formal pin position of pin `name`
    pub fn position(&self, name: &str) -> Option<usize> {
        self.pins.iter().position(|p| p == name)
    }
}
