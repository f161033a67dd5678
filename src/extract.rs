//!
//! # Terminal Extraction
//!
//! Walks a decoded GDSII library ([gds21::GdsLibrary]) and produces, per
//! chip, the list of raw terminal occurrences: placements of configured
//! port cells, recognized by a rectangle on the rule's layer/datatype,
//! with the composed local placement accumulated through arbitrary
//! structure nesting, and any adjacent net-name label text.
//!
//! All coordinates here are chip-local database units; placement into the
//! stack's shared space happens in [crate::correlate].
//!

// Std-Lib
use std::collections::{HashMap, HashSet};

// Crates.io
use gds21::{GdsArrayRef, GdsBoundary, GdsElement, GdsLibrary, GdsPoint, GdsStruct, GdsStructRef};

// Local Imports
use crate::config::{ChipPlacement, LayerSpec};
use crate::error::{ErrorContext, HasErrors, StackError, StackResult};
use crate::geom::{BoundBox, Orientation, Point, Transform};

/// # Raw Terminal
///
/// One recognized port-cell placement, in chip-local database units.
#[derive(Debug, Clone, PartialEq)]
pub struct RawTerminal {
    /// Index of the matched rule within the chip's `ports`
    pub rule: usize,
    /// Placed port-cell origin
    pub origin: Point,
    /// Composed local orientation of the placement
    pub orientation: Orientation,
    /// Recognition-shape footprint, promoted to chip-local coordinates
    pub bbox: BoundBox,
    /// Net-name label read from the layout, when one was found
    pub text: Option<String>,
}

/// Extract all of `chip`'s terminals from the decoded library `lib`.
/// Returned in discovery order: depth-first element order of the top
/// structure, arrays expanded row-major.
pub fn extract(chip: &ChipPlacement, lib: &GdsLibrary) -> StackResult<Vec<RawTerminal>> {
    TerminalExtractor::new(chip, lib)?.extract()
}

/// A port promoted to some structure's local coordinates, pre-placement
#[derive(Debug, Clone)]
struct CellPort {
    rule: usize,
    origin: Point,
    orientation: Orientation,
    bbox: BoundBox,
}

/// # Terminal Extractor
///
/// Recursive walker over a chip's structure tree. Ports are resolved once
/// per structure and memoized, then instantiated through each placement,
/// so deep or repeated nesting costs one pass per structure definition.
struct TerminalExtractor<'a> {
    chip: &'a ChipPlacement,
    /// Structure index, by name
    index: HashMap<&'a str, &'a GdsStruct>,
    /// Memoized per-structure promoted ports
    ports: HashMap<String, Vec<CellPort>>,
    /// Names on the current recursion path, for cycle detection
    pending: HashSet<String>,
    ctx_stack: Vec<ErrorContext>,
}
impl<'a> TerminalExtractor<'a> {
    fn new(chip: &'a ChipPlacement, lib: &'a GdsLibrary) -> StackResult<Self> {
        let mut index = HashMap::new();
        for strukt in &lib.structs {
            index.insert(strukt.name.as_str(), strukt);
        }
        Ok(Self {
            chip,
            index,
            ports: HashMap::new(),
            pending: HashSet::new(),
            ctx_stack: vec![
                ErrorContext::Chip(chip.instance.clone()),
                ErrorContext::Library(lib.name.clone()),
            ],
        })
    }
    /// Produce the chip's full terminal list
    fn extract(&mut self) -> StackResult<Vec<RawTerminal>> {
        let top = self.chip.layout_name.clone();
        let cell_ports = self.struct_ports(&top)?;
        let texts = self.top_texts(&top)?;
        Ok(self.assign_texts(cell_ports, texts))
    }
    /// Resolve the promoted ports of structure `name`, memoized.
    fn struct_ports(&mut self, name: &str) -> StackResult<Vec<CellPort>> {
        if let Some(ports) = self.ports.get(name) {
            return Ok(ports.clone());
        }
        if !self.pending.insert(name.to_string()) {
            return self.fail(format!("Structure reference cycle through {}", name));
        }
        let strukt = match self.index.get(name) {
            Some(s) => *s,
            None => return self.fail(format!("Could not find structure {}", name)),
        };
        self.ctx_stack.push(ErrorContext::Struct(name.to_string()));
        let mut ports = Vec::new();
        for elem in &strukt.elems {
            match elem {
                GdsElement::GdsStructRef(sref) => {
                    ports.extend(self.placed_ports(sref)?);
                }
                GdsElement::GdsArrayRef(aref) => {
                    ports.extend(self.arrayed_ports(aref)?);
                }
                GdsElement::GdsBoundary(boundary) => {
                    if let Some(port) = self.boundary_port(name, boundary) {
                        ports.push(port);
                    }
                }
                GdsElement::GdsPath(p) => self.warn_unexpected("path", p.layer, p.datatype),
                GdsElement::GdsBox(b) => self.warn_unexpected("box", b.layer, b.boxtype),
                // Texts are handled separately, on the top structure
                _ => (),
            }
        }
        self.ctx_stack.pop();
        self.pending.remove(name);
        self.ports.insert(name.to_string(), ports.clone());
        Ok(ports)
    }
    /// Promote a referenced structure's ports through its placement
    fn placed_ports(&mut self, sref: &GdsStructRef) -> StackResult<Vec<CellPort>> {
        self.ctx_stack.push(ErrorContext::Instance(sref.name.clone()));
        let orientation = Orientation::from_strans(&sref.strans).map_err(|e| self.err(e.to_string()))?;
        let child = self.struct_ports(&sref.name)?;
        let placed = place(
            &child,
            orientation,
            Point::new(sref.xy.x as i64, sref.xy.y as i64),
        );
        self.ctx_stack.pop();
        Ok(placed)
    }
    /// Expand an array reference element-wise and promote each placement
    fn arrayed_ports(&mut self, aref: &GdsArrayRef) -> StackResult<Vec<CellPort>> {
        self.ctx_stack.push(ErrorContext::Array(aref.name.clone()));
        // Only rectangular, axis-aligned arrays are supported
        if aref.xy[1].y != aref.xy[0].y || aref.xy[2].x != aref.xy[0].x {
            return self.fail("Invalid Non-Rectangular GDS Array");
        }
        if aref.cols <= 0 || aref.rows <= 0 {
            return self.fail("Invalid GDS Array row/column count");
        }
        let orientation = Orientation::from_strans(&aref.strans).map_err(|e| self.err(e.to_string()))?;
        let child = self.struct_ports(&aref.name)?;
        let xstep = (aref.xy[1].x as i64 - aref.xy[0].x as i64) / aref.cols as i64;
        let ystep = (aref.xy[2].y as i64 - aref.xy[0].y as i64) / aref.rows as i64;
        let mut placed = Vec::new();
        for row in 0..aref.rows as i64 {
            for col in 0..aref.cols as i64 {
                let loc = Point::new(
                    aref.xy[0].x as i64 + col * xstep,
                    aref.xy[0].y as i64 + row * ystep,
                );
                placed.extend(place(&child, orientation, loc));
            }
        }
        self.ctx_stack.pop();
        Ok(placed)
    }
    /// Match a boundary against the chip's recognition rules.
    /// Returns a port anchored at the enclosing structure's origin.
    fn boundary_port(&mut self, strukt: &str, boundary: &GdsBoundary) -> Option<CellPort> {
        let mut layer_matched = false;
        let mut rule = None;
        for (idx, r) in self.chip.ports.iter().enumerate() {
            if r.layer == boundary.layer && r.datatype == boundary.datatype {
                layer_matched = true;
                if r.cells.iter().any(|c| c == strukt) {
                    rule = Some(idx);
                    break;
                }
            }
        }
        let rule = match rule {
            Some(idx) => idx,
            None => {
                if layer_matched {
                    log::warn!(
                        "Layer {}-{} in unexpected cell {} ignored",
                        boundary.layer,
                        boundary.datatype,
                        strukt
                    );
                }
                return None;
            }
        };
        if !is_box(&boundary.xy) {
            log::warn!(
                "Layer {}-{} shape in {} is not rectangular; ignored",
                boundary.layer,
                boundary.datatype,
                strukt
            );
            return None;
        }
        let pts: Vec<Point> = boundary
            .xy
            .iter()
            .map(|p| Point::new(p.x as i64, p.y as i64))
            .collect();
        Some(CellPort {
            rule,
            origin: Point::new(0, 0),
            orientation: Orientation::R0,
            bbox: BoundBox::of_points(&pts)?,
        })
    }
    /// Note recognition-layer geometry of kinds we do not expect
    fn warn_unexpected(&self, kind: &str, layer: i16, datatype: i16) {
        if self
            .chip
            .ports
            .iter()
            .any(|r| r.layer == layer && r.datatype == datatype)
        {
            log::warn!(
                "Layer {}-{} in unexpected {} element ignored",
                layer,
                datatype,
                kind
            );
        }
    }
    /// Collect labels from the top structure, on any rule's text layer
    fn top_texts(&mut self, top: &str) -> StackResult<Vec<(LayerSpec, Point, String)>> {
        let strukt = match self.index.get(top) {
            Some(s) => *s,
            None => return self.fail(format!("Could not find structure {}", top)),
        };
        let text_layers: HashSet<LayerSpec> =
            self.chip.ports.iter().filter_map(|r| r.text).collect();
        let mut texts = Vec::new();
        for elem in &strukt.elems {
            if let GdsElement::GdsTextElem(t) = elem {
                let spec = LayerSpec::new(t.layer, t.texttype);
                if text_layers.contains(&spec) {
                    texts.push((spec, Point::new(t.xy.x as i64, t.xy.y as i64), t.string.clone()));
                }
            }
        }
        Ok(texts)
    }
    /// Pair each label with the terminal footprint containing it, and emit
    /// the final [RawTerminal] list. Label absence is recorded, not fatal.
    fn assign_texts(
        &self,
        ports: Vec<CellPort>,
        texts: Vec<(LayerSpec, Point, String)>,
    ) -> Vec<RawTerminal> {
        let mut terminals: Vec<RawTerminal> = ports
            .into_iter()
            .map(|p| RawTerminal {
                rule: p.rule,
                origin: p.origin,
                orientation: p.orientation,
                bbox: p.bbox,
                text: None,
            })
            .collect();
        for (spec, loc, string) in texts {
            let mut assigned: Option<Point> = None;
            for term in terminals.iter_mut() {
                if self.chip.ports[term.rule].text != Some(spec) {
                    continue;
                }
                if !term.bbox.contains(&loc) {
                    continue;
                }
                match (&assigned, &term.text) {
                    (Some(prior), _) if *prior != term.origin => {
                        log::warn!(
                            "Text {} at ({}, {}) lands in multiple ports in {}",
                            string,
                            loc.x,
                            loc.y,
                            self.chip.layout_name
                        );
                    }
                    (_, Some(existing)) if *existing != string => {
                        log::warn!(
                            "Port at ({}, {}) in {} labeled both {} and {}",
                            term.origin.x,
                            term.origin.y,
                            self.chip.layout_name,
                            existing,
                            string
                        );
                    }
                    _ => {
                        term.text = Some(string.clone());
                        assigned = Some(term.origin);
                    }
                }
            }
            if assigned.is_none() {
                log::warn!(
                    "Unable to map text {} at ({}, {}) in {}",
                    string,
                    loc.x,
                    loc.y,
                    self.chip.layout_name
                );
            }
        }
        terminals
    }
}
impl<'a> HasErrors for TerminalExtractor<'a> {
    fn err(&self, msg: impl Into<String>) -> StackError {
        StackError::Extract {
            message: msg.into(),
            stack: self.ctx_stack.clone(),
        }
    }
}

/// Promote `ports` through one placement: rigid `orientation` then
/// translation to `loc`, composing each port's own orientation.
fn place(ports: &[CellPort], orientation: Orientation, loc: Point) -> Vec<CellPort> {
    let trans = Transform::from_placement(orientation, loc.x as f64, loc.y as f64, 1.0);
    ports
        .iter()
        .map(|p| CellPort {
            rule: p.rule,
            origin: p.origin.transform(&trans),
            orientation: orientation.cascade(p.orientation),
            bbox: p.bbox.transform(&trans),
        })
        .collect()
}

/// True if `pts` form a closed, axis-aligned rectangle:
/// five points, first and last equal, alternating horizontal and vertical
/// segments.
fn is_box(pts: &[GdsPoint]) -> bool {
    if pts.len() != 5 || pts[0] != pts[4] {
        return false;
    }
    let mut vertical = pts[0].y != pts[1].y;
    for k in 0..4 {
        if vertical {
            if pts[k].x != pts[k + 1].x || pts[k].y == pts[k + 1].y {
                return false;
            }
        } else {
            if pts[k].y != pts[k + 1].y || pts[k].x == pts[k + 1].x {
                return false;
            }
        }
        vertical = !vertical;
    }
    true
}
