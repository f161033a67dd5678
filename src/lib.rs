//!
//! # Stack21 Stacked-Die Terminal Checker
//!
//! Verifies that the physical terminals of several stacked semiconductor
//! dies, through-silicon vias and inductive coupling coils, line up
//! across the stack and agree with the intended netlist, after each die is
//! placed with its own orientation, offset, and shrink factor.
//!
//! The engine correlates two views of each chip:
//!
//! * The netlist view: a CDL circuit description giving each chip
//!   subcircuit's ordered pin list and the top-level nets wired to it.
//! * The layout view: a decoded GDSII library ([gds21::GdsLibrary]), from
//!   which configured port-cell placements are extracted with their
//!   composed transforms and net-name labels.
//!
//! Terminals are mapped into shared stack coordinates, grouped into
//! vertical stacks by tolerance-rounded position, and every terminal (or
//! netlist net with no terminal) is classified into one
//! [CheckOutcome](check::CheckOutcome): aligned and consistent (`OK`),
//! or one of the defect classes (`NO_PORT`, `NO_TSV`, `WINDING`, ...).
//!
//! Running a job from its configured file paths:
//!
//! ```skip
//! let job = StackJob::open("stack.yaml")?;
//! let rows = StackCheck::run_files(&job)?;
//! report::write_csv(&rows, &mut std::io::stdout())?;
//! ```
//!
//! The engine itself is pure and synchronous: all file I/O happens at the
//! edges ([StackJob::open], [Netlist::open], [gds21::GdsLibrary::open]),
//! and [StackCheck::run] scores already-loaded inputs, keeping the whole
//! computation reentrant for batch use.
//!

pub mod check;
pub mod config;
pub mod correlate;
pub mod error;
pub mod extract;
pub mod geom;
pub mod netlist;
pub mod report;
pub mod ser;

#[cfg(test)]
mod tests;

pub use check::{classify, CheckOutcome};
pub use config::{ChipPlacement, PinOrder, PortKind, PortRule, StackJob, Units};
pub use correlate::{correlate, ChipExtract, Correlation, GlobalTerminal, TerminalStack};
pub use error::{StackError, StackResult};
pub use extract::{extract, RawTerminal};
pub use geom::{Orientation, Point, Transform};
pub use netlist::{NetBinding, Netlist};
pub use report::ReportRow;

use gds21::GdsLibrary;

/// # Stack Checker
///
/// Top-level driver tying the pipeline together:
/// netlist binding, terminal extraction, correlation, classification.
pub struct StackCheck;
impl StackCheck {
    /// Score already-loaded inputs. `chips` parallels `job.chips`, in
    /// stacking order, each carrying the chip's parsed netlist and decoded
    /// layout library.
    pub fn run(
        job: &StackJob,
        top: &Netlist,
        chips: &[(Netlist, GdsLibrary)],
    ) -> StackResult<Vec<ReportRow>> {
        job.validate()?;
        if chips.len() != job.chips.len() {
            return StackError::fail(format!(
                "Run input length {} does not match job chip count {}",
                chips.len(),
                job.chips.len()
            ));
        }
        let mut bindings = Vec::with_capacity(job.chips.len());
        let mut extracts = Vec::with_capacity(job.chips.len());
        for (placement, (chip_netlist, lib)) in job.chips.iter().zip(chips.iter()) {
            let binding = NetBinding::bind(top, &job.top_cell, chip_netlist, placement)?;
            let terminals = extract::extract(placement, lib)?;
            extracts.push(ChipExtract {
                binding: binding.clone(),
                terminals,
                dbu_to_user: correlate::dbu_scale(&lib.units, job.units),
            });
            bindings.push(binding);
        }
        let corr = correlate::correlate(job, &extracts)?;
        Ok(check::classify(job, top, &bindings, &corr))
    }
    /// Load every input named by `job` (the top netlist, and each chip's
    /// netlist and layout) and score them.
    pub fn run_files(job: &StackJob) -> StackResult<Vec<ReportRow>> {
        let top = Netlist::open(&job.top_cdl_file)?;
        let mut chips = Vec::with_capacity(job.chips.len());
        for placement in &job.chips {
            let chip_netlist = Netlist::open(&placement.cdl_file)?;
            let lib = GdsLibrary::open(&placement.gds_file)?;
            chips.push((chip_netlist, lib));
        }
        Self::run(job, &top, &chips)
    }
}
