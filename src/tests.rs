//!
//! # stack21 whole-engine tests
//!
//! Scenario tests driving the full pipeline (netlist binding, extraction,
//! correlation, classification) over in-memory GDSII libraries and CDL
//! text, plus a file-based pass through [StackCheck::run_files].
//!

use gds21::{GdsBoundary, GdsElement, GdsLibrary, GdsPoint, GdsStrans, GdsStruct, GdsStructRef,
            GdsTextElem};

use crate::check::CheckOutcome;
use crate::config::{ChipPlacement, LayerSpec, Offset, PinOrder, PortKind, PortRule, StackJob,
                    Units};
use crate::geom::Orientation;
use crate::netlist::Netlist;
use crate::report::ReportRow;
use crate::{StackCheck, StackResult};

/// A TSV recognition rule: cell `TSV_CELL`, boundary on 10/0, label on 63/0
fn tsv_rule() -> PortRule {
    PortRule {
        kind: PortKind::Tsv,
        layer: 10,
        datatype: 0,
        cells: vec!["TSV_CELL".into()],
        text: Some(LayerSpec::new(63, 0)),
        pins: None,
    }
}
/// The same rule without a label layer: anonymous pass-through vias
fn blank_tsv_rule() -> PortRule {
    PortRule {
        text: None,
        ..tsv_rule()
    }
}
/// A COIL recognition rule: cell `COIL_CELL`, boundary on 20/0, label on 63/1
fn coil_rule() -> PortRule {
    PortRule {
        kind: PortKind::Coil,
        layer: 20,
        datatype: 0,
        cells: vec!["COIL_CELL".into()],
        text: Some(LayerSpec::new(63, 1)),
        pins: None,
    }
}

fn placement(idx: usize, ports: Vec<PortRule>) -> ChipPlacement {
    ChipPlacement {
        instance: format!("X{}", idx),
        subckt: None,
        cdl_file: format!("chip{}.cdl", idx),
        gds_file: format!("chip{}.gds", idx),
        layout_name: "CHIP_TOP".into(),
        orientation: Orientation::R0,
        offset: Offset::default(),
        shrink: 1.0,
        ports,
        pin_order: PinOrder::Discovery,
    }
}
fn job(chips: Vec<ChipPlacement>) -> StackJob {
    StackJob {
        top_cell: "STACK".into(),
        top_cdl_file: "stack.cdl".into(),
        units: Units::Micro,
        tolerance: 0.05,
        chips,
    }
}

/// Top-level netlist: one `CHIP` instance per chip, all wired to `nets`
fn top_netlist(nchips: usize, nets: &[&str]) -> Netlist {
    let mut cdl = format!(".SUBCKT STACK {}\n", nets.join(" "));
    for idx in 0..nchips {
        cdl += &format!("X{} {} CHIP\n", idx, nets.join(" "));
    }
    cdl += ".ENDS\n";
    Netlist::parse(&cdl).unwrap()
}
/// Chip netlist: subckt `CHIP` with formal pins `pins`
fn chip_netlist(pins: &[&str]) -> Netlist {
    Netlist::parse(&format!(".SUBCKT CHIP {}\n.ENDS\n", pins.join(" "))).unwrap()
}

/// One terminal to place in a chip layout
struct Term {
    cell: &'static str,
    /// Placement origin, in dbu (1nm with default library units)
    x: i32,
    y: i32,
    /// Label on the cell's text layer, placed mid-footprint
    label: Option<&'static str>,
    strans: Option<GdsStrans>,
    /// Recognition-square side, in dbu
    size: i32,
}
impl Term {
    fn tsv(x: i32, y: i32, label: Option<&'static str>) -> Self {
        Self {
            cell: "TSV_CELL",
            x,
            y,
            label,
            strans: None,
            size: 10_000,
        }
    }
    fn coil(x: i32, y: i32, label: Option<&'static str>) -> Self {
        Self {
            cell: "COIL_CELL",
            x,
            y,
            label,
            strans: None,
            size: 50_000,
        }
    }
}

/// Build a chip library: one port-cell definition per referenced cell,
/// a `CHIP_TOP` structure placing each [Term], and its labels.
fn chip_lib(terms: &[Term]) -> GdsLibrary {
    let mut lib = GdsLibrary::new("chiplib");
    let mut defined: Vec<(&str, i32)> = Vec::new();
    let mut top = GdsStruct::new("CHIP_TOP");
    for term in terms {
        if !defined.iter().any(|(c, _)| *c == term.cell) {
            defined.push((term.cell, term.size));
        }
        top.elems.push(
            GdsStructRef {
                name: term.cell.into(),
                xy: GdsPoint::new(term.x, term.y),
                strans: term.strans.clone(),
                ..Default::default()
            }
            .into(),
        );
        if let Some(label) = term.label {
            let texttype = if term.cell == "COIL_CELL" { 1 } else { 0 };
            top.elems.push(
                GdsTextElem {
                    string: label.into(),
                    layer: 63,
                    texttype,
                    xy: GdsPoint::new(term.x + term.size / 2, term.y + term.size / 2),
                    ..Default::default()
                }
                .into(),
            );
        }
    }
    for (cell, size) in defined {
        let layer = if cell == "COIL_CELL" { 20 } else { 10 };
        let mut s = GdsStruct::new(cell);
        s.elems.push(square(layer, size));
        lib.structs.push(s);
    }
    lib.structs.push(top);
    lib
}
/// A closed rectangle boundary on (`layer`, 0) spanning (0,0)..(side,side)
fn square(layer: i16, side: i32) -> GdsElement {
    GdsBoundary {
        layer,
        datatype: 0,
        xy: GdsPoint::vec(&[(0, 0), (side, 0), (side, side), (0, side), (0, 0)]),
        ..Default::default()
    }
    .into()
}

/// Rows for net `net`, in engine order
fn rows_for<'r>(rows: &'r [ReportRow], net: &str) -> Vec<&'r ReportRow> {
    rows.iter().filter(|r| r.net.as_deref() == Some(net)).collect()
}
/// Count rows with the given outcome
fn count(rows: &[&ReportRow], outcome: CheckOutcome) -> usize {
    rows.iter().filter(|r| r.outcome == outcome).count()
}

#[test]
fn three_chip_tsv_ok() -> StackResult<()> {
    // One via net, aligned and size-consistent on all three chips
    let job = job(vec![
        placement(0, vec![tsv_rule()]),
        placement(1, vec![tsv_rule()]),
        placement(2, vec![tsv_rule()]),
    ]);
    let top = top_netlist(3, &["VDD_TSV"]);
    let chips: Vec<_> = (0..3)
        .map(|_| {
            (
                chip_netlist(&["P_VDD"]),
                chip_lib(&[Term::tsv(10_000, 5_000, Some("P_VDD"))]),
            )
        })
        .collect();
    let rows = StackCheck::run(&job, &top, &chips)?;
    let vdd = rows_for(&rows, "VDD_TSV");
    assert_eq!(vdd.len(), 3);
    assert_eq!(count(&vdd, CheckOutcome::Ok), 3);
    assert_eq!(vdd[0].x, Some(10.0));
    assert_eq!(vdd[0].y, Some(5.0));
    assert_eq!(vdd[0].detail, "10x10");
    Ok(())
}

#[test]
fn interior_gap_is_no_tsv() -> StackResult<()> {
    // Middle chip lacks the via: chain broken, present members flag NO_TSV,
    // the missing chip flags NO_PORT
    let job = job(vec![
        placement(0, vec![tsv_rule()]),
        placement(1, vec![tsv_rule()]),
        placement(2, vec![tsv_rule()]),
    ]);
    let top = top_netlist(3, &["VDD_TSV"]);
    let with_term = || {
        (
            chip_netlist(&["P_VDD"]),
            chip_lib(&[Term::tsv(10_000, 5_000, Some("P_VDD"))]),
        )
    };
    let without = (chip_netlist(&["P_VDD"]), chip_lib(&[]));
    let chips = vec![with_term(), without, with_term()];
    let rows = StackCheck::run(&job, &top, &chips)?;
    let vdd = rows_for(&rows, "VDD_TSV");
    assert_eq!(count(&vdd, CheckOutcome::NoTsv), 2);
    assert_eq!(count(&vdd, CheckOutcome::NoPort), 1);
    let missing = vdd
        .iter()
        .find(|r| r.outcome == CheckOutcome::NoPort)
        .unwrap();
    assert_eq!(missing.instance.as_deref(), Some("X1"));
    assert_eq!(missing.x, Some(10.0));
    Ok(())
}

#[test]
fn absent_everywhere_is_no_port() -> StackResult<()> {
    // A connected netlist net with no layout terminal on any chip yields a
    // single location-less NO_PORT row
    let job = job(vec![
        placement(0, vec![tsv_rule()]),
        placement(1, vec![tsv_rule()]),
    ]);
    let top = top_netlist(2, &["VDD_TSV", "MISSING"]);
    let chips: Vec<_> = (0..2)
        .map(|_| {
            (
                chip_netlist(&["P_VDD", "P_MISSING"]),
                chip_lib(&[Term::tsv(10_000, 5_000, Some("P_VDD"))]),
            )
        })
        .collect();
    let rows = StackCheck::run(&job, &top, &chips)?;
    let missing = rows_for(&rows, "MISSING");
    assert_eq!(missing.len(), 1);
    assert_eq!(missing[0].outcome, CheckOutcome::NoPort);
    assert_eq!(missing[0].instance, None);
    assert_eq!(missing[0].x, None);
    // The via that is present still scores OK on both chips
    assert_eq!(count(&rows_for(&rows, "VDD_TSV"), CheckOutcome::Ok), 2);
    Ok(())
}

#[test]
fn blank_passthrough_fills_the_chain() -> StackResult<()> {
    // The middle chip's via is an unlabeled pass-through: informational
    // BLANK, and the chain is not broken by it
    let job = job(vec![
        placement(0, vec![tsv_rule()]),
        placement(1, vec![blank_tsv_rule()]),
        placement(2, vec![tsv_rule()]),
    ]);
    let top = top_netlist(3, &["VDD_TSV"]);
    let labeled = || {
        (
            chip_netlist(&["P_VDD"]),
            chip_lib(&[Term::tsv(10_000, 5_000, Some("P_VDD"))]),
        )
    };
    let blank = (
        chip_netlist(&["P_VDD"]),
        chip_lib(&[Term::tsv(10_000, 5_000, None)]),
    );
    let chips = vec![labeled(), blank, labeled()];
    let rows = StackCheck::run(&job, &top, &chips)?;
    assert_eq!(count(&rows_for(&rows, "VDD_TSV"), CheckOutcome::Ok), 2);
    assert_eq!(count(&rows_for(&rows, "VDD_TSV"), CheckOutcome::NoTsv), 0);
    let blanks: Vec<&ReportRow> = rows
        .iter()
        .filter(|r| r.outcome == CheckOutcome::Blank)
        .collect();
    assert_eq!(blanks.len(), 1);
    assert_eq!(blanks[0].instance.as_deref(), Some("X1"));
    assert_eq!(blanks[0].net, None);
    Ok(())
}

#[test]
fn size_mismatch_flags_both_members() -> StackResult<()> {
    let job = job(vec![
        placement(0, vec![tsv_rule()]),
        placement(1, vec![tsv_rule()]),
    ]);
    let top = top_netlist(2, &["VDD_TSV"]);
    let mut big = Term::tsv(10_000, 5_000, Some("P_VDD"));
    big.size = 12_000;
    let chips = vec![
        (
            chip_netlist(&["P_VDD"]),
            chip_lib(&[Term::tsv(10_000, 5_000, Some("P_VDD"))]),
        ),
        (chip_netlist(&["P_VDD"]), chip_lib(&[big])),
    ];
    let rows = StackCheck::run(&job, &top, &chips)?;
    let vdd = rows_for(&rows, "VDD_TSV");
    assert_eq!(count(&vdd, CheckOutcome::Size), 2);
    Ok(())
}

#[test]
fn missing_label_is_no_text() -> StackResult<()> {
    // Both chips carry the via; one lost its label. The positional binding
    // still names it, so the chain holds, but the terminal reports NO_TEXT
    let job = job(vec![
        placement(0, vec![tsv_rule()]),
        placement(1, vec![tsv_rule()]),
    ]);
    let top = top_netlist(2, &["VDD_TSV"]);
    let chips = vec![
        (
            chip_netlist(&["P_VDD"]),
            chip_lib(&[Term::tsv(10_000, 5_000, Some("P_VDD"))]),
        ),
        (
            chip_netlist(&["P_VDD"]),
            chip_lib(&[Term::tsv(10_000, 5_000, None)]),
        ),
    ];
    let rows = StackCheck::run(&job, &top, &chips)?;
    let vdd = rows_for(&rows, "VDD_TSV");
    assert_eq!(count(&vdd, CheckOutcome::Ok), 1);
    assert_eq!(count(&vdd, CheckOutcome::NoText), 1);
    assert_eq!(count(&vdd, CheckOutcome::NoTsv), 0);
    Ok(())
}

#[test]
fn dangling_terminal_is_no_net() -> StackResult<()> {
    // A second via beyond the subckt's pin list, labeled with a name the
    // netlist does not know: dangling layout pin
    let job = job(vec![placement(0, vec![tsv_rule()]), placement(1, vec![tsv_rule()])]);
    let top = top_netlist(2, &["VDD_TSV"]);
    let chips = vec![
        (
            chip_netlist(&["P_VDD"]),
            chip_lib(&[
                Term::tsv(10_000, 5_000, Some("P_VDD")),
                Term::tsv(50_000, 5_000, Some("GHOST")),
            ]),
        ),
        (
            chip_netlist(&["P_VDD"]),
            chip_lib(&[Term::tsv(10_000, 5_000, Some("P_VDD"))]),
        ),
    ];
    let rows = StackCheck::run(&job, &top, &chips)?;
    let dangling: Vec<&ReportRow> = rows
        .iter()
        .filter(|r| r.outcome == CheckOutcome::NoNet)
        .collect();
    assert_eq!(dangling.len(), 1);
    assert_eq!(dangling[0].instance.as_deref(), Some("X0"));
    assert_eq!(dangling[0].net, None);
    Ok(())
}

#[test]
fn displaced_terminal_splits_the_stack() -> StackResult<()> {
    // Chip 1's via is displaced beyond tolerance. At the aligned position
    // chips 0 and 2 see an interior gap (NO_TSV) and chip 1 a NO_PORT; the
    // stray terminal's own position carries the complementary discontinuity
    let job = job(vec![
        placement(0, vec![tsv_rule()]),
        placement(1, vec![tsv_rule()]),
        placement(2, vec![tsv_rule()]),
    ]);
    let top = top_netlist(3, &["VDD_TSV"]);
    let aligned = || {
        (
            chip_netlist(&["P_VDD"]),
            chip_lib(&[Term::tsv(10_000, 5_000, Some("P_VDD"))]),
        )
    };
    let displaced = (
        chip_netlist(&["P_VDD"]),
        chip_lib(&[Term::tsv(10_200, 5_000, Some("P_VDD"))]),
    );
    let chips = vec![aligned(), displaced, aligned()];
    let rows = StackCheck::run(&job, &top, &chips)?;
    let vdd = rows_for(&rows, "VDD_TSV");
    assert_eq!(count(&vdd, CheckOutcome::NoTsv), 2);
    assert_eq!(count(&vdd, CheckOutcome::NoConnection), 1);
    assert_eq!(count(&vdd, CheckOutcome::NoPort), 3);
    assert_eq!(count(&vdd, CheckOutcome::Ok), 0);
    Ok(())
}

#[test]
fn coil_pair_opposite_winding_ok() -> StackResult<()> {
    // Two coils couple face-to-face: the upper chip is mirrored, its coil
    // winds the other way, and both report OK
    let mut upper = placement(1, vec![coil_rule()]);
    upper.orientation = Orientation::MY;
    upper.offset = Offset { x: 20.0, y: 0.0 };
    let job = job(vec![placement(0, vec![coil_rule()]), upper]);
    let top = top_netlist(2, &["SIG_A"]);
    let chips = vec![
        (
            chip_netlist(&["P_SIG"]),
            chip_lib(&[Term::coil(10_000, 5_000, Some("P_SIG"))]),
        ),
        (
            chip_netlist(&["P_SIG"]),
            chip_lib(&[Term::coil(10_000, 5_000, Some("P_SIG"))]),
        ),
    ];
    let rows = StackCheck::run(&job, &top, &chips)?;
    let sig = rows_for(&rows, "SIG_A");
    assert_eq!(sig.len(), 2);
    assert_eq!(count(&sig, CheckOutcome::Ok), 2);
    assert_eq!(sig[0].detail, "@+");
    assert_eq!(sig[1].detail, "@-");
    Ok(())
}

#[test]
fn coil_pair_same_winding_flagged() -> StackResult<()> {
    // Both coils wind the same way: WINDING on both members
    let job = job(vec![
        placement(0, vec![coil_rule()]),
        placement(1, vec![coil_rule()]),
    ]);
    let top = top_netlist(2, &["SIG_A"]);
    let coil = || {
        (
            chip_netlist(&["P_SIG"]),
            chip_lib(&[Term::coil(10_000, 5_000, Some("P_SIG"))]),
        )
    };
    let chips = vec![coil(), coil()];
    let rows = StackCheck::run(&job, &top, &chips)?;
    let sig = rows_for(&rows, "SIG_A");
    assert_eq!(count(&sig, CheckOutcome::Winding), 2);
    Ok(())
}

#[test]
fn coil_multiplicity() -> StackResult<()> {
    // Three members at one position: ambiguous coupling. One alone: no
    // partner.
    let job = job(vec![
        placement(0, vec![coil_rule()]),
        placement(1, vec![coil_rule()]),
        placement(2, vec![coil_rule()]),
    ]);
    let top = top_netlist(3, &["SIG_A", "SIG_B"]);
    let chips = vec![
        (
            chip_netlist(&["P_A", "P_B"]),
            chip_lib(&[
                Term::coil(10_000, 5_000, Some("P_A")),
                Term::coil(100_000, 5_000, Some("P_B")),
            ]),
        ),
        (
            chip_netlist(&["P_A", "P_B"]),
            chip_lib(&[Term::coil(10_000, 5_000, Some("P_A"))]),
        ),
        (
            chip_netlist(&["P_A", "P_B"]),
            chip_lib(&[Term::coil(10_000, 5_000, Some("P_A"))]),
        ),
    ];
    let rows = StackCheck::run(&job, &top, &chips)?;
    assert_eq!(count(&rows_for(&rows, "SIG_A"), CheckOutcome::MultiTci), 3);
    assert_eq!(count(&rows_for(&rows, "SIG_B"), CheckOutcome::Floating), 1);
    Ok(())
}

#[test]
fn run_files_end_to_end() -> StackResult<()> {
    // Exercise the file-loading entry: netlists, layouts, and the job
    // itself all round-trip through disk
    use crate::ser::SerializationFormat::Yaml;
    let dir = tempfile::tempdir()?;
    let path = |name: &str| dir.path().join(name).to_str().unwrap().to_string();

    std::fs::write(
        path("stack.cdl"),
        ".SUBCKT STACK VDD_TSV\nX0 VDD_TSV CHIP\nX1 VDD_TSV CHIP\n.ENDS\n",
    )?;
    for idx in 0..2 {
        std::fs::write(
            path(&format!("chip{}.cdl", idx)),
            ".SUBCKT CHIP P_VDD\n.ENDS\n",
        )?;
        chip_lib(&[Term::tsv(10_000, 5_000, Some("P_VDD"))])
            .save(path(&format!("chip{}.gds", idx)))?;
    }
    let mut job = job(vec![
        placement(0, vec![tsv_rule()]),
        placement(1, vec![tsv_rule()]),
    ]);
    job.top_cdl_file = path("stack.cdl");
    for (idx, chip) in job.chips.iter_mut().enumerate() {
        chip.cdl_file = path(&format!("chip{}.cdl", idx));
        chip.gds_file = path(&format!("chip{}.gds", idx));
    }
    // Round-trip the job through its YAML form
    Yaml.save(&job, path("job.yaml")).unwrap();
    let job = StackJob::open(path("job.yaml"))?;

    let rows = StackCheck::run_files(&job)?;
    assert_eq!(count(&rows_for(&rows, "VDD_TSV"), CheckOutcome::Ok), 2);

    // And the report renders
    let mut csv = Vec::new();
    crate::report::write_csv(&rows, &mut csv)?;
    assert!(String::from_utf8(csv).unwrap().starts_with("Check,Net,Type,X,Y"));
    Ok(())
}

#[test]
fn pin_order_is_pluggable() -> StackResult<()> {
    // The same unlabeled layout scored under both pairing contracts: the
    // correspondence rule is configuration, not an accident of iteration
    let mk_chips = || {
        vec![(
            chip_netlist(&["P_A", "P_B"]),
            chip_lib(&[
                Term::tsv(50_000, 0, Some("P_B")),
                Term::tsv(10_000, 0, Some("P_A")),
            ]),
        )]
    };
    let top = top_netlist(1, &["A", "B"]);

    // Discovery order: first-extracted pairs with the first pin, so the
    // labels disagree with the positional binding
    let job_d = job(vec![placement(0, vec![tsv_rule()])]);
    let rows = StackCheck::run(&job_d, &top, &mk_chips())?;
    assert_eq!(count(&rows_for(&rows, "A"), CheckOutcome::NoText), 1);
    assert_eq!(count(&rows_for(&rows, "B"), CheckOutcome::NoText), 1);

    // Position order: the left-most terminal takes the first pin, and the
    // labels agree
    let mut sorted = placement(0, vec![tsv_rule()]);
    sorted.pin_order = PinOrder::SortedPosition;
    let job_s = job(vec![sorted]);
    let rows = StackCheck::run(&job_s, &top, &mk_chips())?;
    for net in ["A", "B"] {
        let net_rows = rows_for(&rows, net);
        assert_eq!(net_rows.len(), 1);
        assert_ne!(net_rows[0].outcome, CheckOutcome::NoText);
    }
    Ok(())
}
