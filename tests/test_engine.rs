use chemlog::builtin::keys;
use chemlog::engine::{parse_file, ScanFault};
use chemlog::extractor::{float_token, int_token, ExtractError, Extraction, TokenPos};
use chemlog::record::{Fragment, Value};
use chemlog::sections::{self, stock_registry};
use chemlog::{LineStream, LogFormat, ScanEngine};
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::NamedTempFile;

fn castep_lines(lines: &[&str]) -> LineStream {
    LineStream::new(lines.iter().map(|l| format!("{}\n", l)))
}

#[test]
fn test_castep_scenario() {
    let engine = ScanEngine::new(LogFormat::castep());
    let lines = LineStream::new([
        "Total number of ions in cell 2\n",
        "Final energy = -1713.025929482 eV\n",
        "Total time          =      3.21 s\n",
    ]);
    let record = engine.scan(&lines, "mgo.castep").unwrap();

    assert_eq!(record.get(keys::ATOM_COUNT), Some(&Value::Int(2)));
    assert_eq!(record.get(keys::ENERGY), Some(&Value::Float(-1713.025929482)));
    assert_eq!(record.get(keys::RUN_COMPLETED), Some(&Value::Bool(true)));
    assert_eq!(record.get(keys::MULTIPLE_GEOMETRIES), Some(&Value::Bool(false)));
    assert_eq!(record.len(), 4);
}

#[test]
fn test_rescan_gives_identical_json() {
    let engine = ScanEngine::with_registry(LogFormat::castep(), stock_registry());
    let lines = castep_lines(&[
        " Real Lattice(A)              Reciprocal Lattice(1/A)",
        "   0.0000000   2.1060000   2.1060000      -1.4917   1.4917   1.4917",
        "   2.1060000   0.0000000   2.1060000       1.4917  -1.4917   1.4917",
        "   2.1060000   2.1060000   0.0000000       1.4917   1.4917  -1.4917",
        " Total number of ions in cell =    2",
        " MP grid size for SCF calculation is  4  4  4",
        " Final energy, E             =  -1713.025929482     eV",
        " Final free energy (E-TS)    =  -1713.030000000     eV",
        " Total time          =      3.21 s",
    ]);

    let first = engine.scan(&lines, "a").unwrap().to_json().unwrap();
    let second = engine.scan(&lines, "a").unwrap().to_json().unwrap();
    assert_eq!(first.as_bytes(), second.as_bytes());
}

#[test]
fn test_atom_count_accumulates() {
    let engine = ScanEngine::new(LogFormat::castep());
    let record = engine
        .scan(
            &castep_lines(&[
                "Total number of ions in cell 2",
                "Total number of ions in cell 3",
                "Total number of ions in cell 4",
                "Total time = 1 s",
            ]),
            "sum.castep",
        )
        .unwrap();
    assert_eq!(record.get_i64(keys::ATOM_COUNT), Some(9));
}

#[test]
fn test_energy_replaces() {
    let engine = ScanEngine::new(LogFormat::castep());
    let record = engine
        .scan_text(
            "Final energy = -1.0 eV\nFinal energy = -2.0 eV\nTotal time = 1 s\n",
            "replace.castep",
        )
        .unwrap();
    assert_eq!(record.get_f64(keys::ENERGY), Some(-2.0));
}

#[test]
fn test_reset_isolates_documents() {
    let engine = ScanEngine::new(LogFormat::castep());
    let record = engine
        .scan(
            &castep_lines(&[
                " Run started: Mon, 01 Jan 2024",
                "Total number of ions in cell 2",
                "Final energy = -5.0 eV",
                "Total time = 1 s",
                " Run started: Mon, 01 Jan 2024",
                "Total time = 2 s",
            ]),
            "two_runs.castep",
        )
        .unwrap();

    assert_eq!(record.get_i64(keys::ATOM_COUNT), Some(0));
    assert!(!record.contains_key(keys::ENERGY));
    assert_eq!(record.get_bool(keys::RUN_COMPLETED), Some(true));
}

#[test]
fn test_reset_keeps_only_last_document_values() {
    let engine = ScanEngine::new(LogFormat::castep());
    let record = engine
        .scan(
            &castep_lines(&[
                "Total number of ions in cell 2",
                "Total time = 1 s",
                " Run started: restart",
                "Total number of ions in cell 5",
                "Total time = 2 s",
            ]),
            "restart.castep",
        )
        .unwrap();
    assert_eq!(record.get_i64(keys::ATOM_COUNT), Some(5));
}

#[test]
fn test_missing_completion_is_incomplete_run() {
    let engine = ScanEngine::new(LogFormat::castep());
    let err = engine
        .scan(
            &castep_lines(&["Total number of ions in cell 2", "Final energy = -1.0 eV"]),
            "cut.castep",
        )
        .unwrap_err();
    assert!(err.is_incomplete_run());
    assert!(matches!(err.fault, ScanFault::IncompleteRun { ref marker } if marker == "Total time"));
    assert_eq!(err.file, "cut.castep");
}

#[test]
fn test_completion_from_earlier_document_does_not_count() {
    let engine = ScanEngine::new(LogFormat::castep());
    let err = engine
        .scan(
            &castep_lines(&["Total time = 1 s", " Run started: again", "Final energy = -1.0 eV"]),
            "crashed.castep",
        )
        .unwrap_err();
    assert!(err.is_incomplete_run());
}

#[test]
fn test_completion_alone_is_enough() {
    let engine = ScanEngine::new(LogFormat::castep());
    let record = engine.scan_text("Total time = 0.1 s\n", "bare.castep").unwrap();
    assert_eq!(record.get_bool(keys::RUN_COMPLETED), Some(true));
    assert_eq!(record.get_i64(keys::ATOM_COUNT), Some(0));
}

#[test]
fn test_registered_extractor_runs_once_per_matching_line() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);

    let mut engine = ScanEngine::new(LogFormat::castep());
    engine.register("Fermi energy", move |lines: &LineStream, start: usize| {
        counter.fetch_add(1, Ordering::SeqCst);
        let fermi = float_token(lines, start, TokenPos::FromEnd(1))?;
        Ok(Extraction::new(Fragment::new().set("fermi_energy", fermi), start + 1))
    });

    let record = engine
        .scan(
            &castep_lines(&[
                "Fermi energy for spin 1 electrons is -4.20 eV",
                "unrelated",
                "Fermi energy for spin 1 electrons is -4.25 eV",
                "Total time = 1 s",
            ]),
            "fermi.castep",
        )
        .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(record.get_f64("fermi_energy"), Some(-4.25));
}

#[test]
fn test_registrations_are_per_engine() {
    let mut custom = ScanEngine::new(LogFormat::castep());
    custom.register("marker", |_: &LineStream, s: usize| {
        Ok(Extraction::new(Fragment::new().set("seen", true), s + 1))
    });
    let plain = ScanEngine::new(LogFormat::castep());

    let text = "marker\nTotal time = 1 s\n";
    assert_eq!(custom.scan_text(text, "a").unwrap().get_bool("seen"), Some(true));
    assert!(!plain.scan_text(text, "b").unwrap().contains_key("seen"));
    assert!(plain.registry().is_empty());
}

#[test]
fn test_builtin_and_registered_share_a_line() {
    let mut engine = ScanEngine::new(LogFormat::castep());
    engine.register("Total number of ions", |lines: &LineStream, s: usize| {
        let ions = int_token(lines, s, TokenPos::FromEnd(0))?;
        Ok(Extraction::new(Fragment::new().set("ions_seen", ions), s + 1))
    });
    let record = engine
        .scan_text("Total number of ions in cell 8\nTotal time = 1 s\n", "both")
        .unwrap();
    assert_eq!(record.get_i64(keys::ATOM_COUNT), Some(8));
    assert_eq!(record.get_i64("ions_seen"), Some(8));
}

#[test]
fn test_cursor_moves_to_furthest_resume_index() {
    let mut engine = ScanEngine::new(LogFormat::castep());
    engine
        .register("BLOCK", |_: &LineStream, s: usize| {
            Ok(Extraction::new(Fragment::new().set("short", true), s + 1))
        })
        .register("BLOCK", |_: &LineStream, s: usize| {
            Ok(Extraction::new(Fragment::new().set("long", true), s + 3))
        });

    // The energy line sits inside the skipped span.
    let record = engine
        .scan_text(
            "BLOCK\nFinal energy = -1.0 eV\nstill block\nTotal time = 1 s\n",
            "skip",
        )
        .unwrap();
    assert_eq!(record.get_bool("short"), Some(true));
    assert_eq!(record.get_bool("long"), Some(true));
    assert!(!record.contains_key(keys::ENERGY));
}

#[test]
fn test_extractor_error_stops_scan() {
    let mut engine = ScanEngine::new(LogFormat::castep());
    engine.register("bad block", |_: &LineStream, s: usize| {
        Err::<Extraction, _>(ExtractError::malformed(s, "nothing here"))
    });
    let err = engine
        .scan_text("ok\nbad block\nTotal time = 1 s\n", "bad.castep")
        .unwrap_err();
    assert!(!err.is_incomplete_run());
    let message = err.to_string();
    assert!(message.contains("bad.castep"));
    assert!(message.contains("line 2"));
}

#[test]
fn test_castep_full_log() {
    let text = "\
 Run started: Mon, 01 Jan 2024 12:00:00
                           -------------------------------
                                      Unit Cell
                           -------------------------------
        Real Lattice(A)              Reciprocal Lattice(1/A)
   0.0000000   2.1060000   2.1060000      -1.4917   1.4917   1.4917
   2.1060000   0.0000000   2.1060000       1.4917  -1.4917   1.4917
   2.1060000   2.1060000   0.0000000       1.4917   1.4917  -1.4917

                       Total number of ions in cell =    2
             MP grid size for SCF calculation is  4  4  4
 BFGS: starting iteration         1 with convergence tolerances
Final energy, E             =  -1713.025929482     eV
Final free energy (E-TS)    =  -1713.030000000     eV
NB est. 0K energy (E-0.5TS)      =  -1713.027964741     eV
Total time          =      3.21 s
";
    let record = ScanEngine::new(LogFormat::castep())
        .scan_text(text, "mgo.castep")
        .unwrap();

    assert_eq!(record.get_i64(keys::ATOM_COUNT), Some(2));
    assert_eq!(record.get(keys::KPOINT_GRID), Some(&Value::Ints(vec![4, 4, 4])));
    assert_eq!(record.get_bool(keys::MULTIPLE_GEOMETRIES), Some(true));
    assert_eq!(record.get_f64(keys::FREE_ENERGY), Some(-1713.03));
    assert_eq!(record.get_f64(keys::ENERGY_0K), Some(-1713.027964741));

    let cell = record.get_lattice(keys::UNIT_CELL).unwrap();
    for length in cell.lengths() {
        assert!((length - 2.106 * 2f64.sqrt()).abs() < 1e-6);
    }
    for angle in cell.angles() {
        assert!((angle - 60.0).abs() < 1e-6);
    }
}

#[test]
fn test_cp2k_full_log_with_stock_sections() {
    let text = "\
 **** **** ******  **  PROGRAM STARTED AT               2024-01-01 12:00:00.000
 CELL| Volume [angstrom^3]:                                          74.758
 CELL| Vector a [angstrom]:       4.212     0.000     0.000   |a| =     4.212
 CELL| Vector b [angstrom]:       0.000     4.212     0.000   |b| =     4.212
 CELL| Vector c [angstrom]:       0.000     0.000     4.212   |c| =     4.212
 CELL| Angle (b,c), alpha [degree]:                                   90.000

 ATOMIC KIND INFORMATION
  1. Atomic kind: Mg                                    Number of atoms:   4
  2. Atomic kind: O                                     Number of atoms:   4
 BRILLOUIN| K-point grid                                          2    2    2

  *** SCF run converged in    12 steps ***

 Eigenvalues of the occupied subspace spin            1
 ---------------------------------------------
     -1.52300000      -0.87600000      -0.87600000

 ENERGY| Total FORCE_EVAL ( QS ) energy [a.u.]:              -1.000000000000000

 -                                T I M I N G                                  -
 -------------------------------------------------------------------------------
 SUBROUTINE                       CALLS  ASD         SELF TIME        TOTAL TIME
                                MAXIMUM       AVERAGE  MAXIMUM  AVERAGE  MAXIMUM
 CP2K                                 1  1.0    0.011    0.011   12.345   12.345
 -------------------------------------------------------------------------------

  **** **** ******  **  PROGRAM ENDED AT                 2024-01-01 12:00:12.345
";
    let engine = ScanEngine::with_registry(LogFormat::cp2k(), stock_registry());
    let record = engine.scan_text(text, "mgo.cpout").unwrap();

    assert_eq!(record.get_i64(keys::ATOM_COUNT), Some(8));
    assert_eq!(record.get_i64(sections::SCF_STEPS_KEY), Some(12));
    assert_eq!(
        record.get(sections::EIGENVALUES_KEY),
        Some(&Value::Floats(vec![-1.523, -0.876, -0.876]))
    );
    assert_eq!(record.get(keys::KPOINT_GRID), Some(&Value::Ints(vec![2, 2, 2])));
    assert!((record.get_f64(keys::ENERGY).unwrap() + chemlog::units::HARTREE_TO_EV).abs() < 1e-9);
    assert_eq!(record.get_bool(keys::RUN_COMPLETED), Some(true));

    let cell = record.get_lattice(keys::UNIT_CELL).unwrap();
    assert!((cell.volume() - 4.212_f64.powi(3)).abs() < 1e-6);
    match record.get(sections::TIMINGS_KEY) {
        Some(Value::Record(table)) => assert_eq!(table.get_f64("CP2K"), Some(12.345)),
        other => panic!("Expected timing table, got {:?}", other),
    }
}

#[test]
fn test_tight_binding_log() {
    let text = "\
Starting calculation
Number of atoms = 2
Unit cell
  Lattice lengths (bohr):  3.746172  3.746172  3.746172
  Lattice angles (deg):   60.0  60.0  60.0

Geometry step 1
Total energy = -10.0 Ry
Calculation finished
";
    let record = ScanEngine::new(LogFormat::tight_binding())
        .scan_text(text, "si.out")
        .unwrap();

    assert_eq!(record.get_i64(keys::ATOM_COUNT), Some(2));
    assert_eq!(record.get_bool(keys::MULTIPLE_GEOMETRIES), Some(true));
    let energy = record.get_f64(keys::ENERGY).unwrap();
    assert!((energy + 10.0 * chemlog::units::RYD_TO_EV).abs() < 1e-9);
    let cell = record.get_lattice(keys::UNIT_CELL).unwrap();
    assert!((cell.volume() - 37.174744).abs() < 1e-3);
}

#[test]
fn test_case_insensitive_format() {
    let engine = ScanEngine::new(LogFormat::castep().ignore_case());
    let record = engine
        .scan_text("FINAL ENERGY = -3.0 eV\ntotal time = 1 s\n", "loud.castep")
        .unwrap();
    assert_eq!(record.get_f64(keys::ENERGY), Some(-3.0));
}

#[test]
fn test_parse_file_reads_from_disk() {
    let mut file = NamedTempFile::new().unwrap();
    write!(
        file,
        "Total number of ions in cell 2\nFinal energy = -1713.025929482 eV\nTotal time = 3.21 s\n"
    )
    .unwrap();

    let record = parse_file(file.path(), LogFormat::castep()).unwrap();
    assert_eq!(
        record.to_json().unwrap(),
        r#"{"energy":-1713.025929482,"multiple geometries":false,"numbAtoms":2,"run completed":true}"#
    );
}

#[test]
fn test_parse_file_missing_is_io_fault() {
    let dir = tempfile::tempdir().unwrap();
    let err = parse_file(&dir.path().join("absent.castep"), LogFormat::castep()).unwrap_err();
    assert!(matches!(err.fault, ScanFault::Io(_)));
}

#[test]
fn test_empty_file_is_error() {
    let file = NamedTempFile::new().unwrap();
    let err = parse_file(file.path(), LogFormat::castep()).unwrap_err();
    assert!(matches!(err.fault, ScanFault::EmptyInput));
}

#[test]
fn test_tight_binding_cell_followed_directly_by_energy() {
    let text = "\
Unit cell
  Lattice lengths (bohr):  3.746172  3.746172  3.746172
  Lattice angles (deg):   60.0  60.0  60.0
Total energy = -1.0 Ry
Calculation finished
";
    let record = ScanEngine::new(LogFormat::tight_binding())
        .scan_text(text, "x.out")
        .unwrap();

    assert!(record.get_lattice(keys::UNIT_CELL).is_some());
    assert!((record.get_f64(keys::ENERGY).unwrap() + chemlog::units::RYD_TO_EV).abs() < 1e-9);
    assert_eq!(record.get_bool(keys::RUN_COMPLETED), Some(true));
}

#[test]
fn test_eigenvalue_block_followed_by_completion_marker() {
    let text = "\
 Eigenvalues of the occupied subspace spin            1
 ---------------------------------------------
     -0.50000000      -0.40000000
 Fermi Energy [eV] :   -5.714
  **** **** ******  **  PROGRAM ENDED AT                 2024-01-01 12:00:00.000
";
    let engine = ScanEngine::with_registry(LogFormat::cp2k(), stock_registry());
    let record = engine.scan_text(text, "bands.cpout").unwrap();

    assert_eq!(
        record.get(sections::EIGENVALUES_KEY),
        Some(&Value::Floats(vec![-0.5, -0.4]))
    );
    assert_eq!(record.get_bool(keys::RUN_COMPLETED), Some(true));
}

#[test]
fn test_registered_eigenvalues_leave_castep_completion_visible() {
    let mut engine = ScanEngine::new(LogFormat::castep());
    engine.register(sections::EIGENVALUES_TRIGGER, sections::eigenvalues);
    let record = engine
        .scan_text(
            " Eigenvalues of the occupied subspace\n  -1.0  -0.5\n Total time\n",
            "bands.castep",
        )
        .unwrap();

    assert_eq!(record.get(sections::EIGENVALUE_BLOCKS_KEY), Some(&Value::Ints(vec![2])));
    assert_eq!(record.get_bool(keys::RUN_COMPLETED), Some(true));
}
