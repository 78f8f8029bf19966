mod common;
use common::{Fixture, UNSCORED};
use ecgdb::{normalize_labels, parse_header, UnscoredSet};

fn strings(v: &[&str]) -> Vec<String> {
    v.iter().map(|s| s.to_string()).collect()
}

#[test]
fn unscored_list_from_csv_plus_extras() {
    let fx = Fixture::new();
    let unscored = UnscoredSet::load(&fx.layout.unscored_csv, &fx.cfg).unwrap();
    assert_eq!(unscored.len(), UNSCORED.len() + 3);
    assert!(unscored.contains(164884008));
    assert!(unscored.contains(6180003));
    assert!(!unscored.contains(426783006));
}

#[test]
fn float_formatted_codes_are_accepted() {
    let fx = Fixture::new();
    let path = fx.dir.path().join("unscored_float.csv");
    std::fs::write(&path, "SNOMEDCTCode\n164884008.0\n").unwrap();
    let unscored = UnscoredSet::load(&path, &fx.cfg).unwrap();
    assert!(unscored.contains(164884008));
}

#[test]
fn header_dx_line_through_normalisation() {
    let fx = Fixture::new();
    let unscored = UnscoredSet::load(&fx.layout.unscored_csv, &fx.cfg).unwrap();
    let header = parse_header(
        "A0001 1 500 5000\n\
         A0001.mat 16 1000/mV 16 0 0 0 0 I\n\
         #Dx: 164909002,, 111975006,164884008,59118001\n",
    )
    .unwrap();
    let labels = normalize_labels(&header.dx, &unscored, &fx.cfg);
    assert_eq!(labels, strings(&["733534002", "111975006", "713427006"]));
}

#[test]
fn only_unscored_yields_nothing() {
    let fx = Fixture::new();
    let unscored = UnscoredSet::load(&fx.layout.unscored_csv, &fx.cfg).unwrap();
    assert!(normalize_labels(&strings(&["251238007"]), &unscored, &fx.cfg).is_empty());
    assert!(normalize_labels(&strings(&["", "251211000", ""]), &unscored, &fx.cfg).is_empty());
}

#[test]
fn equivalents_collapse_to_one_label() {
    let fx = Fixture::new();
    let unscored = UnscoredSet::new([]);
    let labels = normalize_labels(&strings(&["17338001", "427172004"]), &unscored, &fx.cfg);
    assert_eq!(labels, strings(&["427172004"]));
}
