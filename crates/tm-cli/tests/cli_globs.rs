use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::time::{SystemTime, UNIX_EPOCH};

use tm_inference::WeightedEventTable;
use tm_translate::{
    EventTableColumns, Histogram, YieldsArtifact, read_alpha_toys, read_vector_toys,
    write_event_table,
};

fn bin_path() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_toymaker"))
}

fn tmp_dir(name: &str) -> PathBuf {
    let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos();
    let mut p = std::env::temp_dir();
    p.push(format!("toymaker_cli_{}_{}_{}", std::process::id(), nanos, name));
    std::fs::create_dir_all(&p).unwrap();
    p
}

fn run(args: &[&str]) -> Output {
    Command::new(bin_path())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("failed to run {:?} {:?}: {}", bin_path(), args, e))
}

fn s(p: &Path) -> String {
    p.to_string_lossy().into_owned()
}

fn write_config(dir: &Path) -> PathBuf {
    let path = dir.join("config.yaml");
    std::fs::write(&path, "mass_points: [300, 400]\nglobs:\n  n_toys: 200\n").unwrap();
    path
}

#[test]
fn gamma_globs_writes_one_artifact_per_mass() {
    let dir = tmp_dir("gamma_globs");
    let config = write_config(&dir);

    let n = 90usize;
    let weights: Vec<f64> = (0..n).map(|i| 0.5 + (i % 4) as f64 * 0.25).collect();
    let samples: Vec<String> =
        (0..n).map(|i| if i % 15 == 0 { "data" } else { "Zjets" }.to_string()).collect();
    let b300: Vec<u32> = (0..n).map(|i| (i % 3) as u32 + 1).collect();
    let b400: Vec<u32> = (0..n).map(|i| (i % 2) as u32 + 1).collect();
    let table =
        WeightedEventTable::from_columns(weights, Some(samples), [(300, b300), (400, b400)])
            .unwrap();
    let events = dir.join("events.parquet");
    write_event_table(&events, &table, &EventTableColumns::default()).unwrap();

    let mut y = YieldsArtifact::default();
    y.insert("tau_lh_slt_m300", Histogram::with_unit_bins(vec![25.0, 26.0, 27.0])).unwrap();
    y.insert("tau_lh_slt_m400", Histogram::with_unit_bins(vec![40.0, 41.0])).unwrap();
    let yields = dir.join("yields.json");
    y.write(&yields).unwrap();

    let outdir = dir.join("out");
    let out = run(&[
        "--config",
        &s(&config),
        "gamma-globs",
        &s(&events),
        &s(&yields),
        "-c",
        "slt",
        "-o",
        &s(&outdir),
    ]);
    assert!(
        out.status.success(),
        "gamma-globs should succeed, stderr={}",
        String::from_utf8_lossy(&out.stderr)
    );

    let t300 = read_vector_toys(&outdir.join("toy_globs_slt_300.parquet"), "globs").unwrap();
    let t400 = read_vector_toys(&outdir.join("toy_globs_slt_400.parquet"), "globs").unwrap();
    assert_eq!((t300.n_toys(), t300.n_bins()), (200, 3));
    assert_eq!((t400.n_toys(), t400.n_bins()), (200, 2));
    assert!(t300.as_slice().iter().all(|v| *v >= 0.0));

    // Bootstrap means scatter around τ by roughly 1/sqrt(n_events * n_toys).
    let mean = t400.mean();
    assert!((mean[0] / 40.0 - 1.0).abs() < 0.1, "mean {mean:?}");

    let report: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(report["tau_checks"].as_array().unwrap().len(), 2);
    assert_eq!(report["toy_mean_checks"].as_array().unwrap().len(), 2);

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn gamma_globs_rejects_bin_count_mismatch() {
    let dir = tmp_dir("gamma_mismatch");
    let config = write_config(&dir);

    let table = WeightedEventTable::from_columns(
        vec![1.0; 6],
        None,
        [(300, vec![1, 2, 1, 2, 1, 2]), (400, vec![1, 1, 1, 1, 1, 1])],
    )
    .unwrap();
    let events = dir.join("events.parquet");
    write_event_table(&events, &table, &EventTableColumns::default()).unwrap();

    let mut y = YieldsArtifact::default();
    y.insert("tau_hh_m300", Histogram::with_unit_bins(vec![3.0, 3.0, 3.0])).unwrap();
    y.insert("tau_hh_m400", Histogram::with_unit_bins(vec![6.0])).unwrap();
    let yields = dir.join("yields.json");
    y.write(&yields).unwrap();

    let out = run(&[
        "--config",
        &s(&config),
        "gamma-globs",
        &s(&events),
        &s(&yields),
        "-c",
        "hadhad",
        "-o",
        &s(&dir.join("out")),
    ]);
    assert!(!out.status.success(), "bin-count mismatch must fail");

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn alpha_globs_merges_models_and_truncates() {
    let dir = tmp_dir("alpha_globs");
    let config = write_config(&dir);
    let m1 = dir.join("model_hh.json");
    let m2 = dir.join("model_slt.json");
    std::fs::write(
        &m1,
        r#"{"global_observables": ["nom_alpha_JES", "nom_gamma_stat_1", "nom_alpha_lumi"]}"#,
    )
    .unwrap();
    std::fs::write(&m2, r#"{"global_observables": ["nom_alpha_lumi", "nom_alpha_FT"]}"#).unwrap();
    let outfile = dir.join("alphas.parquet");

    let out = run(&["--config", &s(&config), "alpha-globs", &s(&m1), &s(&m2), "-o", &s(&outfile)]);
    assert!(
        out.status.success(),
        "alpha-globs should succeed, stderr={}",
        String::from_utf8_lossy(&out.stderr)
    );

    let toys = read_alpha_toys(&outfile).unwrap();
    assert_eq!(toys.names, vec!["nom_alpha_FT", "nom_alpha_JES", "nom_alpha_lumi"]);
    assert_eq!(toys.values.n_toys(), 200);
    assert!(toys.values.as_slice().iter().all(|v| v.abs() <= 5.0));

    // Fixed seed: a second run reproduces the file content.
    let again = dir.join("alphas_again.parquet");
    let out = run(&["--config", &s(&config), "alpha-globs", &s(&m1), &s(&m2), "-o", &s(&again)]);
    assert!(out.status.success());
    assert_eq!(read_alpha_toys(&again).unwrap(), toys);

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn alpha_globs_without_matching_names_fails() {
    let dir = tmp_dir("alpha_empty");
    let model = dir.join("model.json");
    std::fs::write(&model, r#"{"global_observables": ["nom_gamma_stat_1"]}"#).unwrap();

    let out = run(&["alpha-globs", &s(&model), "-o", &s(&dir.join("alphas.parquet"))]);
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("nom_alpha_"));

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn zcr_toys_writes_pseudodata_and_globs() {
    let dir = tmp_dir("zcr");
    let config = write_config(&dir);
    let mut y = YieldsArtifact::default();
    for mass in [300, 400] {
        y.insert(format!("obs_zcr_m{mass}"), Histogram::with_unit_bins(vec![10.0, 20.0]))
            .unwrap();
        y.insert(format!("tau_zcr_m{mass}"), Histogram::with_unit_bins(vec![100.0, 200.0]))
            .unwrap();
    }
    let yields = dir.join("yields.json");
    y.write(&yields).unwrap();
    let outdir = dir.join("out");

    let out = run(&["--config", &s(&config), "zcr-toys", &s(&yields), "-o", &s(&outdir)]);
    assert!(
        out.status.success(),
        "zcr-toys should succeed, stderr={}",
        String::from_utf8_lossy(&out.stderr)
    );

    let pd = read_vector_toys(&outdir.join("pseudodata_ZCR.parquet"), "pseudodata").unwrap();
    let globs = read_vector_toys(&outdir.join("toy_globs_ZCR.parquet"), "globs").unwrap();
    assert_eq!((pd.n_toys(), pd.n_bins()), (200, 2));
    assert_eq!((globs.n_toys(), globs.n_bins()), (200, 2));
    assert!(pd.as_slice().iter().all(|v| v.fract() == 0.0));

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn zcr_toys_rejects_mass_dependent_yields() {
    let dir = tmp_dir("zcr_mismatch");
    let config = write_config(&dir);
    let mut y = YieldsArtifact::default();
    y.insert("obs_zcr_m300", Histogram::with_unit_bins(vec![10.0, 20.0])).unwrap();
    y.insert("obs_zcr_m400", Histogram::with_unit_bins(vec![10.0, 21.0])).unwrap();
    y.insert("tau_zcr_m300", Histogram::with_unit_bins(vec![100.0, 200.0])).unwrap();
    y.insert("tau_zcr_m400", Histogram::with_unit_bins(vec![100.0, 200.0])).unwrap();
    let yields = dir.join("yields.json");
    y.write(&yields).unwrap();

    let out = run(&["--config", &s(&config), "zcr-toys", &s(&yields), "-o", &s(&dir.join("out"))]);
    assert!(!out.status.success(), "mass-dependent control region must fail");

    let _ = std::fs::remove_dir_all(&dir);
}
