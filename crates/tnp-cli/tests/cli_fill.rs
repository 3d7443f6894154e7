use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::sync::Arc;

use arrow::array::{ArrayRef, BooleanArray, Float64Array};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;

fn bin_path() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_tnphist"))
}

fn run(args: &[&str]) -> Output {
    Command::new(bin_path())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("failed to run {:?} {:?}: {}", bin_path(), args, e))
}

fn run_ok(args: &[&str]) -> serde_json::Value {
    let out = run(args);
    assert!(
        out.status.success(),
        "{:?} should succeed, stderr={}",
        args,
        String::from_utf8_lossy(&out.stderr)
    );
    if out.stdout.is_empty() {
        return serde_json::Value::Null;
    }
    serde_json::from_slice(&out.stdout).expect("stdout should be JSON")
}

/// 24 probes: mass in [70, 110), alternating pass/fail, every fifth one with a negative weight.
fn write_sample(path: &Path, offset: usize) {
    let idx = offset..offset + 12;
    let mass: Vec<f64> = idx.clone().map(|i| 70.0 + (i as f64 * 3.7) % 40.0).collect();
    let eta: Vec<f64> = idx.clone().map(|i| -2.0 + (i as f64 * 0.35) % 4.0).collect();
    let tag_pt: Vec<f64> = idx.clone().map(|i| if i % 7 == 3 { 20.0 } else { 35.0 }).collect();
    let pass: Vec<bool> = idx.clone().map(|i| i % 2 == 0).collect();
    let matched: Vec<bool> = idx.clone().map(|i| i % 3 != 0).collect();
    let w: Vec<f64> = idx.map(|i| if i % 5 == 0 { -1.0 } else { 1.0 }).collect();

    let schema = Arc::new(Schema::new(vec![
        Field::new("mass", DataType::Float64, false),
        Field::new("eta", DataType::Float64, false),
        Field::new("tag_pt", DataType::Float64, false),
        Field::new("pass", DataType::Boolean, false),
        Field::new("matched", DataType::Boolean, false),
        Field::new("w", DataType::Float64, false),
    ]));
    let columns: Vec<ArrayRef> = vec![
        Arc::new(Float64Array::from(mass)),
        Arc::new(Float64Array::from(eta)),
        Arc::new(Float64Array::from(tag_pt)),
        Arc::new(BooleanArray::from(pass)),
        Arc::new(BooleanArray::from(matched)),
        Arc::new(Float64Array::from(w)),
    ];
    let batch = RecordBatch::try_new(schema.clone(), columns).unwrap();
    let mut writer = ArrowWriter::try_new(File::create(path).unwrap(), schema, None).unwrap();
    writer.write(&batch).unwrap();
    writer.close().unwrap();
}

fn write_config(dir: &Path, sample: &Path) -> PathBuf {
    let yaml = format!(
        r#"channels:
  ID:
    sim: {sample}
    sim_weight: w
    sim_genmatching: matched
    mass: mass
    bins:
      - {{ var: "fabs(eta)", type: float, bins: [0.0, 1.0, 2.5] }}
    expr: tag_pt > 26
    test: pass
    hist_nbins: 8
    hist_range: [70, 110]
    hist_file: idhists
    fit_parameter: ignored
    systematic:
      - [{{ title: massbin4, hist_nbins: 4 }}]
"#,
        sample = sample.display()
    );
    let path = dir.join("tnp.yaml");
    std::fs::write(&path, yaml).unwrap();
    path
}

fn setup() -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let sample = dir.path().join("sim");
    std::fs::create_dir_all(&sample).unwrap();
    write_sample(&sample.join("part1.parquet"), 0);
    write_sample(&sample.join("part2.parquet"), 12);
    let cfg = write_config(dir.path(), &sample);
    (dir, cfg)
}

fn total_content(doc: &serde_json::Value, config: &str, category: &str) -> f64 {
    doc["histograms"][config][category]
        .as_object()
        .unwrap()
        .values()
        .flat_map(|h| h["content"].as_array().unwrap().iter().map(|v| v.as_f64().unwrap()))
        .sum()
}

#[test]
fn configs_lists_channels_and_stems() {
    let (_dir, cfg) = setup();
    let v = run_ok(&["configs", "--config", cfg.to_string_lossy().as_ref()]);
    let groups = v["channels"]["ID"]["sim"].as_array().unwrap();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0]["stem"], "idhists_sim_nominal");
    assert_eq!(groups[0]["configs"], serde_json::json!(["nominal", "massbin4"]));
    assert!(v["channels"]["ID"].get("data").is_none());
}

#[test]
fn fill_merge_postprocess_pipeline() {
    let (dir, cfg) = setup();
    let out = dir.path().join("hists");
    let cfg_s = cfg.to_string_lossy().to_string();
    let out_s = out.to_string_lossy().to_string();

    let v = run_ok(&[
        "fill", "--config", &cfg_s, "--channel", "ID", "--sample", "sim", "--job-count", "3",
        "--all-jobs", "--out-dir", &out_s,
    ]);
    let files = v["job_files"].as_array().unwrap();
    assert_eq!(files.len(), 3);
    let job_dir = out.join("idhists_sim_nominal.d");
    for i in 0..3 {
        assert!(job_dir.join(format!("job{i}.json")).exists());
    }

    // A single job run reproduces the same file.
    let single = dir.path().join("single");
    run_ok(&[
        "fill", "--config", &cfg_s, "--channel", "ID", "--sample", "sim", "--job-count", "3",
        "--job-index", "1", "--out-dir", single.to_string_lossy().as_ref(),
    ]);
    let a: serde_json::Value =
        serde_json::from_slice(&std::fs::read(job_dir.join("job1.json")).unwrap()).unwrap();
    let b: serde_json::Value = serde_json::from_slice(
        &std::fs::read(single.join("idhists_sim_nominal.d/job1.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(a, b);

    let merged = out.join("idhists_sim_nominal.json");
    run_ok(&["merge", "--output", merged.to_string_lossy().as_ref(), job_dir.to_string_lossy().as_ref()]);
    let doc: serde_json::Value = serde_json::from_slice(&std::fs::read(&merged).unwrap()).unwrap();
    assert_eq!(doc["schema_version"], "tnp_hists_v1");
    assert_eq!(doc["configs"], serde_json::json!(["nominal", "massbin4"]));
    let categories: Vec<&String> = doc["histograms"]["nominal"].as_object().unwrap().keys().collect();
    assert_eq!(categories.len(), 6);
    assert_eq!(doc["histograms"]["massbin4"]["pass"]["bin1"]["content"].as_array().unwrap().len(), 6);

    // Merged totals match a direct sum over the fixture.
    let mut pass_total = 0.0;
    let mut fail_total = 0.0;
    for i in 0..24usize {
        let eta = (-2.0 + (i as f64 * 0.35) % 4.0f64).abs();
        if i % 7 == 3 || eta >= 2.5 {
            continue;
        }
        let w = if i % 5 == 0 { -1.0 } else { 1.0 };
        if i % 2 == 0 { pass_total += w } else { fail_total += w }
    }
    assert!((total_content(&doc, "nominal", "pass") - pass_total).abs() < 1e-9);
    assert!((total_content(&doc, "nominal", "fail") - fail_total).abs() < 1e-9);

    let repaired = out.join("idhists_sim_nominal_pp.json");
    run_ok(&[
        "postprocess", "--input", merged.to_string_lossy().as_ref(), "--output",
        repaired.to_string_lossy().as_ref(),
    ]);
    let doc: serde_json::Value = serde_json::from_slice(&std::fs::read(&repaired).unwrap()).unwrap();
    for (_, categories) in doc["histograms"].as_object().unwrap() {
        for (_, bins) in categories.as_object().unwrap() {
            for (_, h) in bins.as_object().unwrap() {
                for c in h["content"].as_array().unwrap() {
                    assert!(c.as_f64().unwrap() >= 0.0);
                }
            }
        }
    }

    // Without --output the merged file is replaced in place, leaving no temporary behind.
    let in_place = out.join("in_place.json");
    std::fs::copy(&merged, &in_place).unwrap();
    run_ok(&["postprocess", "--input", in_place.to_string_lossy().as_ref()]);
    let replaced: serde_json::Value =
        serde_json::from_slice(&std::fs::read(&in_place).unwrap()).unwrap();
    assert_eq!(replaced, doc);
    assert!(!out.join("in_place.json.tmp").exists());
}

#[test]
fn merge_rejects_job_files_left_by_a_larger_split() {
    let (dir, cfg) = setup();
    let cfg_s = cfg.to_string_lossy().to_string();
    let out = dir.path().join("hists");
    let out_s = out.to_string_lossy().to_string();
    let job_dir = out.join("idhists_sim_nominal.d");
    let merged = out.join("idhists_sim_nominal.json");

    for jobs in ["3", "2"] {
        run_ok(&[
            "fill", "--config", &cfg_s, "--channel", "ID", "--sample", "sim", "--job-count", jobs,
            "--all-jobs", "--out-dir", &out_s,
        ]);
    }
    // job2.json still belongs to the 3-job run.
    let res = run(&["merge", "--output", merged.to_string_lossy().as_ref(), job_dir.to_string_lossy().as_ref()]);
    assert!(!res.status.success());
    assert!(String::from_utf8_lossy(&res.stderr).contains("stale job files"));
    assert!(!merged.exists());

    std::fs::remove_file(job_dir.join("job2.json")).unwrap();
    run_ok(&["merge", "--output", merged.to_string_lossy().as_ref(), job_dir.to_string_lossy().as_ref()]);
    let doc: serde_json::Value = serde_json::from_slice(&std::fs::read(&merged).unwrap()).unwrap();
    assert!(doc.get("job").is_none());
}

#[test]
fn missing_sample_fails_with_nonzero_exit() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = write_config(dir.path(), &dir.path().join("nowhere"));
    let out = run(&[
        "fill", "--config", cfg.to_string_lossy().as_ref(), "--channel", "ID", "--sample", "sim",
        "--job-index", "0", "--out-dir", dir.path().join("o").to_string_lossy().as_ref(),
    ]);
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("doesn't exist"));
}

#[test]
fn unknown_channel_and_bad_shard_are_errors() {
    let (dir, cfg) = setup();
    let cfg_s = cfg.to_string_lossy().to_string();
    let out_s = dir.path().join("o").to_string_lossy().to_string();

    let out = run(&[
        "fill", "--config", &cfg_s, "--channel", "ISO", "--sample", "sim", "--job-index", "0",
        "--out-dir", &out_s,
    ]);
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("unknown channel"));

    let out = run(&[
        "fill", "--config", &cfg_s, "--channel", "ID", "--sample", "sim", "--job-count", "2",
        "--job-index", "2", "--out-dir", &out_s,
    ]);
    assert!(!out.status.success());

    // Data sample is not configured for this channel.
    let out = run(&[
        "fill", "--config", &cfg_s, "--channel", "ID", "--sample", "data", "--job-index", "0",
        "--out-dir", &out_s,
    ]);
    assert!(!out.status.success());
}
