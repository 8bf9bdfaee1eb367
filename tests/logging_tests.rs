use ingest_pipeline::logging::init_logging;
use std::fs;

// The global subscriber can be installed once per process, so this binary
// holds a single test.
#[test]
fn file_and_console_layers_install_together() {
    let dir = tempfile::tempdir().unwrap();
    let log_dir = dir.path().join("logs");
    std::env::set_var("RUST_LOG", "info");

    let guard = init_logging(&log_dir, "ingest.log");

    assert!(guard.is_some(), "a writable log dir gets a file layer");
    tracing::info!(dataset = "posts", "logging ready");
    drop(guard);

    let files: Vec<_> = fs::read_dir(&log_dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().into_string().unwrap())
        .collect();
    assert_eq!(files.len(), 1, "{:?}", files);
    assert!(files[0].starts_with("ingest.log"));
    let line = fs::read_to_string(log_dir.join(&files[0])).unwrap();
    let record: serde_json::Value = serde_json::from_str(line.lines().next().unwrap()).unwrap();
    assert_eq!(record["fields"]["message"], "logging ready");
}
