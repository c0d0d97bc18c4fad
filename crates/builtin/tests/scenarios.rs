//! End-to-end behaviour through the observed registry: the same path a
//! workflow step takes.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use stepkit_action::{ActionContext, ActionRegistry, BuiltinAction, ErrorKind, Inputs};
use stepkit_builtin::{ActionConfig, FileAction, register_builtins};
use stepkit_sandbox::BaseDirs;
use stepkit_telemetry::metrics::Labels;
use stepkit_telemetry::{AuditResult, MemoryAuditLogger, MetricsRegistry, OperationMetrics};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

struct Harness {
    _root: TempDir,
    workflow: PathBuf,
    out: PathBuf,
    registry: ActionRegistry,
    audit: Arc<MemoryAuditLogger>,
    metrics: MetricsRegistry,
}

fn harness_with(configure: impl FnOnce(&mut ActionConfig)) -> Harness {
    let root = TempDir::new().unwrap();
    let base = root.path().canonicalize().unwrap();
    let workflow = base.join("wf");
    let out = base.join("out");
    std::fs::create_dir_all(&workflow).unwrap();
    std::fs::create_dir_all(&out).unwrap();

    let mut config = ActionConfig::new(&workflow);
    config.dirs = BaseDirs::new(&workflow).with_output_dir(&out);
    configure(&mut config);

    let mut registry = ActionRegistry::new();
    register_builtins(&mut registry, &config).unwrap();
    let audit = Arc::new(MemoryAuditLogger::new());
    let metrics = MetricsRegistry::new();
    let registry = registry.with_observability(
        audit.clone(),
        Arc::new(OperationMetrics::new(metrics.clone())),
    );
    Harness {
        _root: root,
        workflow,
        out,
        registry,
        audit,
        metrics,
    }
}

fn harness() -> Harness {
    harness_with(|_| {})
}

fn inputs(value: Value) -> Inputs {
    match value {
        Value::Object(map) => map,
        other => panic!("inputs must be an object, got {other}"),
    }
}

fn ctx() -> ActionContext {
    ActionContext::new("wf-1", "step-1")
}

fn dir_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

// ---------------------------------------------------------------------------
// Write then read
// ---------------------------------------------------------------------------

#[tokio::test]
async fn write_text_then_read_text() {
    let h = harness();
    h.registry
        .dispatch("file", "write_text", &inputs(json!({"path": "./a.txt", "content": "Hello"})), &ctx())
        .await
        .unwrap();

    let out = h
        .registry
        .dispatch("file", "read_text", &inputs(json!({"path": "./a.txt"})), &ctx())
        .await
        .unwrap();
    assert_eq!(out.response, json!("Hello"));
    assert_eq!(out.metadata["bytes"], json!(5));
    assert_eq!(out.metadata["operation"], json!("read_text"));
    assert!(out.metadata.contains_key("duration_ms"));
    assert_eq!(dir_names(&h.workflow), vec!["a.txt"]);
}

#[tokio::test]
async fn writes_and_reads_are_audited_and_counted() {
    let h = harness();
    h.registry
        .dispatch("file", "write_text", &inputs(json!({"path": "a.txt", "content": "Hello"})), &ctx())
        .await
        .unwrap();
    h.registry
        .dispatch("file", "read_text", &inputs(json!({"path": "missing.txt"})), &ctx())
        .await
        .unwrap_err();

    let entries = h.audit.entries();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].operation, "file.write_text");
    assert_eq!(entries[0].result, AuditResult::Success);
    assert_eq!(entries[0].bytes_written, 5);
    assert_eq!(entries[0].workflow_id, "wf-1");
    assert_eq!(entries[0].step_id, "step-1");
    assert_eq!(entries[1].result, AuditResult::Error);
    assert!(entries[1].error_message.as_deref().is_some_and(|m| !m.is_empty()));

    assert_eq!(h.metrics.counter_value("file_bytes_written_total", &Labels::none()), 5);
    assert_eq!(
        h.metrics.counter_value("file_errors_total", &Labels::new([("error_type", "file_not_found")])),
        1
    );
}

// ---------------------------------------------------------------------------
// Sandbox refusals
// ---------------------------------------------------------------------------

#[tokio::test]
async fn traversal_is_refused() {
    let mut registry = ActionRegistry::new();
    register_builtins(&mut registry, &ActionConfig::new("/w")).unwrap();
    let err = registry
        .dispatch("file", "write_text", &inputs(json!({"path": "../escape.txt", "content": "x"})), &ctx())
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::PathTraversal);
    assert!(!err.message.contains("escape.txt"));
}

#[tokio::test]
async fn out_prefix_without_output_dir_is_configuration_error() {
    let h = harness_with(|c| c.dirs.output_dir = PathBuf::new());
    let calls = [
        ("read_text", json!({"path": "$out/a.txt"})),
        ("write_text", json!({"path": "$out/a.txt", "content": "x"})),
        ("list", json!({"path": "$out/"})),
        ("exists", json!({"path": "$out/a.txt"})),
        ("delete", json!({"path": "$out/../../etc/passwd"})),
        ("copy", json!({"source": "$out/a", "dest": "b"})),
    ];
    for (operation, args) in calls {
        let err = h
            .registry
            .dispatch("file", operation, &inputs(args), &ctx())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Configuration, "{operation}");
    }
}

// ---------------------------------------------------------------------------
// Quotas
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_writers_share_one_quota() {
    let root = TempDir::new().unwrap();
    let base = root.path().canonicalize().unwrap();
    let out = base.join("out");
    std::fs::create_dir_all(&out).unwrap();
    let mut config = ActionConfig::new(&base);
    config.dirs.output_dir = out.clone();
    config.quota.limits.insert("$out".to_owned(), 1000);
    let file = Arc::new(FileAction::new(&config).unwrap());

    let payload = "x".repeat(600);
    let tasks: Vec<_> = ["a.bin", "b.bin"]
        .into_iter()
        .map(|name| {
            let file = Arc::clone(&file);
            let args = inputs(json!({"path": format!("$out/{name}"), "content": &payload}));
            tokio::spawn(async move {
                file.execute("write_text", &args, &ActionContext::default()).await
            })
        })
        .collect();

    let mut ok = 0;
    let mut refused = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => ok += 1,
            Err(err) => {
                assert_eq!(err.kind, ErrorKind::DiskFull);
                refused += 1;
            }
        }
    }
    assert_eq!((ok, refused), (1, 1));
    assert_eq!(file.quota().usage(&out).unwrap().used_bytes, 600);
    assert_eq!(dir_names(&out).len(), 1);
}

// ---------------------------------------------------------------------------
// Templates
// ---------------------------------------------------------------------------

#[tokio::test]
async fn render_writes_output() {
    let h = harness();
    std::fs::write(h.workflow.join("t.tmpl"), "Hi {{ .name | upper }}!").unwrap();
    let out = h
        .registry
        .dispatch(
            "file",
            "render",
            &inputs(json!({"template": "t.tmpl", "output": "$out/hi.txt", "data": {"name": "ada"}})),
            &ctx(),
        )
        .await
        .unwrap();
    assert_eq!(std::fs::read_to_string(h.out.join("hi.txt")).unwrap(), "Hi ADA!");
    assert_eq!(out.metadata["bytes"], json!(7));
}

#[tokio::test]
async fn render_refuses_exec_and_writes_nothing() {
    let h = harness();
    std::fs::write(h.workflow.join("bad.tmpl"), "{{ exec \"ls\" }}").unwrap();
    let err = h
        .registry
        .dispatch(
            "file",
            "render",
            &inputs(json!({"template": "bad.tmpl", "output": "$out/never.txt"})),
            &ctx(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Validation);
    assert!(!h.out.join("never.txt").exists());
}

// ---------------------------------------------------------------------------
// CSV
// ---------------------------------------------------------------------------

#[tokio::test]
async fn read_csv_suffixes_duplicate_headers() {
    let h = harness();
    std::fs::write(h.workflow.join("p.csv"), "name,age,name\nA,1,B\n").unwrap();
    let out = h
        .registry
        .dispatch("file", "read_csv", &inputs(json!({"path": "p.csv"})), &ctx())
        .await
        .unwrap();
    assert_eq!(out.response, json!([{"name": "A", "age": "1", "name_2": "B"}]));
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn sleep_returns_promptly_on_cancellation() {
    let h = harness();
    let token = CancellationToken::new();
    let ctx = ctx().with_cancellation(token.clone());
    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        token.cancel();
    });

    let started = Instant::now();
    let err = h
        .registry
        .dispatch("utility", "sleep", &inputs(json!({"milliseconds": 1000})), &ctx)
        .await
        .unwrap_err();
    let elapsed = started.elapsed();
    canceller.await.unwrap();

    assert_eq!(err.kind, ErrorKind::Internal);
    assert!(err.is_cancelled());
    assert!(elapsed < Duration::from_millis(80), "took {elapsed:?}");
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unknown_action_and_operation_are_validation_errors() {
    let h = harness();
    let err = h.registry.dispatch("nope", "x", &Inputs::new(), &ctx()).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Validation);
    let err = h.registry.dispatch("file", "chmod", &Inputs::new(), &ctx()).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Validation);
}

#[test]
fn every_builtin_operation_is_listed() {
    let h = harness();
    let ops = h.registry.operations();
    for op in ["file.read", "file.render", "file.move", "utility.id_uuid", "utility.sleep", "shell.run"] {
        assert!(ops.iter().any(|o| o == op), "{op} missing from {ops:?}");
    }
}
