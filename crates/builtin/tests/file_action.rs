//! Integration tests for the `file` action against a real directory tree.

use std::path::{Path, PathBuf};

use pretty_assertions::assert_eq;
use rstest::rstest;
use serde_json::{Value, json};
use stepkit_action::{ActionContext, ActionOutput, BuiltinAction, ErrorKind, Inputs, OperationError};
use stepkit_builtin::{ActionConfig, FileAction};
use tempfile::TempDir;

// ---------------------------------------------------------------------------
// Fixture
// ---------------------------------------------------------------------------

struct Fixture {
    _dir: TempDir,
    root: PathBuf,
    file: FileAction,
}

impl Fixture {
    fn new() -> Self {
        Self::with(|_| {})
    }

    fn with(configure: impl FnOnce(&mut ActionConfig)) -> Self {
        let dir = TempDir::new().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let mut config = ActionConfig::new(&root);
        configure(&mut config);
        let file = FileAction::new(&config).unwrap();
        Self {
            _dir: dir,
            root,
            file,
        }
    }

    async fn run(&self, operation: &str, args: Value) -> Result<ActionOutput, OperationError> {
        let Value::Object(inputs) = args else {
            panic!("inputs must be an object");
        };
        self.file
            .execute(operation, &inputs, &ActionContext::default())
            .await
    }

    fn put(&self, rel: &str, contents: &str) -> PathBuf {
        let path = self.root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, contents).unwrap();
        path
    }

    fn read(&self, rel: &str) -> String {
        std::fs::read_to_string(self.root.join(rel)).unwrap()
    }
}

fn names(listing: &Value) -> Vec<&str> {
    listing
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["name"].as_str().unwrap())
        .collect()
}

fn exists(path: &Path) -> bool {
    path.symlink_metadata().is_ok()
}

// ---------------------------------------------------------------------------
// Reads
// ---------------------------------------------------------------------------

#[tokio::test]
async fn read_detects_format_from_extension() {
    let fx = Fixture::new();
    fx.put("data.json", r#"{"a": [1, 2]}"#);
    fx.put("data.yaml", "a: 1\nb: two\n");
    fx.put("notes.txt", "plain");

    let out = fx.run("read", json!({"path": "data.json"})).await.unwrap();
    assert_eq!(out.response, json!({"a": [1, 2]}));
    assert_eq!(out.metadata["format"], json!("json"));

    let out = fx.run("read", json!({"path": "data.yaml"})).await.unwrap();
    assert_eq!(out.response, json!({"a": 1, "b": "two"}));

    let out = fx.run("read", json!({"path": "notes.txt"})).await.unwrap();
    assert_eq!(out.response, json!("plain"));
    assert_eq!(out.metadata["format"], json!("text"));
}

#[tokio::test]
async fn malformed_structured_file_is_a_parse_error() {
    let fx = Fixture::new();
    fx.put("broken.json", "{ nope");
    let err = fx.run("read", json!({"path": "broken.json"})).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::ParseError);
}

#[tokio::test]
async fn malformed_file_falls_back_to_text_when_enabled() {
    let fx = Fixture::with(|c| c.files.parse_fallback_to_text = true);
    fx.put("broken.json", "{ nope");
    let out = fx.run("read", json!({"path": "broken.json"})).await.unwrap();
    assert_eq!(out.response, json!("{ nope"));
    assert_eq!(out.metadata["format"], json!("text"));
}

#[tokio::test]
async fn read_yaml_collects_multiple_documents() {
    let fx = Fixture::new();
    fx.put("multi.yaml", "name: a\n---\nname: b\n");
    let out = fx.run("read_yaml", json!({"path": "multi.yaml"})).await.unwrap();
    assert_eq!(out.response, json!([{"name": "a"}, {"name": "b"}]));
}

#[tokio::test]
async fn read_lines_splits_on_newlines() {
    let fx = Fixture::new();
    fx.put("l.txt", "one\r\ntwo\nthree\n");
    let out = fx.run("read_lines", json!({"path": "l.txt"})).await.unwrap();
    assert_eq!(out.response, json!(["one", "two", "three"]));
    assert_eq!(out.metadata["lines"], json!(3));
}

#[tokio::test]
async fn read_json_extracts_a_nested_value() {
    let fx = Fixture::new();
    fx.put("cfg.json", r#"{"servers": [{"host": "a"}, {"host": "b"}]}"#);
    let out = fx
        .run("read_json", json!({"path": "cfg.json", "extract": "$.servers.1.host"}))
        .await
        .unwrap();
    assert_eq!(out.response, json!("b"));

    let err = fx
        .run("read_json", json!({"path": "cfg.json", "extract": "$.missing"}))
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Validation);
}

#[tokio::test]
async fn reading_a_missing_file_is_file_not_found() {
    let fx = Fixture::new();
    let err = fx.run("read_text", json!({"path": "nope.txt"})).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::FileNotFound);
}

#[tokio::test]
async fn oversized_reads_are_refused() {
    let fx = Fixture::with(|c| c.files.max_file_size = 4);
    fx.put("big.txt", "0123456789");
    let err = fx.run("read_text", json!({"path": "big.txt"})).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::SizeLimit);
}

#[tokio::test]
async fn utf16_with_bom_is_decoded() {
    let fx = Fixture::new();
    let mut bytes = vec![0xFF, 0xFE];
    for unit in "hé".encode_utf16() {
        bytes.extend_from_slice(&unit.to_le_bytes());
    }
    std::fs::write(fx.root.join("u16.txt"), bytes).unwrap();
    let out = fx.run("read_text", json!({"path": "u16.txt"})).await.unwrap();
    assert_eq!(out.response, json!("hé"));
}

// ---------------------------------------------------------------------------
// Writes
// ---------------------------------------------------------------------------

#[tokio::test]
async fn write_json_then_read_json() {
    let fx = Fixture::new();
    let doc = json!({"name": "stepkit", "tags": ["a", "b"], "n": 3});
    fx.run("write_json", json!({"path": "out/doc.json", "content": doc}))
        .await
        .unwrap();
    let out = fx.run("read_json", json!({"path": "out/doc.json"})).await.unwrap();
    assert_eq!(out.response, doc);
    assert!(fx.read("out/doc.json").ends_with('\n'));
}

#[rstest]
#[case("rows.csv", "a,b\n1,x\n")]
#[case("doc.yaml", "a: 1\nb: x\n")]
#[tokio::test]
async fn write_encodes_structured_content_by_extension(#[case] name: &str, #[case] expected: &str) {
    let fx = Fixture::new();
    let content = if name.ends_with(".csv") {
        json!([{"a": 1, "b": "x"}])
    } else {
        json!({"a": 1, "b": "x"})
    };
    fx.run("write", json!({"path": name, "content": content}))
        .await
        .unwrap();
    assert_eq!(fx.read(name), expected);
}

#[tokio::test]
async fn write_keeps_strings_verbatim() {
    let fx = Fixture::new();
    fx.run("write", json!({"path": "raw.json", "content": "not json"}))
        .await
        .unwrap();
    assert_eq!(fx.read("raw.json"), "not json");
}

#[tokio::test]
async fn write_returns_resolved_path_and_size() {
    let fx = Fixture::new();
    let out = fx
        .run("write_text", json!({"path": "nested/deep/a.txt", "content": "abc"}))
        .await
        .unwrap();
    let expected = fx.root.join("nested/deep/a.txt");
    assert_eq!(out.response, json!(expected.to_string_lossy()));
    assert_eq!(out.metadata["bytes"], json!(3));
    assert_eq!(out.io.bytes_written, 3);
}

#[tokio::test]
async fn parents_are_required_when_creation_is_disabled() {
    let fx = Fixture::with(|c| c.files.create_parents = false);
    let err = fx
        .run("write_text", json!({"path": "missing/a.txt", "content": "x"}))
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::FileNotFound);
}

#[tokio::test]
async fn oversized_writes_are_refused_before_touching_disk() {
    let fx = Fixture::with(|c| c.files.max_file_size = 2);
    let err = fx
        .run("write_text", json!({"path": "a.txt", "content": "abc"}))
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::SizeLimit);
    assert!(!exists(&fx.root.join("a.txt")));
}

#[tokio::test]
async fn append_adds_to_the_end() {
    let fx = Fixture::new();
    fx.run("append", json!({"path": "log.txt", "content": "one\n"}))
        .await
        .unwrap();
    fx.run("append", json!({"path": "log.txt", "content": "two\n"}))
        .await
        .unwrap();
    assert_eq!(fx.read("log.txt"), "one\ntwo\n");
}

#[tokio::test]
async fn quota_charges_accumulate_across_operations() {
    let fx = Fixture::with(|c| {
        c.quota.limits.insert("./limited".to_owned(), 10);
    });
    fx.run("write_text", json!({"path": "limited/a", "content": "12345"}))
        .await
        .unwrap();
    fx.run("append", json!({"path": "limited/a", "content": "123"}))
        .await
        .unwrap();
    let err = fx
        .run("write_text", json!({"path": "limited/b", "content": "123"}))
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::DiskFull);
    let usage = fx.file.quota().usage(fx.root.join("limited")).unwrap();
    assert_eq!(usage.used_bytes, 8);
    assert_eq!(usage.quota_bytes, 10);
}

// ---------------------------------------------------------------------------
// Directory operations
// ---------------------------------------------------------------------------

#[tokio::test]
async fn list_is_sorted_and_filterable() {
    let fx = Fixture::new();
    fx.put("b.txt", "b");
    fx.put("a.md", "a");
    fx.put("sub/c.txt", "c");

    let out = fx.run("list", json!({})).await.unwrap();
    assert_eq!(names(&out.response), vec!["a.md", "b.txt", "sub"]);
    assert_eq!(out.metadata["count"], json!(3));

    let out = fx
        .run("list", json!({"pattern": "*.txt", "recursive": true}))
        .await
        .unwrap();
    assert_eq!(names(&out.response), vec!["b.txt", "c.txt"]);

    let out = fx.run("list", json!({"type": "dirs"})).await.unwrap();
    assert_eq!(names(&out.response), vec!["sub"]);
    assert_eq!(out.response[0]["isDir"], json!(true));
}

#[tokio::test]
async fn list_patterns_with_separators_match_relative_paths() {
    let fx = Fixture::new();
    fx.put("src/a.rs", "");
    fx.put("src/deep/b.rs", "");
    fx.put("c.rs", "");
    let out = fx
        .run("list", json!({"pattern": "src/**/*.rs", "recursive": true}))
        .await
        .unwrap();
    assert_eq!(names(&out.response), vec!["a.rs", "b.rs"]);
}

#[tokio::test]
async fn exists_and_stat() {
    let fx = Fixture::new();
    fx.put("f.txt", "12345");

    let out = fx.run("exists", json!({"path": "f.txt"})).await.unwrap();
    assert_eq!(out.response, json!(true));
    let out = fx.run("exists", json!({"path": "g.txt"})).await.unwrap();
    assert_eq!(out.response, json!(false));

    let out = fx.run("stat", json!({"path": "f.txt"})).await.unwrap();
    assert_eq!(out.response["name"], json!("f.txt"));
    assert_eq!(out.response["size"], json!(5));
    assert_eq!(out.response["isDir"], json!(false));
    assert!(out.response["modTime"].is_string());
}

#[tokio::test]
async fn mkdir_reports_whether_it_created_anything() {
    let fx = Fixture::new();
    let err = fx.run("mkdir", json!({"path": "x/y"})).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::FileNotFound);

    let out = fx.run("mkdir", json!({"path": "x/y", "parents": true})).await.unwrap();
    assert_eq!(out.metadata["created"], json!(true));
    let out = fx.run("mkdir", json!({"path": "x/y"})).await.unwrap();
    assert_eq!(out.metadata["created"], json!(false));

    fx.put("file", "");
    let err = fx.run("mkdir", json!({"path": "file"})).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Validation);
}

#[tokio::test]
async fn copy_file_and_tree() {
    let fx = Fixture::new();
    fx.put("src/a.txt", "aa");
    fx.put("src/nested/b.txt", "bbb");

    let out = fx
        .run("copy", json!({"source": "src/a.txt", "dest": "one/a.txt"}))
        .await
        .unwrap();
    assert_eq!(out.metadata["bytes"], json!(2));
    assert_eq!(fx.read("one/a.txt"), "aa");

    let err = fx
        .run("copy", json!({"source": "src", "dest": "copy"}))
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Validation);

    let out = fx
        .run("copy", json!({"source": "src", "dest": "copy", "recursive": true}))
        .await
        .unwrap();
    assert_eq!(out.metadata["bytes"], json!(5));
    assert_eq!(fx.read("copy/nested/b.txt"), "bbb");
    assert_eq!(fx.read("src/a.txt"), "aa");
}

#[tokio::test]
async fn failed_copy_leaves_no_temp_files() {
    let fx = Fixture::new();
    fx.put("a.txt", "new");
    fx.put("busy/keep.txt", "old");

    let err = fx
        .run("copy", json!({"source": "a.txt", "dest": "busy"}))
        .await
        .unwrap_err();
    assert_ne!(err.kind, ErrorKind::Validation);

    fx.put("dst.txt", "old");
    fx.run("copy", json!({"source": "a.txt", "dest": "dst.txt"}))
        .await
        .unwrap();
    assert_eq!(fx.read("dst.txt"), "new");
    assert_eq!(fx.read("busy/keep.txt"), "old");

    let mut entries: Vec<String> = std::fs::read_dir(&fx.root)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    entries.sort();
    assert_eq!(entries, vec!["a.txt", "busy", "dst.txt"]);
}

#[tokio::test]
async fn copy_into_itself_is_refused() {
    let fx = Fixture::new();
    fx.put("src/a.txt", "a");
    let err = fx
        .run("copy", json!({"source": "src", "dest": "src/inner", "recursive": true}))
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Validation);
}

#[tokio::test]
async fn move_renames_within_the_sandbox() {
    let fx = Fixture::new();
    let src = fx.put("a.txt", "a");
    let out = fx
        .run("move", json!({"source": "a.txt", "dest": "moved/b.txt"}))
        .await
        .unwrap();
    assert_eq!(out.metadata["method"], json!("rename"));
    assert!(!exists(&src));
    assert_eq!(fx.read("moved/b.txt"), "a");
}

#[tokio::test]
async fn delete_files_and_directories() {
    let fx = Fixture::new();
    let file = fx.put("a.txt", "a");
    fx.put("dir/b.txt", "b");

    let out = fx.run("delete", json!({"path": "a.txt"})).await.unwrap();
    assert_eq!(out.response, json!(true));
    assert!(!exists(&file));

    let out = fx.run("delete", json!({"path": "a.txt"})).await.unwrap();
    assert_eq!(out.response, json!(false));
    assert_eq!(out.metadata["deleted"], json!(false));

    let err = fx.run("delete", json!({"path": "dir"})).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Validation);
    fx.run("delete", json!({"path": "dir", "recursive": true}))
        .await
        .unwrap();
    assert!(!exists(&fx.root.join("dir")));
}

// ---------------------------------------------------------------------------
// Sandbox
// ---------------------------------------------------------------------------

#[rstest]
#[case("read_text", json!({"path": "../outside.txt"}))]
#[case("write_text", json!({"path": "a/../../x", "content": "x"}))]
#[case("delete", json!({"path": "/etc/passwd"}))]
#[case("copy", json!({"source": "a", "dest": "../b"}))]
#[tokio::test]
async fn paths_outside_the_workflow_are_refused(#[case] operation: &str, #[case] args: Value) {
    let fx = Fixture::new();
    fx.put("a", "a");
    let err = fx.run(operation, args).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::PathTraversal);
}

#[cfg(unix)]
#[tokio::test]
async fn symlinks_are_refused_by_default() {
    let fx = Fixture::new();
    fx.put("real.txt", "r");
    std::os::unix::fs::symlink(fx.root.join("real.txt"), fx.root.join("link.txt")).unwrap();
    let err = fx.run("read_text", json!({"path": "link.txt"})).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::SymlinkDenied);
}

#[tokio::test]
async fn unknown_inputs_are_validation_errors() {
    let fx = Fixture::new();
    let err = fx
        .run("read_text", json!({"path": "a", "encoding": "latin1"}))
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Validation);
    let err = fx.run("read_text", json!({})).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Validation);
}

#[tokio::test]
async fn already_cancelled_context_short_circuits() {
    let fx = Fixture::new();
    let token = tokio_util::sync::CancellationToken::new();
    token.cancel();
    let ctx = ActionContext::default().with_cancellation(token);
    let inputs: Inputs = json!({"path": "a.txt", "content": "x"})
        .as_object()
        .cloned()
        .unwrap();
    let err = fx.file.execute("write_text", &inputs, &ctx).await.unwrap_err();
    assert!(err.is_cancelled());
    assert!(!exists(&fx.root.join("a.txt")));
}
