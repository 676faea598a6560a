//! End-to-end tests for a document on disk, with `sh` standing in for every
//! external tool

use livedoc_core::patcher::OUTPUT_START;
use livedoc_core::{Config, LiveDocument};
use livedoc_types::ChunkId;
use std::path::{Path, PathBuf};
use std::sync::Arc;

fn write_doc(dir: &Path, text: &str) -> PathBuf {
    let path = dir.join("notes.md");
    std::fs::write(&path, text).unwrap();
    path
}

fn executable(path: &Path, script: &str) {
    std::fs::write(path, script).unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }
}

async fn open(path: &Path) -> LiveDocument {
    LiveDocument::open(path, Arc::new(Config::default()))
        .await
        .unwrap()
}

#[tokio::test]
async fn test_run_chunk_from_document() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_doc(dir.path(), "```sh {cmd=true id=\"c1\"}\necho 1\n```\n");
    let doc = open(&path).await;

    let result = doc.run(&ChunkId::new("c1")).await.unwrap();

    assert_eq!(result, "<pre class=\"language-text\">1\n</pre>");
    let record = doc.executor().record(&ChunkId::new("c1")).unwrap();
    assert_eq!(record.plain_result, "1\n");
    assert_eq!(record.source_offset, Some(0));
}

#[tokio::test]
async fn test_commands_run_in_document_directory() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("data.txt"), "from disk\n").unwrap();
    let path = write_doc(dir.path(), "```sh {cmd=true}\ncat data.txt\n```\n");
    let doc = open(&path).await;

    doc.run(&ChunkId::new("chunk-0")).await.unwrap();

    let record = doc.executor().record(&ChunkId::new("chunk-0")).unwrap();
    assert_eq!(record.plain_result, "from disk\n");
}

#[tokio::test]
async fn test_continue_composes_predecessors() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_doc(
        dir.path(),
        "```sh {cmd=true}\nA=a\n```\n\n```sh {cmd=true continue}\nB=b\n```\n\n```sh {cmd=true continue id=\"c\"}\necho $A$B\n```\n",
    );
    let doc = open(&path).await;

    doc.run(&ChunkId::new("c")).await.unwrap();

    let record = doc.executor().record(&ChunkId::new("c")).unwrap();
    assert_eq!(record.plain_result, "ab\n");
}

#[tokio::test]
async fn test_modify_source_writes_block_once() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_doc(
        dir.path(),
        "# Title\n\n```sh {cmd=true modify_source id=\"m\"}\necho patched\n```\n\nTail\n",
    );
    let doc = open(&path).await;

    let first = doc.run(&ChunkId::new("m")).await.unwrap();
    assert_eq!(first, "");
    let after_first = std::fs::read_to_string(&path).unwrap();
    assert!(after_first.contains(
        "```\n\n<!-- code_chunk_output -->\n\n```\npatched\n```\n\n<!-- /code_chunk_output -->\n\nTail\n"
    ));

    doc.rescan().await.unwrap();
    doc.run(&ChunkId::new("m")).await.unwrap();

    let after_second = std::fs::read_to_string(&path).unwrap();
    assert_eq!(after_second, after_first);
    assert_eq!(after_second.matches(OUTPUT_START).count(), 1);
}

#[tokio::test]
async fn test_rescan_keeps_results_for_known_ids() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_doc(dir.path(), "```sh {cmd=true id=\"k\"}\necho keep\n```\n");
    let doc = open(&path).await;
    doc.run(&ChunkId::new("k")).await.unwrap();

    std::fs::write(
        &path,
        "Intro\n\n```sh {cmd=true id=\"new\"}\necho new\n```\n\n```sh {cmd=true id=\"k\"}\necho changed\n```\n",
    )
    .unwrap();
    let ids = doc.rescan().await.unwrap();

    assert_eq!(ids, vec![ChunkId::new("new"), ChunkId::new("k")]);
    let record = doc.executor().record(&ChunkId::new("k")).unwrap();
    assert_eq!(record.code, "echo changed\n");
    assert_eq!(record.plain_result, "keep\n");
}

#[tokio::test]
async fn test_duplicate_ids_fail_the_scan() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_doc(
        dir.path(),
        "```sh {cmd=true id=\"x\"}\n```\n```sh {cmd=true id=\"x\"}\n```\n",
    );

    let err = LiveDocument::open(&path, Arc::new(Config::default()))
        .await
        .err()
        .unwrap();
    assert!(err.to_string().contains("`x`"));
}

#[tokio::test]
async fn test_run_on_save_only_runs_marked_chunks() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_doc(
        dir.path(),
        "```sh {cmd=true run_on_save id=\"auto\"}\necho auto\n```\n\n```sh {cmd=true id=\"manual\"}\ntouch manual-ran\n```\n",
    );
    let doc = open(&path).await;

    let results = doc.run_on_save().await;

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].0, ChunkId::new("auto"));
    assert!(!dir.path().join("manual-ran").exists());
}

#[tokio::test]
async fn test_toc_uses_document_headings() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_doc(
        dir.path(),
        "# One\n\n```text {cmd=\"toc\" id=\"toc\" depthTo=2}\n```\n\n## Two\n\n### Three\n",
    );
    let doc = open(&path).await;

    doc.run(&ChunkId::new("toc")).await.unwrap();

    let record = doc.executor().record(&ChunkId::new("toc")).unwrap();
    assert_eq!(record.plain_result, "- [One](#one)\n  - [Two](#two)");
}

#[tokio::test]
async fn test_identical_plantuml_blocks_render_once() {
    let dir = tempfile::tempdir().unwrap();
    let calls = dir.path().join("calls");
    let renderer = dir.path().join("fake-java");
    executable(
        &renderer,
        &format!(
            "#!/bin/sh\nwhile IFS= read -r line; do\n  case \"$line\" in\n    @enduml) echo x >> '{}'; printf '%s<svg>ok</svg>\\n' '<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"no\"?>' ;;\n  esac\ndone\n",
            calls.display()
        ),
    );

    let mut config = Config::default();
    config.plantuml.java = renderer.to_string_lossy().into_owned();
    let path = write_doc(
        dir.path(),
        "```puml {filename=\"one.svg\"}\nA -> B\n```\n\n```puml\nA -> B\n```\n\n```puml\nA -> B\n```\n",
    );
    let doc = LiveDocument::open(&path, Arc::new(config)).await.unwrap();

    let rendered = doc.render_diagrams().await.unwrap();

    assert_eq!(rendered.len(), 3);
    assert!(rendered.iter().all(|d| d.error.is_none()));
    assert!(rendered[0].artifact.ends_with("<svg>ok</svg>"));
    // The first block has a filename, so its key differs from the other two
    assert!(!rendered[1].cached);
    assert!(rendered[2].cached);
    assert_eq!(std::fs::read_to_string(&calls).unwrap().lines().count(), 2);
    assert!(dir.path().join("assets/one.svg").exists());

    doc.close().await;
}

#[tokio::test]
async fn test_failed_rescan_keeps_last_good_chain() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_doc(
        dir.path(),
        "```sh {cmd=true id=\"x\"}\n```\n\n```sh {cmd=true id=\"y\"}\n```\n\n```sh {cmd=true id=\"z\"}\n```\n",
    );
    let doc = open(&path).await;

    std::fs::write(
        &path,
        "```sh {cmd=true id=\"a\"}\n```\n\n```sh {cmd=true id=\"a\"}\n```\n",
    )
    .unwrap();
    let err = doc.rescan().await.unwrap_err();

    assert!(err.to_string().contains("`a`"));
    let ids = doc.executor().with_registry(|registry| registry.ids().to_vec());
    assert_eq!(
        ids,
        vec![ChunkId::new("x"), ChunkId::new("y"), ChunkId::new("z")]
    );
}

#[tokio::test]
async fn test_run_all_patches_every_modify_source_chunk() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_doc(
        dir.path(),
        "```sh {cmd=true modify_source id=\"one\"}\necho first\n```\n\nBetween\n\n```sh {cmd=true modify_source id=\"two\"}\necho second\n```\n",
    );
    let doc = open(&path).await;

    let results = doc.run_all().await;

    assert_eq!(results.len(), 2);
    let text = std::fs::read_to_string(&path).unwrap();
    assert_eq!(text.matches(OUTPUT_START).count(), 2);
    assert!(text.contains("```\nfirst\n```"));
    assert!(text.contains("```\nsecond\n```"));
    assert!(text.find("first").unwrap() < text.find("Between").unwrap());
    assert!(text.find("Between").unwrap() < text.find("second").unwrap());
}
