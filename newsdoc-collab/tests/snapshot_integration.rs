//! Snapshot integration tests.
//!
//! Verifies:
//! - Concurrent snapshot requests for one document share a single write
//! - Different documents snapshot independently
//! - The scheduler stores edited documents and skips unchanged ones
//! - A template opened with a stored version is not written again
//! - The HTTP repository end to end against a local endpoint

use std::sync::Arc;
use std::time::Duration;

use newsdoc_collab::{
    HttpRepository, HttpRepositoryConfig, MemoryRepository, SessionManager, SnapshotConfig,
    SnapshotContext, SnapshotOptions, SnapshotPipeline, SnapshotResult,
};
use newsdoc_core::{write_document, Block, Document};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

const FIRST: &str = "0f1e2d3c-4b5a-4968-8776-655443322110";
const SECOND: &str = "1f2e3d4c-5b6a-4978-8a9b-0c1d2e3f4a5b";

// ─── Helpers ─────────────────────────────────────────────────────────────────

fn article(uuid: &str, text: &str) -> Document {
    let mut document = Document::new(uuid, "core/article");
    document.title = "Election night".into();
    document.content.push(
        Block::new("core/text")
            .with_id("p1")
            .with_data("text", text),
    );
    document
}

async fn open_with(pipeline: &SnapshotPipeline, uuid: &str, text: &str) {
    let sessions = pipeline.sessions();
    let active = sessions.open(uuid).await.unwrap();
    write_document(active.doc().unwrap(), &article(uuid, text), sessions.registry()).unwrap();
}

/// Headers received and `content-length` bytes of body after them.
fn request_complete(raw: &[u8]) -> bool {
    let text = String::from_utf8_lossy(raw);
    let Some(split) = text.find("\r\n\r\n") else {
        return false;
    };
    let length = text[..split]
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);
    raw.len() >= split + 4 + length
}

fn pipeline_with(repo: Arc<MemoryRepository>) -> Arc<SnapshotPipeline> {
    SnapshotPipeline::new(
        Arc::new(SessionManager::in_memory()),
        repo,
        SnapshotConfig::for_testing(),
    )
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_concurrent_requests_share_one_write() {
    let repo = Arc::new(MemoryRepository::new().with_latency(Duration::from_millis(50)));
    let pipeline = pipeline_with(repo.clone());
    open_with(&pipeline, FIRST, "polls closed").await;

    let requests = (0..5).map(|i| {
        let pipeline = Arc::clone(&pipeline);
        tokio::spawn(async move {
            pipeline
                .snapshot(
                    FIRST,
                    SnapshotContext::user(format!("core://user/{i}")),
                    SnapshotOptions::default(),
                )
                .await
        })
    });
    let outcomes = futures_util::future::join_all(requests).await;

    for outcome in outcomes {
        assert_eq!(
            outcome.unwrap().unwrap(),
            SnapshotResult::Stored { uuid: FIRST.into(), version: 1 }
        );
    }
    assert_eq!(repo.put_count(), 1);

    // The finished run no longer blocks new ones.
    let again = pipeline
        .snapshot(FIRST, SnapshotContext::server(), SnapshotOptions::flush())
        .await
        .unwrap();
    assert_eq!(again, SnapshotResult::Stored { uuid: FIRST.into(), version: 2 });
}

#[tokio::test]
async fn test_documents_snapshot_independently() {
    let repo = Arc::new(MemoryRepository::new().with_latency(Duration::from_millis(20)));
    let pipeline = pipeline_with(repo.clone());
    open_with(&pipeline, FIRST, "first").await;
    open_with(&pipeline, SECOND, "second").await;

    let mut outcomes = pipeline.snapshot_all(SnapshotContext::server()).await;
    outcomes.sort_by_key(|(id, _)| *id);
    assert_eq!(outcomes.len(), 2);
    for (id, outcome) in outcomes {
        assert_eq!(
            outcome.unwrap(),
            SnapshotResult::Stored { uuid: id.to_string(), version: 1 }
        );
    }
    assert_eq!(repo.put_count(), 2);
    assert_eq!(
        repo.latest(SECOND).await.unwrap().document.content[0].data_str("text"),
        "second"
    );
}

#[tokio::test]
async fn test_scheduler_stores_only_changes() {
    let repo = Arc::new(MemoryRepository::new());
    let pipeline = pipeline_with(repo.clone());
    open_with(&pipeline, FIRST, "draft").await;

    let handle = pipeline.spawn_scheduler(Duration::from_millis(30));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(repo.history(FIRST).await.len(), 1);

    open_with(&pipeline, FIRST, "final").await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    handle.abort();

    let history = repo.history(FIRST).await;
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].document.content[0].data_str("text"), "final");
    assert_eq!(history[1].options.base_version, Some(1));
}

#[tokio::test]
async fn test_stored_template_is_not_rewritten() {
    let repo = Arc::new(MemoryRepository::new());
    let pipeline = pipeline_with(repo.clone());

    let mut stored = article(FIRST, "from the archive");
    stored.version = 3;
    pipeline
        .sessions()
        .open_with_template(FIRST, &stored)
        .await
        .unwrap();

    let result = pipeline
        .snapshot(FIRST, SnapshotContext::server(), SnapshotOptions::default())
        .await
        .unwrap();
    assert_eq!(result, SnapshotResult::NotNecessary);
    assert_eq!(repo.put_count(), 0);
}

#[tokio::test]
async fn test_http_repository_end_to_end() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = Vec::new();
        let mut buf = [0u8; 8192];
        while !request_complete(&request) {
            let n = socket.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            request.extend_from_slice(&buf[..n]);
        }
        assert!(String::from_utf8_lossy(&request).contains("polls closed"));
        let body = format!(r#"{{"uuid":"{FIRST}","version":12}}"#);
        let response = format!(
            "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
            body.len()
        );
        socket.write_all(response.as_bytes()).await.unwrap();
        socket.shutdown().await.unwrap();
    });

    let repository = HttpRepository::new(HttpRepositoryConfig::new(format!("http://{addr}"))).unwrap();
    let pipeline = SnapshotPipeline::new(
        Arc::new(SessionManager::in_memory()),
        Arc::new(repository),
        SnapshotConfig::for_testing(),
    );
    open_with(&pipeline, FIRST, "polls closed").await;

    let result = pipeline
        .snapshot(FIRST, SnapshotContext::user("core://user/7"), SnapshotOptions::default())
        .await
        .unwrap();
    assert_eq!(result, SnapshotResult::Stored { uuid: FIRST.into(), version: 12 });
    server.await.unwrap();
}
