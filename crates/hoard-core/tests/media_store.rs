//! Media store tests - dedup, hashing, retry, skips and cleanup

mod common;

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use common::{MockProvider, Reply, ScriptedFetcher, conversation, fast_media_config, temp_files, with_attachments};
use hoard_core::ArchiveLayout;
use hoard_core::media::{DownloadContext, MediaCategory, MediaRegistry, MediaStore};
use hoard_core::models::{Attachment, AttachmentKind};

const ABC_SHA256: &str = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";

async fn open_store(base: &Path, fetcher: &Arc<ScriptedFetcher>) -> MediaStore {
    MediaStore::with_fetcher(
        ArchiveLayout::new(base, "mock"),
        &fast_media_config(),
        false,
        fetcher.clone(),
    )
    .await
    .expect("open store")
}

fn image(id: &str, url: &str) -> Attachment {
    Attachment::new(id, AttachmentKind::Image).with_url(url)
}

#[tokio::test]
async fn identical_bytes_are_stored_once() {
    let dir = tempfile::tempdir().expect("tempdir");
    let fetcher = Arc::new(
        ScriptedFetcher::new()
            .with("https://a.example/one.png", vec![Reply::typed(b"abc", "image/png")])
            .with("https://b.example/two", vec![Reply::body(b"abc")]),
    );
    let store = open_store(dir.path(), &fetcher).await;

    let first = store
        .store_attachment(&image("x", "https://a.example/one.png"), "conv-a", None, false)
        .await
        .expect("first");
    let second = store
        .store_attachment(&image("y", "https://b.example/two"), "conv-b", None, false)
        .await
        .expect("second");

    assert!(!first.skipped);
    assert!(second.skipped);
    assert_eq!(first.hash, ABC_SHA256);
    assert_eq!(first.hash, second.hash);
    assert_eq!(first.path, second.path);
    assert!(first.path.ends_with(format!("media/images/{ABC_SHA256}.png")));
    assert_eq!(std::fs::read(&first.path).expect("read"), b"abc");

    let registry = MediaRegistry::load(ArchiveLayout::new(dir.path(), "mock").registry_path())
        .await
        .expect("load registry");
    assert_eq!(registry.len(), 1);
    let entry = registry.get(ABC_SHA256).expect("entry");
    assert_eq!(entry.references, vec!["conv-a", "conv-b"]);
    assert_eq!(entry.size, 3);
    assert_eq!(entry.category, MediaCategory::Image);
    assert_eq!(temp_files(dir.path()), 0);
}

#[tokio::test]
async fn repeated_store_for_same_conversation_is_idempotent() {
    let dir = tempfile::tempdir().expect("tempdir");
    let fetcher = Arc::new(ScriptedFetcher::new().with("https://x/a", vec![Reply::body(b"abc")]));
    let store = open_store(dir.path(), &fetcher).await;
    let attachment = image("x", "https://x/a");

    for _ in 0..3 {
        store
            .store_attachment(&attachment, "conv-a", None, false)
            .await
            .expect("store");
    }

    let entry = store.entry(ABC_SHA256).await.expect("entry");
    assert_eq!(entry.references, vec!["conv-a"]);
    assert_eq!(store.stats().await.dedup_savings, 0);
}

#[tokio::test]
async fn hash_ignores_declared_metadata() {
    let dir = tempfile::tempdir().expect("tempdir");
    let fetcher = Arc::new(ScriptedFetcher::new());
    let store = open_store(dir.path(), &fetcher).await;

    let as_pdf = Attachment::new("p", AttachmentKind::Document)
        .with_data(b"abc".to_vec())
        .with_mime_type("application/pdf");
    let stored = store
        .store_attachment(&as_pdf, "conv", None, false)
        .await
        .expect("store");

    assert_eq!(stored.hash, ABC_SHA256);
    assert!(stored.path.ends_with(format!("media/documents/{ABC_SHA256}.pdf")));
    assert_eq!(fetcher.total_calls(), 0);
}

#[tokio::test]
async fn inline_content_is_hashed_without_download() {
    let dir = tempfile::tempdir().expect("tempdir");
    let fetcher = Arc::new(ScriptedFetcher::new());
    let store = open_store(dir.path(), &fetcher).await;

    let mut code = Attachment::new("snippet", AttachmentKind::Code);
    code.content = Some("fn main() {}".to_string());
    let conv = with_attachments(conversation("c", 1, 1), vec![code]);

    let result = store
        .download_conversation_media(&conv, DownloadContext::default())
        .await;

    assert_eq!(result.downloaded, 1);
    assert_eq!(result.bytes, 12);
    assert_eq!(fetcher.total_calls(), 0);
}

#[tokio::test]
async fn rate_limit_is_retried_then_reported() {
    let dir = tempfile::tempdir().expect("tempdir");
    let fetcher = Arc::new(
        ScriptedFetcher::new()
            .with("https://x/limited", vec![Reply::Status(429)])
            .with("https://x/missing", vec![Reply::Status(404)])
            .with(
                "https://x/flaky",
                vec![Reply::Status(429), Reply::Status(429), Reply::body(b"ok")],
            ),
    );
    let store = open_store(dir.path(), &fetcher).await;
    let conv = with_attachments(
        conversation("c", 1, 1),
        vec![
            image("limited", "https://x/limited"),
            image("missing", "https://x/missing"),
            image("flaky", "https://x/flaky"),
        ],
    );

    let result = store
        .download_conversation_media(&conv, DownloadContext::default())
        .await;

    // Initial attempt plus three retries.
    assert_eq!(fetcher.calls("https://x/limited"), 4);
    assert_eq!(fetcher.calls("https://x/missing"), 1);
    assert_eq!(fetcher.calls("https://x/flaky"), 3);
    assert_eq!(result.downloaded, 1);
    assert_eq!(result.failed, 2);

    let mut failed: Vec<&str> = result.errors.iter().map(|e| e.attachment_id.as_str()).collect();
    failed.sort_unstable();
    assert_eq!(failed, vec!["limited", "missing"]);
    assert!(result.errors.iter().all(|e| e.kind == "http"));
    assert_eq!(temp_files(dir.path()), 0);
}

#[tokio::test]
async fn unsupported_and_blank_urls_are_skipped() {
    let dir = tempfile::tempdir().expect("tempdir");
    let fetcher = Arc::new(ScriptedFetcher::new().with("https://x/real.png", vec![Reply::body(b"png")]));
    let store = open_store(dir.path(), &fetcher).await;
    let mut blank = Attachment::new("blank", AttachmentKind::Image);
    blank.url = Some("   ".to_string());
    let conv = with_attachments(
        conversation("c", 1, 1),
        vec![
            image("internal", "sediment://file_123"),
            image("service", "file-service://file-abc"),
            blank,
            Attachment::new("none", AttachmentKind::Document),
            image("real", "https://x/real.png"),
        ],
    );

    let result = store
        .download_conversation_media(&conv, DownloadContext::default())
        .await;

    assert_eq!(result.skipped, 4);
    assert_eq!(result.failed, 0);
    assert_eq!(result.downloaded, 1);
    assert_eq!(fetcher.total_calls(), 1);
}

#[tokio::test]
async fn broken_stream_leaves_no_temp_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let fetcher = Arc::new(ScriptedFetcher::new().with("https://x/broken", vec![Reply::Broken]));
    let store = open_store(dir.path(), &fetcher).await;

    let err = store
        .store_attachment(&image("b", "https://x/broken"), "conv", None, false)
        .await
        .err();

    assert!(matches!(err, Some(hoard_core::Error::Network(_))));
    assert_eq!(temp_files(dir.path()), 0);
    assert_eq!(store.stats().await.entries, 0);
}

#[tokio::test]
async fn expired_signed_link_is_resolved_once() {
    let dir = tempfile::tempdir().expect("tempdir");
    let expired = "https://files.oaiusercontent.com/file-1?sig=old";
    let fresh = "https://files.oaiusercontent.com/file-1?sig=new";
    let fetcher = Arc::new(
        ScriptedFetcher::new()
            .with(expired, vec![Reply::Status(403)])
            .with(fresh, vec![Reply::typed(b"abc", "image/webp")]),
    );
    let store = open_store(dir.path(), &fetcher).await;
    let provider = MockProvider::new("mock").with_resolved_url("signed", fresh);
    let conv = with_attachments(conversation("c", 1, 1), vec![image("signed", expired)]);

    let result = store
        .download_conversation_media(
            &conv,
            DownloadContext {
                cookies: Some("session=1"),
                provider: Some(&provider),
            },
        )
        .await;

    assert_eq!(result.downloaded, 1);
    assert_eq!(result.failed, 0);
    assert_eq!(provider.resolve_calls.load(Ordering::SeqCst), 1);
    assert_eq!(fetcher.calls(expired), 1);
    assert_eq!(fetcher.calls(fresh), 1);
    assert!(
        fetcher
            .cookies_seen()
            .iter()
            .all(|c| c.as_deref() == Some("session=1"))
    );
}

#[tokio::test]
async fn plain_not_found_is_never_resolved() {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = "https://cdn.example.com/gone.png";
    let fetcher = Arc::new(ScriptedFetcher::new().with(url, vec![Reply::Status(404)]));
    let store = open_store(dir.path(), &fetcher).await;
    let provider = MockProvider::new("mock").with_resolved_url("a", "https://cdn.example.com/new.png");
    let conv = with_attachments(conversation("c", 1, 1), vec![image("a", url)]);

    let result = store
        .download_conversation_media(
            &conv,
            DownloadContext {
                cookies: None,
                provider: Some(&provider),
            },
        )
        .await;

    assert_eq!(result.failed, 1);
    assert_eq!(provider.resolve_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn deferred_save_waits_for_explicit_save() {
    let dir = tempfile::tempdir().expect("tempdir");
    let fetcher = Arc::new(ScriptedFetcher::new().with("https://x/a", vec![Reply::body(b"abc")]));
    let store = open_store(dir.path(), &fetcher).await;
    let registry_path = store.layout().registry_path();

    store
        .store_attachment(&image("a", "https://x/a"), "conv", None, true)
        .await
        .expect("store");
    assert!(!registry_path.exists());

    assert!(store.save_registry().await.expect("save"));
    assert!(registry_path.exists());
    assert!(!store.save_registry().await.expect("second save"));
}

#[tokio::test]
async fn rate_limit_sensitive_store_downloads_sequentially() {
    let dir = tempfile::tempdir().expect("tempdir");
    let fetcher = Arc::new(
        ScriptedFetcher::new()
            .with("https://x/1", vec![Reply::body(b"one")])
            .with("https://x/2", vec![Reply::body(b"two")]),
    );
    let store = MediaStore::with_fetcher(
        ArchiveLayout::new(dir.path(), "mock"),
        &fast_media_config(),
        true,
        fetcher.clone(),
    )
    .await
    .expect("open store");
    assert_eq!(store.concurrency(), 1);

    let conv = with_attachments(
        conversation("c", 1, 1),
        vec![image("1", "https://x/1"), image("2", "https://x/2")],
    );
    let result = store
        .download_conversation_media(&conv, DownloadContext::default())
        .await;
    assert_eq!(result.downloaded, 2);
}

#[tokio::test]
async fn dedup_savings_follow_reference_counts() {
    let dir = tempfile::tempdir().expect("tempdir");
    let fetcher = Arc::new(ScriptedFetcher::new());
    let store = open_store(dir.path(), &fetcher).await;

    // Three distinct 4-byte blobs, each referenced by five conversations.
    for blob in [b"aaaa", b"bbbb", b"cccc"] {
        for conv in 0..5 {
            let attachment = Attachment::new("a", AttachmentKind::Document).with_data(blob.to_vec());
            store
                .store_attachment(&attachment, &format!("conv-{conv}"), None, true)
                .await
                .expect("store");
        }
    }

    let stats = store.stats().await;
    assert_eq!(stats.entries, 3);
    assert_eq!(stats.total_bytes, 12);
    assert_eq!(stats.total_references, 15);
    assert_eq!(stats.dedup_savings, 4 * 3 * (5 - 1));
}

#[tokio::test]
async fn garbage_collect_keeps_live_content() {
    let dir = tempfile::tempdir().expect("tempdir");
    let fetcher = Arc::new(ScriptedFetcher::new());
    let store = open_store(dir.path(), &fetcher).await;

    let shared = Attachment::new("s", AttachmentKind::Document).with_data(b"shared".to_vec());
    let orphan = Attachment::new("o", AttachmentKind::Document).with_data(b"orphan".to_vec());
    let kept = store.store_attachment(&shared, "live", None, true).await.expect("store");
    store.store_attachment(&shared, "dead", None, true).await.expect("store");
    let removed = store.store_attachment(&orphan, "dead", None, true).await.expect("store");
    store.save_registry().await.expect("save");

    let live: HashSet<String> = ["live".to_string()].into_iter().collect();
    let result = store.garbage_collect(&live).await.expect("gc");

    assert_eq!(result.entries_removed, 1);
    assert_eq!(result.files_removed, 1);
    assert_eq!(result.bytes_freed, 6);
    assert!(kept.path.exists());
    assert!(!removed.path.exists());
    let entry = store.entry(&kept.hash).await.expect("kept entry");
    assert_eq!(entry.references, vec!["live"]);

    // A second run finds nothing and tolerates already missing files.
    let again = store.garbage_collect(&live).await.expect("gc again");
    assert_eq!(again.entries_removed, 0);
}
