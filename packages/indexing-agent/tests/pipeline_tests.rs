//! Integration tests for the document pipeline against the mock backend.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use flate2::{write::GzEncoder, Compression};
use indexing_agent::{
    testing::{MockBackendFactory, RecordingReporter},
    DocumentPipeline, ErrorKind, IngestionJob, PipelineConfig, PoolConfig, TenantPool,
};

/// Helper to build a pipeline over a mock factory.
fn setup(factory: &Arc<MockBackendFactory>) -> (DocumentPipeline, Arc<RecordingReporter>) {
    let reporter = Arc::new(RecordingReporter::new());
    let pool = Arc::new(TenantPool::new(factory.clone(), PoolConfig::default()));
    let pipeline = DocumentPipeline::new(pool, reporter.clone(), PipelineConfig::default());
    (pipeline, reporter)
}

fn gzip_base64(html: &str) -> String {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(html.as_bytes()).unwrap();
    base64::engine::general_purpose::STANDARD.encode(encoder.finish().unwrap())
}

#[tokio::test]
async fn test_plain_text_job_is_indexed() {
    let factory = Arc::new(MockBackendFactory::new());
    let (pipeline, _) = setup(&factory);

    let job = IngestionJob::from_payload(
        br#"{"job_id": 1, "request_id": 1, "tenant_id": "t1", "url": "https://x/doc", "content": {"text": "hello world"}}"#,
    )
    .unwrap();

    let result = pipeline.process(&job).await;

    assert!(result.success);
    assert_eq!(result.text_length, 11);
    assert_eq!(factory.insert_count("t1"), 1);
    assert_eq!(
        factory.documents("t1"),
        vec![("https://x/doc".to_string(), "hello world".to_string())]
    );
}

#[tokio::test]
async fn test_empty_content_never_touches_pool() {
    let factory = Arc::new(MockBackendFactory::new());
    let (pipeline, _) = setup(&factory);

    let job = IngestionJob::from_payload(
        br#"{"job_id": 2, "request_id": 1, "tenant_id": "t1", "url": "https://x/empty", "content": {"html": "", "text": ""}}"#,
    )
    .unwrap();

    let result = pipeline.process(&job).await;

    assert!(!result.success);
    assert_eq!(result.error_kind, Some(ErrorKind::EmptyContent));
    assert_eq!(factory.total_creates(), 0);
    assert!(pipeline.pool().is_empty().await);
}

#[tokio::test]
async fn test_compressed_html_is_cleaned_before_insert() {
    let factory = Arc::new(MockBackendFactory::new());
    let (pipeline, _) = setup(&factory);

    let html = r#"<html><head><style>p { color: red }</style></head>
        <body><nav>Home | About</nav><p>Shelter open   tonight</p>
        <script>track()</script><footer>(c) 2024</footer></body></html>"#;
    let job = IngestionJob::from_payload(
        serde_json::json!({
            "job_id": 3,
            "request_id": 1,
            "tenant_id": "t1",
            "url": "https://x/shelter",
            "content": {"html": gzip_base64(html), "encoding": "gzip+base64"}
        })
        .to_string()
        .as_bytes(),
    )
    .unwrap();

    let result = pipeline.process(&job).await;

    assert!(result.success);
    let docs = factory.documents("t1");
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].1, "Shelter open tonight");
}

#[tokio::test]
async fn test_unknown_encoding_is_extraction_failure() {
    let factory = Arc::new(MockBackendFactory::new());
    let (pipeline, _) = setup(&factory);

    let job = IngestionJob::from_payload(
        br#"{"job_id": 4, "request_id": 1, "tenant_id": "t1", "url": "https://x/br", "content": {"html": "abc", "encoding": "brotli"}}"#,
    )
    .unwrap();

    let result = pipeline.process(&job).await;

    assert!(!result.success);
    assert_eq!(result.error_kind, Some(ErrorKind::Extraction));
    assert_eq!(factory.total_creates(), 0);
}

#[tokio::test]
async fn test_processing_twice_leaves_one_document() {
    let factory = Arc::new(MockBackendFactory::new());
    let (pipeline, _) = setup(&factory);

    let job = IngestionJob::from_payload(
        br#"{"job_id": 5, "request_id": 1, "tenant_id": "t1", "url": "https://x/doc", "content": {"text": "same body"}}"#,
    )
    .unwrap();

    assert!(pipeline.process(&job).await.success);
    assert!(pipeline.process(&job).await.success);

    assert_eq!(factory.insert_count("t1"), 2);
    assert_eq!(factory.documents("t1").len(), 1);
    assert_eq!(factory.create_count("t1"), 1);
}

#[tokio::test]
async fn test_tenants_are_isolated() {
    let factory = Arc::new(MockBackendFactory::new());
    let (pipeline, _) = setup(&factory);

    for (tenant, url) in [("a", "https://x/1"), ("b", "https://x/2"), ("a", "https://x/3")] {
        let job = IngestionJob::new(1, tenant, url)
            .with_content(indexing_agent::PageContent::from_text("body"));
        assert!(pipeline.process(&job).await.success);
    }

    assert_eq!(factory.documents("a").len(), 2);
    assert_eq!(factory.documents("b").len(), 1);
    assert_eq!(pipeline.pool().len().await, 2);
}

#[tokio::test]
async fn test_failures_are_reported_with_reason() {
    let factory = Arc::new(MockBackendFactory::new().fail_insert_for("t1"));
    let (pipeline, reporter) = setup(&factory);

    let job = IngestionJob::new(6, "t1", "https://x/doc")
        .with_request_id(77)
        .with_content(indexing_agent::PageContent::from_text("body"));
    let result = pipeline.process(&job).await;

    assert!(!result.success);
    let reports = reporter.wait_for(1, Duration::from_secs(1)).await;
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].0, 77);
    assert_eq!(reports[0].1.error_kind, Some(ErrorKind::BackendWrite));
    assert!(reports[0].1.error_message.is_some());
}
