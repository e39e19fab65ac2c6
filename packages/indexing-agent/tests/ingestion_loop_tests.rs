//! Integration tests for the ingestion loop.
//!
//! These run the loop over a scripted in-memory source and verify the
//! commit rules:
//! 1. Successful jobs are committed exactly once
//! 2. Failed jobs are never committed
//! 3. Malformed payloads are committed without processing
//! 4. Commits follow consumption order within a partition

use std::sync::Arc;
use std::time::Duration;

use indexing_agent::{
    testing::{MemorySource, MockBackendFactory, RecordingReporter},
    ConsumerConfig, DocumentPipeline, IngestError, IngestionJob, IngestionLoop, PageContent,
    PipelineConfig, PoolConfig, Service, TenantPool, TransportError,
};
use tokio_util::sync::CancellationToken;

/// Helper to create a pipeline over a mock factory.
fn pipeline(factory: &Arc<MockBackendFactory>, max_workers: usize) -> Arc<DocumentPipeline> {
    let pool = Arc::new(TenantPool::new(factory.clone(), PoolConfig::default()));
    Arc::new(DocumentPipeline::new(
        pool,
        Arc::new(RecordingReporter::new()),
        PipelineConfig { max_workers },
    ))
}

fn job(job_id: i64, tenant: &str, url: &str) -> IngestionJob {
    IngestionJob::new(job_id, tenant, url).with_content(PageContent::from_text("document body"))
}

#[tokio::test]
async fn test_success_committed_failure_left_for_redelivery() {
    let factory = Arc::new(MockBackendFactory::new().fail_insert_for("bad"));
    let source = MemorySource::new()
        .with_job("indexing.jobs.p0", &job(1, "good", "https://x/1"))
        .with_job("indexing.jobs.p0", &job(2, "bad", "https://x/2"))
        .with_job("indexing.jobs.p0", &job(3, "good", "https://x/3"));
    let handle = source.handle();

    let ingestion = IngestionLoop::new(source, pipeline(&factory, 2), ConsumerConfig::default());
    let stats = ingestion.stats();
    ingestion.run().await.unwrap();

    assert_eq!(handle.committed_offsets("indexing.jobs.p0"), vec![1, 3]);
    assert_eq!(stats.received(), 3);
    assert_eq!(stats.committed(), 2);
    assert_eq!(stats.failed(), 1);
    assert!(handle.is_closed());
}

#[tokio::test]
async fn test_malformed_payloads_are_committed() {
    let factory = Arc::new(MockBackendFactory::new());
    let source = MemorySource::new()
        .with_payload("indexing.jobs.p0", &b"not json"[..])
        .with_payload(
            "indexing.jobs.p0",
            &br#"{"job_id": 1, "request_id": 1, "tenant_id": "", "url": "https://x/1"}"#[..],
        )
        .with_payload("indexing.jobs.p0", &br#"{"job_id": 2}"#[..]);
    let handle = source.handle();

    let ingestion = IngestionLoop::new(source, pipeline(&factory, 2), ConsumerConfig::default());
    let stats = ingestion.stats();
    ingestion.run().await.unwrap();

    assert_eq!(handle.committed_offsets("indexing.jobs.p0"), vec![1, 2, 3]);
    assert_eq!(stats.skipped(), 3);
    assert_eq!(factory.total_creates(), 0);
}

#[tokio::test]
async fn test_commits_follow_partition_order() {
    let factory = Arc::new(MockBackendFactory::new().with_insert_delay(Duration::from_millis(5)));
    let mut source = MemorySource::new();
    for i in 0..6 {
        source = source
            .with_job("indexing.jobs.a", &job(i, "a", &format!("https://a/{}", i)))
            .with_job("indexing.jobs.b", &job(100 + i, "b", &format!("https://b/{}", i)));
    }
    let handle = source.handle();

    let ingestion = IngestionLoop::new(source, pipeline(&factory, 4), ConsumerConfig::default());
    ingestion.run().await.unwrap();

    assert_eq!(handle.committed_offsets("indexing.jobs.a"), vec![1, 2, 3, 4, 5, 6]);
    assert_eq!(handle.committed_offsets("indexing.jobs.b"), vec![1, 2, 3, 4, 5, 6]);
    assert_eq!(factory.documents("a").len(), 6);
    assert_eq!(factory.documents("b").len(), 6);
}

#[tokio::test]
async fn test_redelivered_job_is_indexed_once() {
    let factory = Arc::new(MockBackendFactory::new());
    let record = job(1, "t1", "https://x/doc");
    let source = MemorySource::new()
        .with_job("indexing.jobs.p0", &record)
        .with_job("indexing.jobs.p0", &record);
    let handle = source.handle();

    IngestionLoop::new(source, pipeline(&factory, 2), ConsumerConfig::default())
        .run()
        .await
        .unwrap();

    assert_eq!(handle.commits().len(), 2);
    assert_eq!(factory.insert_count("t1"), 2);
    assert_eq!(factory.documents("t1").len(), 1);
}

#[tokio::test]
async fn test_transport_error_is_fatal() {
    let factory = Arc::new(MockBackendFactory::new());
    let source = MemorySource::new()
        .with_job("indexing.jobs.p0", &job(1, "t1", "https://x/1"))
        .with_error("connection reset")
        .with_job("indexing.jobs.p0", &job(2, "t1", "https://x/2"));
    let handle = source.handle();

    let ingestion = IngestionLoop::new(source, pipeline(&factory, 2), ConsumerConfig::default());
    let stats = ingestion.stats();
    let err = ingestion.run().await.unwrap_err();

    assert!(matches!(
        err,
        IngestError::Transport(TransportError::Receive(_))
    ));
    assert_eq!(stats.received(), 1);
    assert!(!handle.committed_offsets("indexing.jobs.p0").contains(&2));
    assert!(handle.is_closed());
}

#[tokio::test]
async fn test_commit_failure_stops_loop() {
    let factory = Arc::new(MockBackendFactory::new());
    let source = MemorySource::new()
        .with_job("indexing.jobs.p0", &job(1, "t1", "https://x/1"))
        .fail_commits_for("indexing.jobs.p0")
        .hold_open();
    let handle = source.handle();

    let ingestion = IngestionLoop::new(source, pipeline(&factory, 2), ConsumerConfig::default());
    let err = tokio::time::timeout(Duration::from_secs(5), ingestion.run())
        .await
        .expect("loop stops after a failed commit")
        .unwrap_err();

    assert!(matches!(
        err,
        IngestError::Transport(TransportError::Commit { offset: 1, .. })
    ));
    assert!(handle.commits().is_empty());
    assert!(handle.is_closed());
}

#[tokio::test]
async fn test_stop_leaves_queued_records_uncommitted() {
    let factory = Arc::new(MockBackendFactory::new().with_insert_delay(Duration::from_millis(200)));
    let source = MemorySource::new()
        .with_job("indexing.jobs.p0", &job(1, "t1", "https://x/1"))
        .with_job("indexing.jobs.p0", &job(2, "t1", "https://x/2"))
        .with_job("indexing.jobs.p0", &job(3, "t1", "https://x/3"))
        .hold_open();
    let handle = source.handle();

    let ingestion = IngestionLoop::new(source, pipeline(&factory, 2), ConsumerConfig::default());
    let stop = ingestion.stop_handle();
    let task = tokio::spawn(ingestion.run());

    // Let the first job reach the backend, then stop.
    tokio::time::sleep(Duration::from_millis(50)).await;
    stop.cancel();
    task.await.unwrap().unwrap();

    // The in-flight job finished and was committed; the queued ones were not.
    assert_eq!(handle.committed_offsets("indexing.jobs.p0"), vec![1]);
    assert_eq!(factory.documents("t1").len(), 1);
    assert!(handle.is_closed());
}

#[tokio::test]
async fn test_runs_as_service_until_shutdown() {
    let factory = Arc::new(MockBackendFactory::new());
    let source = MemorySource::new()
        .with_job("indexing.jobs.p0", &job(1, "t1", "https://x/1"))
        .hold_open();
    let handle = source.handle();

    let ingestion = Box::new(IngestionLoop::new(
        source,
        pipeline(&factory, 2),
        ConsumerConfig::default(),
    ));
    let stats = ingestion.stats();
    let shutdown = CancellationToken::new();
    let task = tokio::spawn(ingestion.run(shutdown.clone()));

    for _ in 0..100 {
        if stats.committed() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    shutdown.cancel();
    task.await.unwrap().unwrap();

    assert_eq!(handle.committed_offsets("indexing.jobs.p0"), vec![1]);
    assert!(handle.is_closed());
}

#[tokio::test]
async fn test_lanes_stay_bounded_across_many_partitions() {
    let factory = Arc::new(MockBackendFactory::new());
    let mut source = MemorySource::new();
    for i in 0..500 {
        let tenant = format!("tenant-{}", i);
        source = source.with_job(
            format!("indexing.jobs.{}", tenant),
            &job(i, &tenant, &format!("https://x/{}", i)),
        );
    }
    let handle = source.handle();

    let config = ConsumerConfig {
        lanes: 4,
        ..ConsumerConfig::default()
    };
    let ingestion = IngestionLoop::new(source, pipeline(&factory, 4), config);
    let stats = ingestion.stats();
    ingestion.run().await.unwrap();

    assert_eq!(handle.commits().len(), 500);
    assert!(stats.lanes_started() <= 4);
    assert!(stats.lanes_started() >= 1);
}
