//! End-to-end engine tests over the in-process document store.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rowflow_db::{JobStore, MemoryStore, RecordStore, SchemaStore, Store, StoreError};
use rowflow_engine::{EngineConfig, IngestService};
use rowflow_protocol::{
    ColumnType, IngestError, JobId, JobStatus, ParserOptions, Record, Scalar,
};

fn comma_with_header() -> ParserOptions {
    ParserOptions {
        delimiter: ',',
        has_header: true,
        ..ParserOptions::default()
    }
}

fn service() -> IngestService {
    IngestService::start(Arc::new(MemoryStore::new()), EngineConfig::default())
}

#[tokio::test]
async fn typed_csv_runs_to_completed() {
    let service = service();
    let job = service
        .submit_and_wait(b"a,b,c\n1,2,3\n4,5,6\n".to_vec(), "input.csv", comma_with_header())
        .await
        .unwrap();

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.total_records, 2);
    assert_eq!(job.processed_records, 2);
    assert_eq!(job.failed_records, 0);
    assert_eq!(job.file_type, "csv");
    assert!(job.duration().is_some());

    let schema = service.schema(job.id).await.unwrap();
    let names: Vec<_> = schema.columns.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["a", "b", "c"]);
    assert!(schema
        .columns
        .iter()
        .all(|c| c.detected_type == ColumnType::Integer));

    let records = service.records(job.id, 1, 10).await.unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].row_number, 1);
    assert_eq!(records[0].data["a"], Scalar::Int(1));
    assert_eq!(records[0].data["b"], Scalar::Int(2));
    assert_eq!(records[0].data["c"], Scalar::Int(3));
    assert_eq!(records[1].row_number, 2);
    assert_eq!(records[1].data["a"], Scalar::Int(4));

    service.shutdown().await;
}

#[tokio::test]
async fn weak_type_majority_keeps_strings() {
    let service = service();
    let job = service
        .submit_and_wait(b"x\n1\ntwo\n3\n".to_vec(), "input.csv", comma_with_header())
        .await
        .unwrap();

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.failed_records, 0);

    let schema = service.schema(job.id).await.unwrap();
    assert_eq!(schema.columns[0].detected_type, ColumnType::String);

    let records = service.records(job.id, 1, 10).await.unwrap();
    let values: Vec<_> = records.iter().map(|r| r.data["x"].clone()).collect();
    assert_eq!(
        values,
        vec![
            Scalar::Text("1".into()),
            Scalar::Text("two".into()),
            Scalar::Text("3".into()),
        ]
    );

    service.shutdown().await;
}

#[tokio::test]
async fn round_trip_preserves_order_and_count() {
    const ROWS: u64 = 50;
    let mut csv = String::from("n\n");
    for i in 1..=ROWS {
        csv.push_str(&format!("{i}\n"));
    }

    let service = service();
    let job = service
        .submit_and_wait(csv.into_bytes(), "numbers.csv", comma_with_header())
        .await
        .unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.processed_records, ROWS);

    let records = service.records(job.id, 1, ROWS as usize).await.unwrap();
    assert_eq!(records.len(), ROWS as usize);
    for (i, record) in records.iter().enumerate() {
        assert_eq!(record.row_number, i as u64 + 1);
        assert_eq!(record.data["n"], Scalar::Int(i as i64 + 1));
    }

    service.shutdown().await;
}

#[tokio::test]
async fn malformed_rows_complete_with_errors() {
    let service = service();
    let job = service
        .submit_and_wait(
            b"a,b\n1,2\nonly-one-field\n3,4\n".to_vec(),
            "input.csv",
            comma_with_header(),
        )
        .await
        .unwrap();

    assert_eq!(job.status, JobStatus::CompletedWithErrors);
    assert_eq!(job.total_records, 3);
    assert_eq!(job.processed_records, 2);
    assert_eq!(job.failed_records, 1);

    // Successful rows keep dense numbering.
    let records = service.records(job.id, 1, 10).await.unwrap();
    let numbers: Vec<u64> = records.iter().map(|r| r.row_number).collect();
    assert_eq!(numbers, vec![1, 2]);

    service.shutdown().await;
}

#[tokio::test]
async fn schema_detection_failure_lands_in_failed() {
    let service = service();
    // One blank line: no header row to read.
    let job = service
        .submit_and_wait(b"\n".to_vec(), "input.csv", comma_with_header())
        .await
        .unwrap();

    assert_eq!(job.status, JobStatus::Failed);
    let message = job.error_message.expect("failure message persisted");
    assert!(message.contains("schema detection"), "got: {message}");

    service.shutdown().await;
}

#[tokio::test]
async fn unsupported_extension_creates_no_job() {
    let service = service();
    let err = service
        .submit(b"%PDF-1.4".to_vec(), "report.pdf", ParserOptions::default())
        .await
        .unwrap_err();

    match err {
        IngestError::UnsupportedFormat { supported, .. } => {
            assert!(supported.contains(".csv"));
            assert!(supported.contains(".xlsx"));
        }
        other => panic!("expected UnsupportedFormat, got {other:?}"),
    }
    assert!(service.list_jobs(1, 10).await.unwrap().is_empty());

    service.shutdown().await;
}

#[tokio::test]
async fn empty_input_creates_no_job() {
    let service = service();
    let err = service
        .submit(Vec::new(), "empty.csv", ParserOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, IngestError::EmptyInput));
    assert!(service.list_jobs(1, 10).await.unwrap().is_empty());

    service.shutdown().await;
}

#[tokio::test]
async fn deleting_a_job_removes_schema_and_records() {
    let service = service();
    let job = service
        .submit_and_wait(b"a\n1\n2\n".to_vec(), "input.csv", comma_with_header())
        .await
        .unwrap();

    service.delete_job(job.id).await.unwrap();
    assert!(matches!(
        service.get_job(job.id).await,
        Err(IngestError::JobNotFound(_))
    ));
    assert!(service.schema(job.id).await.is_err());
    assert!(service.records(job.id, 1, 10).await.unwrap().is_empty());

    // Deleting again is a not-found condition.
    assert!(matches!(
        service.delete_job(job.id).await,
        Err(IngestError::JobNotFound(_))
    ));

    service.shutdown().await;
}

#[tokio::test]
async fn preview_returns_head_rows_without_a_job() {
    let service = service();
    let options = ParserOptions {
        delimiter: ',',
        has_header: true,
        preview_rows: 2,
        ..ParserOptions::default()
    };
    let rows = service
        .preview(b"a,b\n1,2\n3,4\n5,6\n", "input.csv", &options)
        .unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["a"], Scalar::Int(1));
    assert!(service.list_jobs(1, 10).await.unwrap().is_empty());

    service.shutdown().await;
}

// ============================================================================
// Batch accounting
// ============================================================================

/// Wraps the document store and counts bulk-insert calls.
struct CountingStore {
    inner: MemoryStore,
    bulk_inserts: AtomicUsize,
}

impl CountingStore {
    fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            bulk_inserts: AtomicUsize::new(0),
        }
    }
}

impl Store for CountingStore {
    fn jobs(&self) -> &dyn JobStore {
        self.inner.jobs()
    }

    fn schemas(&self) -> &dyn SchemaStore {
        self.inner.schemas()
    }

    fn records(&self) -> &dyn RecordStore {
        self
    }
}

#[async_trait]
impl RecordStore for CountingStore {
    async fn bulk_insert(&self, records: &[Record]) -> Result<(), StoreError> {
        self.bulk_inserts.fetch_add(1, Ordering::SeqCst);
        self.inner.records().bulk_insert(records).await
    }

    async fn list_by_job(
        &self,
        job_id: JobId,
        page: usize,
        per_page: usize,
    ) -> Result<Vec<Record>, StoreError> {
        self.inner.records().list_by_job(job_id, page, per_page).await
    }

    async fn count_by_job(&self, job_id: JobId) -> Result<u64, StoreError> {
        self.inner.records().count_by_job(job_id).await
    }

    async fn delete_by_job(&self, job_id: JobId) -> Result<(), StoreError> {
        self.inner.records().delete_by_job(job_id).await
    }

    async fn search(&self, job_id: JobId, term: &str) -> Result<Vec<Record>, StoreError> {
        self.inner.records().search(job_id, term).await
    }
}

#[tokio::test]
async fn ten_thousand_and_one_rows_take_eleven_bulk_inserts() {
    const ROWS: usize = 10_001;
    let mut csv = String::with_capacity(ROWS * 2 + 2);
    csv.push_str("v\n");
    for _ in 0..ROWS {
        csv.push_str("1\n");
    }

    let store = Arc::new(CountingStore::new());
    let service = IngestService::start(
        Arc::clone(&store) as Arc<dyn Store>,
        EngineConfig::default(),
    );

    let job = service
        .submit_and_wait(csv.into_bytes(), "big.csv", comma_with_header())
        .await
        .unwrap();

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.total_records, ROWS as u64);
    assert_eq!(job.processed_records, ROWS as u64);
    assert_eq!(store.bulk_inserts.load(Ordering::SeqCst), 11);

    service.shutdown().await;
}

// ============================================================================
// Concurrency bound
// ============================================================================

/// Wraps the document store and stalls every bulk insert, holding jobs in
/// `Processing` long enough to observe the concurrency limit.
struct SlowStore {
    inner: MemoryStore,
    delay: Duration,
}

impl Store for SlowStore {
    fn jobs(&self) -> &dyn JobStore {
        self.inner.jobs()
    }

    fn schemas(&self) -> &dyn SchemaStore {
        self.inner.schemas()
    }

    fn records(&self) -> &dyn RecordStore {
        self
    }
}

#[async_trait]
impl RecordStore for SlowStore {
    async fn bulk_insert(&self, records: &[Record]) -> Result<(), StoreError> {
        tokio::time::sleep(self.delay).await;
        self.inner.records().bulk_insert(records).await
    }

    async fn list_by_job(
        &self,
        job_id: JobId,
        page: usize,
        per_page: usize,
    ) -> Result<Vec<Record>, StoreError> {
        self.inner.records().list_by_job(job_id, page, per_page).await
    }

    async fn count_by_job(&self, job_id: JobId) -> Result<u64, StoreError> {
        self.inner.records().count_by_job(job_id).await
    }

    async fn delete_by_job(&self, job_id: JobId) -> Result<(), StoreError> {
        self.inner.records().delete_by_job(job_id).await
    }

    async fn search(&self, job_id: JobId, term: &str) -> Result<Vec<Record>, StoreError> {
        self.inner.records().search(job_id, term).await
    }
}

#[tokio::test]
async fn at_most_three_jobs_process_concurrently() {
    let store = Arc::new(SlowStore {
        inner: MemoryStore::new(),
        delay: Duration::from_millis(250),
    });
    let service = IngestService::start(
        Arc::clone(&store) as Arc<dyn Store>,
        EngineConfig::default(),
    );

    let mut ids = Vec::new();
    for i in 0..5 {
        let id = service
            .submit(
                b"a\n1\n2\n".to_vec(),
                &format!("file{i}.csv"),
                comma_with_header(),
            )
            .await
            .unwrap();
        ids.push(id);
        assert!(service.pending_count() <= 5);
    }

    let mut max_processing = 0usize;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(15);
    loop {
        let mut processing = 0;
        let mut terminal = 0;
        for id in &ids {
            let job = service.get_job(*id).await.unwrap();
            match job.status {
                JobStatus::Processing => processing += 1,
                status if status.is_terminal() => terminal += 1,
                _ => {}
            }
        }
        max_processing = max_processing.max(processing);
        assert!(
            processing <= 3,
            "observed {processing} jobs in Processing at once"
        );
        if terminal == ids.len() {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "jobs did not finish in time"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert!(max_processing >= 1);
    for id in &ids {
        let job = service.get_job(*id).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.processed_records, 2);
    }
    assert_eq!(service.pending_count(), 0);

    service.shutdown().await;
}

#[tokio::test]
async fn shutdown_waits_for_in_flight_jobs() {
    let store = Arc::new(SlowStore {
        inner: MemoryStore::new(),
        delay: Duration::from_millis(150),
    });
    let service = IngestService::start(
        Arc::clone(&store) as Arc<dyn Store>,
        EngineConfig::default(),
    );

    let id = service
        .submit(b"a\n1\n".to_vec(), "input.csv", comma_with_header())
        .await
        .unwrap();

    // Give the pool a moment to pick the task up, then shut down while the
    // slow bulk insert is still in flight.
    tokio::time::sleep(Duration::from_millis(50)).await;
    service.shutdown().await;

    // Shutdown awaited the job's tasks: the consumer finished its flush, so
    // the row is persisted even though the run was interrupted.
    assert_eq!(store.inner.records().count_by_job(id).await.unwrap(), 1);

    // No terminal state is synthesized. The job either finished before the
    // cancel landed or is left visibly stale in Processing.
    let job = store.inner.jobs().get(id).await.unwrap().unwrap();
    assert!(
        matches!(job.status, JobStatus::Completed | JobStatus::Processing),
        "unexpected status {:?}",
        job.status
    );
}
