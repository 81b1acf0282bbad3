//! Streaming producer/consumer pipeline.
//!
//! The producer walks the parser's lazy row sequence on a blocking thread
//! and pushes materialized records into a bounded buffer; a full buffer
//! blocks it (backpressure). The consumer drains the buffer into batches and
//! bulk-writes each one, publishing counters onto the job row as it goes.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::trace;

use rowflow_db::Store;
use rowflow_protocol::{IngestError, Job, JobId, ParsedRow, Record};

use crate::cancel::CancellationToken;
use crate::counters::JobCounters;

/// Row buffer capacity: how far the producer may run ahead of the consumer.
pub const ROW_BUFFER_CAPACITY: usize = 10_000;

/// Producer half. Runs on a blocking thread; `blocking_send` parks it while
/// the buffer is full. Every yielded row counts toward `total`; malformed
/// rows count toward `failed` and are never sent. Dropping `tx` on the way
/// out closes the buffer, on success and on early exit alike.
pub(crate) fn produce(
    stream: impl Iterator<Item = ParsedRow>,
    job_id: JobId,
    tx: mpsc::Sender<Record>,
    counters: &JobCounters,
    cancel: &CancellationToken,
) {
    for row in stream {
        if cancel.is_cancelled() {
            break;
        }
        counters.add_total(1);
        match row {
            ParsedRow::Row { row_number, data } => {
                if tx
                    .blocking_send(Record::new(job_id, row_number, data))
                    .is_err()
                {
                    // Consumer is gone; nothing left to feed.
                    break;
                }
            }
            ParsedRow::Malformed { message } => {
                counters.add_failed(1);
                trace!(job_id = %job_id, message, "malformed row");
            }
        }
    }
}

/// Consumer half. Accumulates `batch_size` records, bulk-inserts each full
/// batch, then flushes the residue once the buffer closes. On cancellation
/// the current batch is flushed before exiting. `job` is this worker's owned
/// copy, used to publish counters onto the job row after every write.
pub(crate) async fn consume(
    mut rx: mpsc::Receiver<Record>,
    store: Arc<dyn Store>,
    mut job: Job,
    counters: Arc<JobCounters>,
    batch_size: usize,
    cancel: CancellationToken,
) -> Result<(), IngestError> {
    let batch_size = batch_size.max(1);
    let mut batch: Vec<Record> = Vec::with_capacity(batch_size);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                flush(&store, &mut job, &counters, &mut batch).await?;
                return Err(IngestError::Cancelled);
            }
            next = rx.recv() => match next {
                Some(record) => {
                    batch.push(record);
                    if batch.len() == batch_size {
                        flush(&store, &mut job, &counters, &mut batch).await?;
                    }
                }
                None => break,
            }
        }
    }

    flush(&store, &mut job, &counters, &mut batch).await?;
    Ok(())
}

/// Bulk-insert the batch, add its size to `processed`, and write the
/// current counters onto the job row. `total_records` keeps the detection
/// estimate until the terminal transition so progress stays monotonic.
async fn flush(
    store: &Arc<dyn Store>,
    job: &mut Job,
    counters: &JobCounters,
    batch: &mut Vec<Record>,
) -> Result<(), IngestError> {
    if batch.is_empty() {
        return Ok(());
    }
    store.records().bulk_insert(batch).await?;
    counters.add_processed(batch.len() as u64);
    batch.clear();

    job.processed_records = counters.processed();
    job.failed_records = counters.failed();
    store.jobs().update(job).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowflow_protocol::RowData;
    use std::time::Duration;
    use uuid::Uuid;

    fn rows(n: u64) -> Vec<ParsedRow> {
        (1..=n)
            .map(|row_number| ParsedRow::Row {
                row_number,
                data: RowData::new(),
            })
            .collect()
    }

    #[tokio::test]
    async fn producer_blocks_after_buffer_capacity_writes() {
        const CAPACITY: usize = 8;
        let (tx, rx) = mpsc::channel(CAPACITY);
        let counters = Arc::new(JobCounters::default());
        let cancel = CancellationToken::new();

        let producer = {
            let counters = Arc::clone(&counters);
            let cancel = cancel.clone();
            tokio::task::spawn_blocking(move || {
                produce(rows(100).into_iter(), Uuid::new_v4(), tx, &counters, &cancel);
            })
        };

        // With no consumer the producer fills the buffer, counts one more
        // row, and parks in blocking_send.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(counters.total(), CAPACITY as u64 + 1);

        // Closing the receiver unblocks it; it stops without sending more.
        drop(rx);
        producer.await.unwrap();
        assert_eq!(counters.total(), CAPACITY as u64 + 1);
    }

    #[tokio::test]
    async fn malformed_rows_count_failed_and_are_not_sent() {
        let (tx, mut rx) = mpsc::channel(16);
        let counters = Arc::new(JobCounters::default());
        let cancel = CancellationToken::new();

        let stream = vec![
            ParsedRow::Row {
                row_number: 1,
                data: RowData::new(),
            },
            ParsedRow::Malformed {
                message: "bad".into(),
            },
            ParsedRow::Row {
                row_number: 2,
                data: RowData::new(),
            },
        ];
        {
            let counters = Arc::clone(&counters);
            tokio::task::spawn_blocking(move || {
                produce(stream.into_iter(), Uuid::new_v4(), tx, &counters, &cancel);
            })
            .await
            .unwrap();
        }

        assert_eq!(counters.total(), 3);
        assert_eq!(counters.failed(), 1);
        let mut received = Vec::new();
        while let Some(record) = rx.recv().await {
            received.push(record.row_number);
        }
        assert_eq!(received, vec![1, 2]);
    }

    #[tokio::test]
    async fn cancelled_producer_stops_reading() {
        let (tx, _rx) = mpsc::channel(16);
        let counters = Arc::new(JobCounters::default());
        let cancel = CancellationToken::new();
        cancel.cancel();

        {
            let counters = Arc::clone(&counters);
            let cancel = cancel.clone();
            tokio::task::spawn_blocking(move || {
                produce(rows(50).into_iter(), Uuid::new_v4(), tx, &counters, &cancel);
            })
            .await
            .unwrap();
        }
        assert_eq!(counters.total(), 0);
    }
}
