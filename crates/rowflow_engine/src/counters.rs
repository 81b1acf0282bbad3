//! Shared per-job counters.

use std::sync::atomic::{AtomicU64, Ordering};

use rowflow_protocol::Job;

/// Word-granular counters shared between a job's producer and consumer
/// tasks. `total` counts every yielded row, `failed` the malformed ones,
/// `processed` the rows persisted by the consumer. Readers may observe
/// intermediate values; each counter is individually monotonic.
#[derive(Debug, Default)]
pub struct JobCounters {
    total: AtomicU64,
    processed: AtomicU64,
    failed: AtomicU64,
}

impl JobCounters {
    pub fn add_total(&self, n: u64) {
        self.total.fetch_add(n, Ordering::SeqCst);
    }

    pub fn add_processed(&self, n: u64) {
        self.processed.fetch_add(n, Ordering::SeqCst);
    }

    pub fn add_failed(&self, n: u64) {
        self.failed.fetch_add(n, Ordering::SeqCst);
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::SeqCst)
    }

    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::SeqCst)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::SeqCst)
    }

    /// Copy all three counters onto the job. Used by the terminal
    /// transition, once the stream has drained.
    pub fn apply_to(&self, job: &mut Job) {
        job.total_records = self.total();
        job.processed_records = self.processed();
        job.failed_records = self.failed();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_and_apply() {
        let counters = JobCounters::default();
        counters.add_total(5);
        counters.add_processed(3);
        counters.add_failed(2);

        let mut job = Job::new("x.csv", "csv", 1);
        counters.apply_to(&mut job);
        assert_eq!(job.total_records, 5);
        assert_eq!(job.processed_records, 3);
        assert_eq!(job.failed_records, 2);
    }
}
