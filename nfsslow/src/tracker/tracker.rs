use super::classifier::Classifier;
use super::report::{EventReport, ReportSink};
use crate::errors::SlowError;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use nfsslow_common::tables::LabelTables;
use nfsslow_common::{EmitReasons, RecordDecoder};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Producer side of the raw record queue, cloned into every perf reader.
#[derive(Debug, Clone)]
pub(crate) struct RecordSender {
    snd: mpsc::Sender<Bytes>,
    dropped: Arc<AtomicU64>,
}

impl RecordSender {
    /// Never waits: a record that does not fit is dropped and counted.
    pub fn push(&self, record: Bytes) -> bool {
        match self.snd.try_send(record) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped == 1 || dropped % 1000 == 0 {
                    warn!(target: "error", "Record queue full, {} records dropped so far", dropped);
                }
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }
}

#[derive(Debug)]
pub(crate) struct RecordReceiver {
    recv: mpsc::Receiver<Bytes>,
    dropped: Arc<AtomicU64>,
}

impl RecordReceiver {
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.recv.recv().await
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

pub(crate) fn record_queue(capacity: usize) -> (RecordSender, RecordReceiver) {
    let (snd, recv) = mpsc::channel(capacity);
    let dropped = Arc::new(AtomicU64::new(0));
    (
        RecordSender {
            snd,
            dropped: dropped.clone(),
        },
        RecordReceiver { recv, dropped },
    )
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TrackerStats {
    pub received: u64,
    pub malformed: u64,
    pub filtered: u64,
    pub reported: u64,
    /// Records lost because the queue was full.
    pub dropped: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Outcome {
    Malformed,
    Filtered,
    Reported(EmitReasons),
}

/// Decodes, classifies and reports raw records, one at a time.
pub(crate) struct EventTracker {
    decoder: RecordDecoder,
    classifier: Classifier,
    tables: LabelTables,
    sink: Box<dyn ReportSink>,
    debug: bool,
    stats: TrackerStats,
}

impl EventTracker {
    pub fn new(
        decoder: RecordDecoder,
        classifier: Classifier,
        sink: Box<dyn ReportSink>,
        debug: bool,
    ) -> Result<EventTracker, SlowError> {
        Ok(EventTracker {
            decoder,
            classifier,
            tables: LabelTables::load()?,
            sink,
            debug,
            stats: TrackerStats::default(),
        })
    }

    pub fn stats(&self) -> TrackerStats {
        self.stats
    }

    pub fn process(&mut self, record: &[u8], received_at: DateTime<Utc>) -> Outcome {
        self.stats.received += 1;

        let event = match self.decoder.decode(record) {
            Ok(e) => e,
            Err(e) => {
                self.stats.malformed += 1;
                debug!("Skipping malformed record. Err: {}", e);
                return Outcome::Malformed;
            }
        };

        let reasons = self.classifier.classify(&event);
        if self.debug {
            debug!("Decoded {:?}, reasons: {:?}", event, self.tables.reasons.decode(reasons.bits() as u64));
        }

        if reasons.is_empty() {
            self.stats.filtered += 1;
            return Outcome::Filtered;
        }

        let report = EventReport::build(&event, reasons, &self.tables, received_at);
        self.sink.report(&report);
        self.stats.reported += 1;
        Outcome::Reported(reasons)
    }

    /// Drains `rx` until cancelled or every sender is gone. Records still
    /// queued on cancellation are discarded.
    pub async fn run(mut self, mut rx: RecordReceiver, cancel: CancellationToken) -> TrackerStats {
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                record = rx.recv() => match record {
                    Some(record) => {
                        self.process(&record, Utc::now());
                    }
                    None => break,
                },
            }
        }

        self.stats.dropped = rx.dropped();
        let s = self.stats();
        info!(
            "Tracker stopped. received: {}, reported: {}, filtered: {}, malformed: {}, dropped: {}",
            s.received, s.reported, s.filtered, s.malformed, s.dropped
        );
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::report::tests::MemorySink;
    use chrono::TimeZone;
    use nfsslow_common::testing::RecordBuilder;
    use nfsslow_common::SchemaVersion;

    fn tracker(classifier: Classifier, sink: MemorySink) -> EventTracker {
        let decoder = RecordDecoder::new(SchemaVersion::V1).unwrap();
        EventTracker::new(decoder, classifier, Box::new(sink), true).unwrap()
    }

    fn record(duration_us: u64, file: &str) -> Vec<u8> {
        RecordBuilder::new(SchemaVersion::V1)
            .set("ts", 5)
            .set("delta", duration_us)
            .set("pid", 77)
            .text("task", "cat")
            .text("file", file)
            .call(0, 2)
            .call(17, duration_us as u32)
            .build()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn slow_record_is_reported() {
        let sink = MemorySink::default();
        let mut t = tracker(Classifier::new(100, 0, ""), sink.clone());

        assert_eq!(
            t.process(&record(150_000, "a.txt"), now()),
            Outcome::Reported(EmitReasons::SLOW)
        );
        let reports = sink.0.lock().unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0]["file"], "a.txt");
        assert_eq!(reports[0]["pid"], 77);
        assert_eq!(reports[0]["reasons"], serde_json::json!(["SLOW"]));
        assert_eq!(reports[0]["call_path"][1]["point"], "return nfs4_atomic_open");
    }

    #[test]
    fn sampled_fast_record() {
        let sink = MemorySink::default();
        let mut t = tracker(Classifier::new(100, 1, ""), sink.clone());
        assert_eq!(
            t.process(&record(10_000, "a.txt"), now()),
            Outcome::Reported(EmitReasons::SAMPLE)
        );
    }

    #[test]
    fn file_match_below_threshold() {
        let sink = MemorySink::default();
        let mut t = tracker(Classifier::new(100, 0, "target.log"), sink.clone());
        assert_eq!(
            t.process(&record(10_000, "target.log"), now()),
            Outcome::Reported(EmitReasons::FILE)
        );
        assert_eq!(t.process(&record(10_000, "other.log"), now()), Outcome::Filtered);
        assert_eq!(sink.0.lock().unwrap().len(), 1);
    }

    #[test]
    fn malformed_record_is_counted() {
        let sink = MemorySink::default();
        let mut t = tracker(Classifier::new(100, 0, ""), sink.clone());
        let mut short = record(150_000, "a.txt");
        short.pop();

        assert_eq!(t.process(&short, now()), Outcome::Malformed);
        assert_eq!(
            t.stats(),
            TrackerStats {
                received: 1,
                malformed: 1,
                ..Default::default()
            }
        );
        assert!(sink.0.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn session_continues_after_malformed_record() {
        let sink = MemorySink::default();
        let t = tracker(Classifier::new(100, 0, ""), sink.clone());
        let (snd, rx) = record_queue(16);

        let mut short = record(150_000, "a.txt");
        short.pop();
        assert!(snd.push(Bytes::from(short)));
        assert!(snd.push(Bytes::from(record(150_000, "b.txt"))));
        assert!(snd.push(Bytes::from(record(1_000, "c.txt"))));
        drop(snd);

        let stats = t.run(rx, CancellationToken::new()).await;
        assert_eq!(
            stats,
            TrackerStats {
                received: 3,
                malformed: 1,
                filtered: 1,
                reported: 1,
                dropped: 0,
            }
        );
        let reports = sink.0.lock().unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0]["file"], "b.txt");
    }

    #[tokio::test]
    async fn cancellation_discards_queued_records() {
        let sink = MemorySink::default();
        let t = tracker(Classifier::new(100, 0, ""), sink.clone());
        let (snd, rx) = record_queue(16);
        assert!(snd.push(Bytes::from(record(150_000, "a.txt"))));

        let cancel = CancellationToken::new();
        cancel.cancel();
        let stats = t.run(rx, cancel).await;

        assert_eq!(stats.received, 0);
        assert!(sink.0.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn cancel_stops_waiting_consumer() {
        let t = tracker(Classifier::new(100, 0, ""), MemorySink::default());
        let (_snd, rx) = record_queue(16);
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(t.run(rx, cancel.clone()));
        cancel.cancel();
        let stats = handle.await.unwrap();
        assert_eq!(stats, TrackerStats::default());
    }

    #[tokio::test]
    async fn full_queue_drops_records() {
        let t = tracker(Classifier::new(100, 0, ""), MemorySink::default());
        let (snd, rx) = record_queue(1);
        assert!(snd.push(Bytes::from(record(150_000, "a.txt"))));
        assert!(!snd.push(Bytes::from(record(150_000, "b.txt"))));
        drop(snd);

        let stats = t.run(rx, CancellationToken::new()).await;
        assert_eq!(stats.reported, 1);
        assert_eq!(stats.dropped, 1);
    }
}
