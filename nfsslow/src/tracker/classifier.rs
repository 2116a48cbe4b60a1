use crate::config::SlowConfig;
use nfsslow_common::{EmitReasons, Event};
use std::time::Duration;

/// Decides why, if at all, a decoded event is reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Classifier {
    slow_threshold: Duration,
    sample_ratio: u64,
    file_name: String,
}

impl Classifier {
    pub fn new(slow_threshold_ms: u64, sample_ratio: u64, file_name: &str) -> Classifier {
        Classifier {
            slow_threshold: Duration::from_millis(slow_threshold_ms),
            sample_ratio,
            file_name: file_name.to_string(),
        }
    }

    pub fn from_config(config: &SlowConfig) -> Classifier {
        Classifier::new(
            config.tracing.slow_threshold_ms,
            config.tracing.sample_ratio,
            &config.tracing.file_name,
        )
    }

    /// An empty result means the event is dropped.
    ///
    /// The sampling draw happens in the probe program; a ratio of 1 samples
    /// everything and 0 disables sampling whatever the record says.
    pub fn classify(&self, event: &Event) -> EmitReasons {
        let mut reasons = event.reasons.intersection(EmitReasons::PROTOCOL);

        let sampled = match self.sample_ratio {
            0 => false,
            1 => true,
            _ => event.reasons.contains(EmitReasons::SAMPLE),
        };
        if sampled {
            reasons |= EmitReasons::SAMPLE;
        }

        if event.duration >= self.slow_threshold {
            reasons |= EmitReasons::SLOW;
        }

        if !self.file_name.is_empty() && self.file_name == event.file {
            reasons |= EmitReasons::FILE;
        }

        reasons
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nfsslow_common::SchemaVersion;

    fn event(duration_ms: u64, file: &str, reasons: EmitReasons) -> Event {
        Event {
            schema: SchemaVersion::V2,
            timestamp_us: 1_000,
            duration: Duration::from_millis(duration_ms),
            call_path: Vec::new(),
            call_counts: [0; nfsslow_common::SLOW_POINT_COUNT],
            pid: 42,
            task: "cat".to_string(),
            file: file.to_string(),
            snapshots: None,
            reasons,
        }
    }

    #[test]
    fn slow_open_is_reported() {
        let classifier = Classifier::new(100, 1000, "");
        let reasons = classifier.classify(&event(150, "data.bin", EmitReasons::empty()));
        assert_eq!(reasons, EmitReasons::SLOW);
    }

    #[test]
    fn fast_unsampled_open_is_dropped() {
        let classifier = Classifier::new(100, 1000, "");
        assert!(classifier
            .classify(&event(10, "data.bin", EmitReasons::empty()))
            .is_empty());
    }

    #[test]
    fn threshold_is_inclusive() {
        let classifier = Classifier::new(100, 0, "");
        assert_eq!(
            classifier.classify(&event(100, "x", EmitReasons::empty())),
            EmitReasons::SLOW
        );
        assert!(classifier.classify(&event(99, "x", EmitReasons::empty())).is_empty());
    }

    #[test]
    fn file_match() {
        let classifier = Classifier::new(100, 1000, "hello.txt");
        assert_eq!(
            classifier.classify(&event(1, "hello.txt", EmitReasons::empty())),
            EmitReasons::FILE
        );
        assert!(classifier
            .classify(&event(1, "hello.txt.bak", EmitReasons::empty()))
            .is_empty());
    }

    #[test]
    fn empty_filter_matches_nothing() {
        let classifier = Classifier::new(100, 1000, "");
        assert!(classifier.classify(&event(1, "", EmitReasons::empty())).is_empty());
    }

    #[test]
    fn sampling() {
        let kernel_sampled = event(1, "x", EmitReasons::SAMPLE);
        let not_sampled = event(1, "x", EmitReasons::empty());

        assert_eq!(
            Classifier::new(100, 1000, "").classify(&kernel_sampled),
            EmitReasons::SAMPLE
        );
        assert!(Classifier::new(100, 1000, "").classify(&not_sampled).is_empty());
        assert_eq!(
            Classifier::new(100, 1, "").classify(&not_sampled),
            EmitReasons::SAMPLE
        );
        assert!(Classifier::new(100, 0, "").classify(&kernel_sampled).is_empty());
    }

    #[test]
    fn protocol_reasons_are_copied() {
        let classifier = Classifier::new(100, 0, "");
        let e = event(1, "x", EmitReasons::SEQID | EmitReasons::RECLAIM_NOGRACE);
        assert_eq!(
            classifier.classify(&e),
            EmitReasons::SEQID | EmitReasons::RECLAIM_NOGRACE
        );
    }

    #[test]
    fn kernel_slow_and_file_bits_are_recomputed() {
        let classifier = Classifier::new(100, 0, "");
        let e = event(1, "x", EmitReasons::SLOW | EmitReasons::FILE);
        assert!(classifier.classify(&e).is_empty());
    }

    #[test]
    fn union_of_reasons() {
        let classifier = Classifier::new(100, 1, "hello.txt");
        let e = event(500, "hello.txt", EmitReasons::SEQID);
        assert_eq!(
            classifier.classify(&e),
            EmitReasons::SAMPLE | EmitReasons::SLOW | EmitReasons::FILE | EmitReasons::SEQID
        );
    }

    #[test]
    fn classification_does_not_touch_the_event() {
        let classifier = Classifier::new(100, 1, "x");
        let e = event(500, "x", EmitReasons::SEQID);
        let before = e.clone();
        let first = classifier.classify(&e);
        assert_eq!(classifier.classify(&e), first);
        assert_eq!(e, before);
    }
}
