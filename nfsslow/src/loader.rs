use crate::errors::SlowError;
use crate::tracker::RecordSender;
use nfsslow_common::points::{self, PointKind, OPEN_FUNCTION, PROBE_POINTS};
use std::iter;
use tracing::{debug, info};

/// Whatever compiled and loaded the probe program: attaches its handlers and
/// feeds its `events` table into the record queue.
pub(crate) trait ProbeBackend {
    fn attach_probe(
        &mut self,
        program: &str,
        function: &str,
        kind: PointKind,
    ) -> Result<(), anyhow::Error>;

    fn open_events(&mut self, output: RecordSender) -> Result<(), anyhow::Error>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Attached {
    /// Quit mode: the program loaded, nothing was attached.
    DryRun,
    Running { probes: usize },
}

/// `enter__nfs4_file_open`, `return__nfs4_file_open`, ...
pub(crate) fn program_name(function: &str, kind: PointKind) -> String {
    format!("{}__{}", kind, function)
}

/// `nfs4_file_open` first, then the catalogue in order.
pub(crate) fn attach_order() -> impl Iterator<Item = &'static str> {
    iter::once(OPEN_FUNCTION).chain(PROBE_POINTS.iter().map(|p| p.function))
}

pub struct EbpfLoader {
    quit: bool,
}

impl EbpfLoader {
    pub fn new(quit: bool) -> EbpfLoader {
        EbpfLoader { quit }
    }

    /// Stops at the first probe that fails to attach; programs already
    /// attached go away with the backend.
    pub(crate) fn attach(
        &self,
        backend: &mut dyn ProbeBackend,
        output: RecordSender,
    ) -> Result<Attached, anyhow::Error> {
        points::validate(PROBE_POINTS).map_err(SlowError::from)?;

        if self.quit {
            info!("Probe program loaded, quitting without attaching");
            return Ok(Attached::DryRun);
        }

        let mut probes = 0;
        for function in attach_order() {
            for kind in [PointKind::Enter, PointKind::Return] {
                let program = program_name(function, kind);
                backend
                    .attach_probe(&program, function, kind)
                    .map_err(|e| SlowError::AttachmentFailure {
                        function: function.to_string(),
                        kind,
                        reason: format!("{:#}", e),
                    })?;
                debug!("Attached {}", program);
                probes += 1;
            }
        }

        backend.open_events(output)?;
        info!("Attached {} probes to {} kernel functions", probes, probes / 2);

        Ok(Attached::Running { probes })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::record_queue;
    use anyhow::anyhow;

    #[derive(Default)]
    struct FakeBackend {
        attached: Vec<(String, String, PointKind)>,
        fail_on: Option<String>,
        events_opened: bool,
    }

    impl ProbeBackend for FakeBackend {
        fn attach_probe(
            &mut self,
            program: &str,
            function: &str,
            kind: PointKind,
        ) -> Result<(), anyhow::Error> {
            if self.fail_on.as_deref() == Some(program) {
                return Err(anyhow!("no such kernel symbol"));
            }
            self.attached
                .push((program.to_string(), function.to_string(), kind));
            Ok(())
        }

        fn open_events(&mut self, _output: RecordSender) -> Result<(), anyhow::Error> {
            self.events_opened = true;
            Ok(())
        }
    }

    #[test]
    fn attaches_every_point_in_order() {
        let mut backend = FakeBackend::default();
        let (snd, _rx) = record_queue(4);

        let r = EbpfLoader::new(false).attach(&mut backend, snd).unwrap();
        assert_eq!(
            r,
            Attached::Running {
                probes: 2 * (PROBE_POINTS.len() + 1)
            }
        );
        assert!(backend.events_opened);

        let names: Vec<&str> = backend.attached.iter().map(|a| a.0.as_str()).collect();
        assert_eq!(names[0], "enter__nfs4_file_open");
        assert_eq!(names[1], "return__nfs4_file_open");
        assert_eq!(names[2], "enter__nfs4_atomic_open");
        assert_eq!(names[3], "return__nfs4_atomic_open");
        assert_eq!(
            names.last().copied(),
            Some("return__nfs_wait_bit_killable")
        );
        assert_eq!(backend.attached[3].1, "nfs4_atomic_open");
        assert_eq!(backend.attached[3].2, PointKind::Return);
    }

    #[test]
    fn quit_attaches_nothing() {
        let mut backend = FakeBackend::default();
        let (snd, _rx) = record_queue(4);

        let r = EbpfLoader::new(true).attach(&mut backend, snd).unwrap();
        assert_eq!(r, Attached::DryRun);
        assert!(backend.attached.is_empty());
        assert!(!backend.events_opened);
    }

    #[test]
    fn failure_names_function_and_kind() {
        let mut backend = FakeBackend {
            fail_on: Some("return__nfs4_run_open_task".to_string()),
            ..Default::default()
        };
        let (snd, _rx) = record_queue(4);

        let err = EbpfLoader::new(false).attach(&mut backend, snd).unwrap_err();
        match err.downcast_ref::<SlowError>() {
            Some(SlowError::AttachmentFailure { function, kind, .. }) => {
                assert_eq!(function, "nfs4_run_open_task");
                assert_eq!(*kind, PointKind::Return);
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert_eq!(
            backend.attached.last().map(|a| a.0.as_str()),
            Some("enter__nfs4_run_open_task")
        );
        assert!(!backend.events_opened);
        assert!(err.to_string().contains("no such kernel symbol"));
    }

    #[test]
    fn program_names() {
        assert_eq!(
            program_name("update_open_stateid", PointKind::Enter),
            "enter__update_open_stateid"
        );
        assert_eq!(
            program_name("_nfs4_opendata_to_nfs4_state", PointKind::Return),
            "return___nfs4_opendata_to_nfs4_state"
        );
    }
}
