use crate::config::{SlowConfig, SlowLogEntry};
use crate::errors::SlowError;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling;
use tracing_subscriber::fmt::{format, layer};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{filter, EnvFilter, Layer, Registry};

type SinkLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Which log targets a sink writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    /// Everything, minus the targets that have a sink of their own.
    Default { errors: bool, events: bool },
    Only(&'static str),
}

impl Route {
    fn accepts(&self, target: &str) -> bool {
        match *self {
            Route::Default { errors, events } => {
                !((errors && target == "error") || (events && target == "event"))
            }
            Route::Only(t) => target == t,
        }
    }
}

fn required<'a>(name: &str, value: &'a Option<String>) -> Result<&'a str, SlowError> {
    value
        .as_deref()
        .ok_or_else(|| SlowError::MissingAttribute(name.to_string()))
}

fn sink_writer(entry: &SlowLogEntry) -> Result<(NonBlocking, WorkerGuard), SlowError> {
    match entry.target.as_str() {
        "stderr" => Ok(tracing_appender::non_blocking(std::io::stderr())),
        "stdout" => Ok(tracing_appender::non_blocking(std::io::stdout())),
        "file" => {
            let directory = required("directory", &entry.directory)?;
            let prefix = required("prefix", &entry.prefix)?;

            let s_rotation = entry.rotation.as_deref().unwrap_or("daily");
            let rotation = match s_rotation.trim().to_ascii_lowercase().as_str() {
                "hourly" => rolling::Rotation::HOURLY,
                "daily" => rolling::Rotation::DAILY,
                "never" => rolling::Rotation::NEVER,
                _ => {
                    return Err(SlowError::InvalidAttribute {
                        attribute: "Invalid log rotation",
                        value: s_rotation.to_string(),
                    })
                }
            };

            let appender = rolling::RollingFileAppender::builder()
                .rotation(rotation)
                .filename_prefix(prefix)
                .max_log_files(entry.max_files.unwrap_or(5))
                .build(directory)
                .map_err(|e| SlowError::InvalidAttribute {
                    attribute: "Log directory unusable",
                    value: format!("{}: {}", directory, e),
                })?;

            Ok(tracing_appender::non_blocking(appender))
        }
        _ => Err(SlowError::InvalidAttribute {
            attribute: "Invalid log target",
            value: entry.target.to_string(),
        }),
    }
}

fn sink_layer(writer: NonBlocking, fmt: Option<&str>, route: Route) -> Result<SinkLayer, SlowError> {
    let base = layer().with_writer(writer);
    let only = filter::filter_fn(move |metadata| route.accepts(metadata.target()));
    let event_format = format().with_target(true);

    let fmt = fmt.unwrap_or("full").trim().to_ascii_lowercase();
    let layer = match fmt.as_str() {
        "full" => base.event_format(event_format).with_filter(only).boxed(),
        "compact" => base
            .event_format(event_format.compact())
            .with_filter(only)
            .boxed(),
        // events are already structured, the level adds nothing
        "json" => base
            .event_format(event_format.with_level(false).json().flatten_event(true))
            .with_filter(only)
            .boxed(),
        _ => {
            return Err(SlowError::InvalidAttribute {
                attribute: "Invalid log format",
                value: fmt,
            })
        }
    };
    Ok(layer)
}

/// Keeps the non-blocking writers flushing until dropped.
pub struct SlowLogs {
    _guards: Vec<WorkerGuard>,
}

impl SlowLogs {
    /// Installs the global subscriber. `debug` lowers the default level so
    /// decoded events and malformed records show up without `RUST_LOG`.
    pub fn new(config: &SlowConfig) -> Result<SlowLogs, anyhow::Error> {
        let logs_conf = &config.logs;
        let errors = logs_conf.errors.as_ref().filter(|e| e.enable);
        let events = logs_conf.events.as_ref().filter(|e| e.enable);

        let mut sinks = Vec::new();
        if logs_conf.default.enable {
            let route = Route::Default {
                errors: errors.is_some(),
                events: events.is_some(),
            };
            sinks.push((&logs_conf.default, route));
        }
        sinks.extend(errors.map(|e| (e, Route::Only("error"))));
        sinks.extend(events.map(|e| (e, Route::Only("event"))));

        let mut layers = Vec::with_capacity(sinks.len());
        let mut guards = Vec::with_capacity(sinks.len());
        for (entry, route) in sinks {
            let (writer, guard) = sink_writer(entry)?;
            layers.push(sink_layer(writer, entry.format.as_deref(), route)?);
            guards.push(guard);
        }

        let default_level = if config.debug { "debug" } else { "info" };
        let env_filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(default_level))?;

        tracing_subscriber::registry()
            .with(layers)
            .with(env_filter)
            .init();

        Ok(SlowLogs { _guards: guards })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(target: &str) -> SlowLogEntry {
        SlowLogEntry {
            enable: true,
            target: target.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn console_targets() {
        assert!(sink_writer(&entry("stderr")).is_ok());
        assert!(sink_writer(&entry("stdout")).is_ok());
    }

    #[test]
    fn unknown_target() {
        let err = sink_writer(&entry("syslog")).unwrap_err();
        assert!(err.to_string().contains("syslog"));
    }

    #[test]
    fn file_target_needs_directory_and_prefix() {
        let err = sink_writer(&entry("file")).unwrap_err();
        assert!(err.to_string().contains("directory"));

        let mut e = entry("file");
        e.directory = Some("/tmp".to_string());
        let err = sink_writer(&e).unwrap_err();
        assert!(err.to_string().contains("prefix"));
    }

    #[test]
    fn bad_rotation() {
        let mut e = entry("file");
        e.directory = Some("/tmp".to_string());
        e.prefix = Some("nfsslow.log".to_string());
        e.rotation = Some("weekly".to_string());
        let err = sink_writer(&e).unwrap_err();
        assert!(err.to_string().contains("weekly"));
    }

    #[test]
    fn formats() {
        for fmt in [None, Some("full"), Some(" Compact "), Some("json")] {
            let (w, _guard) = sink_writer(&entry("stderr")).unwrap();
            assert!(sink_layer(w, fmt, Route::Only("event")).is_ok(), "{:?}", fmt);
        }

        let (w, _guard) = sink_writer(&entry("stderr")).unwrap();
        let err = sink_layer(w, Some("pretty"), Route::Only("event")).err().unwrap();
        assert!(err.to_string().contains("pretty"));
    }

    #[test]
    fn default_sink_leaves_routed_targets_alone() {
        let both = Route::Default {
            errors: true,
            events: true,
        };
        assert!(both.accepts("nfsslow::loader"));
        assert!(!both.accepts("error"));
        assert!(!both.accepts("event"));

        let no_events = Route::Default {
            errors: true,
            events: false,
        };
        assert!(no_events.accepts("event"));
        assert!(!no_events.accepts("error"));

        assert!(Route::Only("event").accepts("event"));
        assert!(!Route::Only("event").accepts("nfsslow::tracker"));
    }
}
