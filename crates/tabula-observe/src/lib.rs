use anyhow::Result;
use chrono::Utc;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tabula_core::{EventEnvelope, RunEvent, TelemetryConfig, runtime_dir};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// Environment variable holding a `tracing` filter directive.
pub const LOG_ENV: &str = "TABULA_LOG";

/// Installs the global `tracing` subscriber on stderr.
///
/// `TABULA_LOG` wins when set; otherwise `info`, or `debug` with `verbose`.
/// Calling this twice is harmless.
pub fn init_tracing(verbose: bool) {
    let fallback = if verbose {
        "debug,reqwest=info,hyper=info,hyper_util=info,rustls=info"
    } else {
        "info,reqwest=warn,hyper=warn,hyper_util=warn,rustls=warn"
    };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(fallback));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Appends run events as JSON lines to `.tabula/observe.log`.
pub struct Observer {
    log_path: Option<PathBuf>,
    run_id: Uuid,
}

impl Observer {
    pub fn new(workspace: &Path, cfg: &TelemetryConfig) -> Result<Self> {
        let log_path = if cfg.event_log {
            let dir = runtime_dir(workspace);
            fs::create_dir_all(&dir)?;
            Some(dir.join("observe.log"))
        } else {
            None
        };
        Ok(Self {
            log_path,
            run_id: Uuid::now_v7(),
        })
    }

    /// An observer that only forwards events to `tracing`.
    pub fn disabled() -> Self {
        Self {
            log_path: None,
            run_id: Uuid::now_v7(),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn log_path(&self) -> Option<&Path> {
        self.log_path.as_deref()
    }

    /// Records `kind` for the current run. Log-file failures are reported
    /// through `tracing` and never interrupt the run.
    pub fn emit(&self, kind: RunEvent) {
        tracing::debug!(event = kind.name(), "run event");
        let envelope = EventEnvelope {
            at: Utc::now(),
            run_id: self.run_id,
            kind,
        };
        if let Err(err) = self.record_event(&envelope) {
            tracing::warn!(error = %err, "failed to append run event");
        }
    }

    pub fn record_event(&self, event: &EventEnvelope) -> Result<()> {
        let Some(path) = &self.log_path else {
            return Ok(());
        };
        let mut f = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(f, "{}", serde_json::to_string(event)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_are_appended_as_json_lines() {
        let workspace = tempfile::tempdir().expect("tempdir");
        let observer = Observer::new(workspace.path(), &TelemetryConfig::default()).expect("observer");
        observer.emit(RunEvent::ItemStartedV1 {
            example_id: "ex-1".to_string(),
        });
        observer.emit(RunEvent::ItemCompletedV1 {
            example_id: "ex-1".to_string(),
            iterations: 2,
        });

        let path = observer.log_path().expect("log path");
        let raw = fs::read_to_string(path).expect("read log");
        let lines: Vec<serde_json::Value> = raw
            .lines()
            .map(|line| serde_json::from_str(line).expect("json line"))
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["kind"]["type"], "ItemStartedV1");
        assert_eq!(lines[1]["kind"]["payload"]["iterations"], 2);
        assert_eq!(lines[0]["run_id"], lines[1]["run_id"]);
    }

    #[test]
    fn disabled_event_log_writes_nothing() {
        let workspace = tempfile::tempdir().expect("tempdir");
        let observer = Observer::new(workspace.path(), &TelemetryConfig { event_log: false })
            .expect("observer");
        observer.emit(RunEvent::RunFinishedV1 {
            processed: 0,
            failed: 0,
        });
        assert!(observer.log_path().is_none());
        assert!(!runtime_dir(workspace.path()).join("observe.log").exists());
    }
}
