//! Append-only JSON-lines telemetry sink.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::{Mutex, PoisonError};

use anyhow::{Context, Result};
use serde_json::json;

use cx_core::time::{millis_to_iso8601, now_millis};
use cx_core::{TelemetryEvent, TelemetrySink};

pub struct JsonlTelemetry {
    file: Mutex<File>,
}

impl JsonlTelemetry {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open telemetry log {}", path.display()))?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

impl TelemetrySink for JsonlTelemetry {
    /// Write failures are logged and dropped; telemetry never fails a cycle.
    fn record(&self, event: &TelemetryEvent) {
        let line = json!({
            "at": millis_to_iso8601(now_millis()),
            "data": event,
        });
        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = writeln!(file, "{line}") {
            tracing::warn!("failed to write telemetry: {e}");
        }
    }
}
