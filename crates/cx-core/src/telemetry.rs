//! Write-only typed event log. Nothing in the engine reads events back.

use serde::Serialize;

use crate::patterns::EmergentPattern;

/// Which retrieval produced a `Retrieval` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalKind {
    Ephemeral,
    Primary,
    External,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TelemetryEvent {
    RawPrompt {
        message_count: usize,
        prompt: String,
    },
    Retrieval {
        kind: RetrievalKind,
        query_chars: usize,
        result_chars: usize,
        ok: bool,
    },
    Collapse {
        deterministic: bool,
        temperature: f64,
        selected_origin: String,
        candidate_count: usize,
        justification: String,
    },
    PatternDetected {
        pattern: EmergentPattern,
    },
    Flush {
        records: usize,
        answer_only: bool,
    },
}

pub trait TelemetrySink: Send + Sync {
    fn record(&self, event: &TelemetryEvent);
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullTelemetry;

impl TelemetrySink for NullTelemetry {
    fn record(&self, _event: &TelemetryEvent) {}
}

/// Emits each event as a JSON `tracing` record at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingTelemetry;

impl TelemetrySink for TracingTelemetry {
    fn record(&self, event: &TelemetryEvent) {
        match serde_json::to_string(event) {
            Ok(json) => tracing::debug!(target: "cx::telemetry", "{json}"),
            Err(e) => tracing::warn!("telemetry event not serializable: {e}"),
        }
    }
}
