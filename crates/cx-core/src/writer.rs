//! Token-threshold buffered persistence of utterances and answers.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{CoreError, Result};
use crate::telemetry::{TelemetryEvent, TelemetrySink};
use crate::time::{millis_to_iso8601, now_millis};
use crate::traits::{
    Embedder, MemoryRecord, MetadataValue, Resettable, TokenCounter, VectorMemory, count_tokens,
};
use crate::transcript::SpeakerUtterance;

/// Flush thresholds, in tokens summed across every pending buffer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Never flush below this.
    pub min_flush_tokens: usize,
    /// Always flush at or above this.
    pub max_flush_tokens: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            min_flush_tokens: 100,
            max_flush_tokens: 300,
        }
    }
}

/// Pending utterances of one speaker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryBuffer {
    pub pending_texts: Vec<String>,
    pub started_at: u64,
    pub last_updated: u64,
}

impl MemoryBuffer {
    fn joined(&self) -> String {
        self.pending_texts.join("\n")
    }
}

/// Pending buffers and seen positions, carried between processes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriterState {
    pub buffers: BTreeMap<String, MemoryBuffer>,
    pub seen: BTreeMap<String, BTreeSet<usize>>,
}

/// What a call to [`BufferedMemoryWriter::persist`] wrote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FlushOutcome {
    /// Buffers (and the answer, if any) were written and cleared.
    Flushed { records: usize },
    /// Threshold not crossed; only the answer was written.
    AnswerOnly,
    /// Nothing written.
    Skipped,
}

/// Buffers utterances per speaker and writes them to vector memory in batches.
///
/// Not safe for concurrent flushes; the session's single-flight guard is the
/// only protection against double writes.
pub struct BufferedMemoryWriter {
    buffers: BTreeMap<String, MemoryBuffer>,
    seen: HashMap<String, HashSet<usize>>,
    primary_speaker: String,
    embedder: Arc<dyn Embedder>,
    memory: Arc<dyn VectorMemory>,
    counter: Arc<dyn TokenCounter>,
    telemetry: Arc<dyn TelemetrySink>,
    config: BufferConfig,
}

impl BufferedMemoryWriter {
    pub fn new(
        primary_speaker: impl Into<String>,
        embedder: Arc<dyn Embedder>,
        memory: Arc<dyn VectorMemory>,
        counter: Arc<dyn TokenCounter>,
        telemetry: Arc<dyn TelemetrySink>,
        config: BufferConfig,
    ) -> Self {
        Self {
            buffers: BTreeMap::new(),
            seen: HashMap::new(),
            primary_speaker: primary_speaker.into(),
            embedder,
            memory,
            counter,
            telemetry,
            config,
        }
    }

    /// Admit utterances not seen before, by their position in each speaker's sequence.
    /// Returns how many were buffered.
    pub fn ingest(&mut self, utterances: &[SpeakerUtterance]) -> usize {
        let now = now_millis();
        let mut positions: HashMap<&str, usize> = HashMap::new();
        let mut admitted = 0;
        for u in utterances {
            let pos = positions.entry(u.speaker.as_str()).or_insert(0);
            let index = *pos;
            *pos += 1;

            let seen = self.seen.entry(u.speaker.clone()).or_default();
            if !seen.insert(index) {
                continue;
            }
            let text = u.text.trim();
            if text.is_empty() {
                continue;
            }
            let buffer = self.buffers.entry(u.speaker.clone()).or_default();
            if buffer.pending_texts.is_empty() {
                buffer.started_at = now;
            }
            buffer.pending_texts.push(text.to_string());
            buffer.last_updated = now;
            admitted += 1;
        }
        if admitted > 0 {
            debug!(admitted, pending_tokens = self.pending_tokens(), "buffered utterances");
        }
        admitted
    }

    pub fn state(&self) -> WriterState {
        WriterState {
            buffers: self.buffers.clone(),
            seen: self
                .seen
                .iter()
                .map(|(speaker, positions)| (speaker.clone(), positions.iter().copied().collect()))
                .collect(),
        }
    }

    /// Replace buffers and seen positions with a saved state.
    pub fn restore(&mut self, state: WriterState) {
        self.buffers = state.buffers;
        self.seen = state
            .seen
            .into_iter()
            .map(|(speaker, positions)| (speaker, positions.into_iter().collect()))
            .collect();
    }

    pub fn buffer(&self, speaker: &str) -> Option<&MemoryBuffer> {
        self.buffers.get(speaker)
    }

    /// Token count across every pending buffer.
    pub fn pending_tokens(&self) -> usize {
        self.buffers
            .values()
            .filter(|b| !b.pending_texts.is_empty())
            .map(|b| count_tokens(self.counter.as_ref(), &b.joined()))
            .sum()
    }

    /// Never below `min_flush_tokens`, always at or above `max_flush_tokens`,
    /// and no size-triggered flush in between.
    pub fn should_flush(&self) -> bool {
        let total = self.pending_tokens();
        if total < self.config.min_flush_tokens {
            return false;
        }
        total >= self.config.max_flush_tokens
    }

    /// End-of-cycle persistence: flush when the threshold is crossed, otherwise
    /// write only the answer (if any) and leave the buffers alone.
    pub async fn persist(&mut self, answer: Option<&str>) -> Result<FlushOutcome> {
        let answer = answer.map(str::trim).filter(|a| !a.is_empty());
        if self.should_flush() {
            return self.flush(answer).await;
        }
        match answer {
            Some(a) => {
                let record = self.answer_record(a).await?;
                self.upsert(vec![record]).await?;
                self.telemetry.record(&TelemetryEvent::Flush {
                    records: 1,
                    answer_only: true,
                });
                debug!("threshold not crossed, persisted answer only");
                Ok(FlushOutcome::AnswerOnly)
            }
            None => Ok(FlushOutcome::Skipped),
        }
    }

    /// Write one record per non-empty buffer (plus the answer) and clear the
    /// flushed buffers. On any failure nothing is cleared, so the content is
    /// retried on the next eligible cycle.
    pub async fn flush(&mut self, answer: Option<&str>) -> Result<FlushOutcome> {
        let mut records = Vec::new();
        let mut flushed: Vec<String> = Vec::new();
        for (speaker, buffer) in &self.buffers {
            if buffer.pending_texts.is_empty() {
                continue;
            }
            let text = buffer.joined();
            let vector = self.embed_for_persist(&text).await?;
            let role = if speaker.trim().eq_ignore_ascii_case(self.primary_speaker.trim()) {
                "primary"
            } else {
                "external"
            };
            let mut metadata = BTreeMap::new();
            metadata.insert("kind".to_string(), MetadataValue::from("utterances"));
            metadata.insert("speaker".to_string(), MetadataValue::from(speaker.as_str()));
            metadata.insert("role".to_string(), MetadataValue::from(role));
            metadata.insert(
                "message_count".to_string(),
                MetadataValue::from(buffer.pending_texts.len() as i64),
            );
            metadata.insert(
                "buffer_started_at".to_string(),
                MetadataValue::from(millis_to_iso8601(buffer.started_at)),
            );
            metadata.insert(
                "buffer_updated_at".to_string(),
                MetadataValue::from(millis_to_iso8601(buffer.last_updated)),
            );
            metadata.insert("text".to_string(), MetadataValue::from(text));
            records.push(MemoryRecord {
                id: Uuid::new_v4().to_string(),
                vector,
                metadata,
            });
            flushed.push(speaker.clone());
        }

        if let Some(a) = answer {
            records.push(self.answer_record(a).await?);
        }
        if records.is_empty() {
            return Ok(FlushOutcome::Skipped);
        }

        let count = records.len();
        self.upsert(records).await?;
        for speaker in &flushed {
            if let Some(buffer) = self.buffers.get_mut(speaker) {
                buffer.pending_texts.clear();
            }
        }
        self.telemetry.record(&TelemetryEvent::Flush {
            records: count,
            answer_only: false,
        });
        info!(records = count, speakers = flushed.len(), "flushed memory buffers");
        Ok(FlushOutcome::Flushed { records: count })
    }

    async fn answer_record(&self, answer: &str) -> Result<MemoryRecord> {
        let vector = self.embed_for_persist(answer).await?;
        let mut metadata = BTreeMap::new();
        metadata.insert("kind".to_string(), MetadataValue::from("answer"));
        metadata.insert("role".to_string(), MetadataValue::from("assistant"));
        metadata.insert(
            "created_at".to_string(),
            MetadataValue::from(millis_to_iso8601(now_millis())),
        );
        metadata.insert("text".to_string(), MetadataValue::from(answer));
        Ok(MemoryRecord {
            id: Uuid::new_v4().to_string(),
            vector,
            metadata,
        })
    }

    async fn embed_for_persist(&self, text: &str) -> Result<Vec<f32>> {
        match self.embedder.embed(text).await {
            Ok(v) if !v.is_empty() => Ok(v),
            Ok(_) => Err(CoreError::Persistence("embedding came back empty".into())),
            Err(e) => Err(CoreError::Persistence(format!("embedding failed: {e}"))),
        }
    }

    async fn upsert(&self, records: Vec<MemoryRecord>) -> Result<()> {
        self.memory.upsert(records).await.map_err(|e| {
            warn!("memory upsert failed, buffers kept for retry: {e}");
            match e {
                persistence @ CoreError::Persistence(_) => persistence,
                other => CoreError::Persistence(other.to_string()),
            }
        })
    }
}

impl Resettable for BufferedMemoryWriter {
    fn reset(&mut self) {
        self.buffers.clear();
        self.seen.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashingEmbedder;
    use crate::telemetry::NullTelemetry;
    use crate::traits::QueryFilters;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// One token per whitespace-separated word.
    struct WordCounter;

    impl TokenCounter for WordCounter {
        fn count(&self, text: &str) -> Result<usize> {
            Ok(text.split_whitespace().count())
        }
    }

    #[derive(Default)]
    struct RecordingMemory {
        upserts: Mutex<Vec<Vec<MemoryRecord>>>,
        fail: AtomicBool,
    }

    #[async_trait]
    impl VectorMemory for RecordingMemory {
        async fn query(
            &self,
            _vector: &[f32],
            _top_k: usize,
            _keywords: &[String],
            _filters: Option<&QueryFilters>,
        ) -> Result<String> {
            Ok(String::new())
        }

        async fn upsert(&self, records: Vec<MemoryRecord>) -> Result<()> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(CoreError::Persistence("disk full".into()));
            }
            self.upserts.lock().unwrap().push(records);
            Ok(())
        }

        fn is_available(&self) -> bool {
            true
        }
    }

    fn words(n: usize) -> String {
        (0..n).map(|i| format!("w{i}")).collect::<Vec<_>>().join(" ")
    }

    fn writer(memory: Arc<RecordingMemory>, min: usize, max: usize) -> BufferedMemoryWriter {
        BufferedMemoryWriter::new(
            "me",
            Arc::new(HashingEmbedder::new(16)),
            memory,
            Arc::new(WordCounter),
            Arc::new(NullTelemetry),
            BufferConfig {
                min_flush_tokens: min,
                max_flush_tokens: max,
            },
        )
    }

    #[tokio::test]
    async fn test_threshold_window() {
        let memory = Arc::new(RecordingMemory::default());
        let mut w = writer(memory.clone(), 100, 150);

        let mut transcript = vec![SpeakerUtterance::new("me", words(40), 1)];
        w.ingest(&transcript);
        assert_eq!(w.pending_tokens(), 40);
        assert!(!w.should_flush());

        transcript.push(SpeakerUtterance::new("Alice", words(120), 2));
        w.ingest(&transcript);
        assert_eq!(w.pending_tokens(), 160);
        assert!(w.should_flush());

        let outcome = w.persist(None).await.unwrap();
        assert_eq!(outcome, FlushOutcome::Flushed { records: 2 });
        assert_eq!(w.pending_tokens(), 0);
        assert!(!w.should_flush());
    }

    #[tokio::test]
    async fn test_between_thresholds_does_not_flush() {
        let memory = Arc::new(RecordingMemory::default());
        let mut w = writer(memory, 100, 150);
        w.ingest(&[SpeakerUtterance::new("me", words(120), 1)]);
        assert!(!w.should_flush());
    }

    #[tokio::test]
    async fn test_answer_only_keeps_buffers() {
        let memory = Arc::new(RecordingMemory::default());
        let mut w = writer(memory.clone(), 100, 150);
        w.ingest(&[SpeakerUtterance::new("me", words(40), 1)]);

        let outcome = w.persist(Some("the answer")).await.unwrap();
        assert_eq!(outcome, FlushOutcome::AnswerOnly);

        let upserts = memory.upserts.lock().unwrap();
        assert_eq!(upserts.len(), 1);
        assert_eq!(upserts[0].len(), 1);
        assert_eq!(upserts[0][0].text(), Some("the answer"));
        assert_eq!(
            upserts[0][0].metadata.get("role"),
            Some(&MetadataValue::from("assistant"))
        );
        assert_eq!(w.buffer("me").unwrap().pending_texts.len(), 1);
        assert_eq!(w.pending_tokens(), 40);
    }

    #[tokio::test]
    async fn test_flush_records_carry_metadata() {
        let memory = Arc::new(RecordingMemory::default());
        let mut w = writer(memory.clone(), 1, 2);
        w.ingest(&[
            SpeakerUtterance::new("me", "first point", 1),
            SpeakerUtterance::new("me", "second point", 2),
        ]);
        let outcome = w.persist(Some("reply")).await.unwrap();
        assert_eq!(outcome, FlushOutcome::Flushed { records: 2 });

        let upserts = memory.upserts.lock().unwrap();
        let record = &upserts[0][0];
        assert_eq!(record.text(), Some("first point\nsecond point"));
        assert_eq!(record.metadata["speaker"], MetadataValue::from("me"));
        assert_eq!(record.metadata["role"], MetadataValue::from("primary"));
        assert_eq!(record.metadata["message_count"], MetadataValue::from(2i64));
        assert!(record.metadata.contains_key("buffer_started_at"));
        assert_eq!(upserts[0][1].text(), Some("reply"));
    }

    #[tokio::test]
    async fn test_seen_positions_not_reingested() {
        let memory = Arc::new(RecordingMemory::default());
        let mut w = writer(memory, 100, 150);
        let transcript = vec![
            SpeakerUtterance::new("me", "same words", 1),
            SpeakerUtterance::new("me", "same words", 2),
        ];
        assert_eq!(w.ingest(&transcript), 2);
        assert_eq!(w.ingest(&transcript), 0);
        assert_eq!(w.buffer("me").unwrap().pending_texts.len(), 2);
    }

    #[tokio::test]
    async fn test_failed_flush_keeps_buffers() {
        let memory = Arc::new(RecordingMemory::default());
        memory.fail.store(true, Ordering::SeqCst);
        let mut w = writer(memory.clone(), 1, 2);
        w.ingest(&[SpeakerUtterance::new("me", "keep these words", 1)]);

        let err = w.persist(None).await.unwrap_err();
        assert!(matches!(err, CoreError::Persistence(_)));
        assert_eq!(w.pending_tokens(), 3);

        memory.fail.store(false, Ordering::SeqCst);
        let outcome = w.persist(None).await.unwrap();
        assert_eq!(outcome, FlushOutcome::Flushed { records: 1 });
        assert_eq!(w.pending_tokens(), 0);
    }

    #[tokio::test]
    async fn test_reset_clears_seen_positions() {
        let memory = Arc::new(RecordingMemory::default());
        let mut w = writer(memory, 100, 150);
        let transcript = vec![SpeakerUtterance::new("me", "hello", 1)];
        w.ingest(&transcript);
        w.reset();
        assert_eq!(w.pending_tokens(), 0);
        assert_eq!(w.ingest(&transcript), 1);
    }

    #[tokio::test]
    async fn test_restored_state_keeps_buffers_and_positions() {
        let memory = Arc::new(RecordingMemory::default());
        let mut first = writer(memory.clone(), 100, 150);
        let transcript = vec![SpeakerUtterance::new("me", "carry this over", 1)];
        first.ingest(&transcript);

        let saved: WriterState =
            serde_json::from_str(&serde_json::to_string(&first.state()).unwrap()).unwrap();
        let mut second = writer(memory, 100, 150);
        second.restore(saved);

        assert_eq!(second.ingest(&transcript), 0);
        assert_eq!(
            second.buffer("me").unwrap().pending_texts,
            vec!["carry this over".to_string()]
        );
        assert_eq!(second.state(), first.state());
    }
}
