use serde::{Deserialize, Serialize};

/// Whether a speaker is the assistant's user or someone else in the room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpeakerRole {
    Primary,
    External,
}

impl SpeakerRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpeakerRole::Primary => "primary",
            SpeakerRole::External => "external",
        }
    }
}

/// One transcribed utterance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeakerUtterance {
    pub speaker: String,
    pub text: String,
    /// Unix milliseconds.
    #[serde(default)]
    pub timestamp: u64,
}

impl SpeakerUtterance {
    pub fn new(speaker: impl Into<String>, text: impl Into<String>, timestamp: u64) -> Self {
        Self {
            speaker: speaker.into(),
            text: text.into(),
            timestamp,
        }
    }

    /// Role relative to the configured primary speaker (case-insensitive).
    pub fn role(&self, primary_speaker: &str) -> SpeakerRole {
        if self.speaker.trim().eq_ignore_ascii_case(primary_speaker.trim()) {
            SpeakerRole::Primary
        } else {
            SpeakerRole::External
        }
    }
}

/// Concatenated text of the utterances matching `role`, one per line.
pub fn joined_text(utterances: &[SpeakerUtterance], primary_speaker: &str, role: SpeakerRole) -> String {
    utterances
        .iter()
        .filter(|u| u.role(primary_speaker) == role)
        .map(|u| u.text.trim())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Distinct external speaker names in order of first appearance.
pub fn external_speakers(utterances: &[SpeakerUtterance], primary_speaker: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for u in utterances {
        if u.role(primary_speaker) == SpeakerRole::External && !names.contains(&u.speaker) {
            names.push(u.speaker.clone());
        }
    }
    names
}

/// Full chronological transcript. The speaker label is written only when the
/// speaker differs from the previously emitted segment.
pub fn render_full(utterances: &[SpeakerUtterance]) -> String {
    let mut lines = Vec::new();
    let mut last_speaker: Option<&str> = None;
    for u in utterances {
        let text = u.text.trim();
        if text.is_empty() {
            continue;
        }
        if last_speaker == Some(u.speaker.as_str()) {
            lines.push(text.to_string());
        } else {
            lines.push(format!("{}: {}", u.speaker, text));
            last_speaker = Some(u.speaker.as_str());
        }
    }
    lines.join("\n")
}

/// Last utterance of each speaker, ordered by the speaker's first appearance.
pub fn render_latest_per_speaker(utterances: &[SpeakerUtterance]) -> String {
    let mut order: Vec<&str> = Vec::new();
    let mut latest: Vec<&str> = Vec::new();
    for u in utterances {
        let text = u.text.trim();
        if text.is_empty() {
            continue;
        }
        match order.iter().position(|s| *s == u.speaker) {
            Some(i) => latest[i] = text,
            None => {
                order.push(&u.speaker);
                latest.push(text);
            }
        }
    }
    order
        .iter()
        .zip(latest.iter())
        .map(|(speaker, text)| format!("{speaker}: {text}"))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transcript() -> Vec<SpeakerUtterance> {
        vec![
            SpeakerUtterance::new("me", "hi there", 1),
            SpeakerUtterance::new("me", "how are you", 2),
            SpeakerUtterance::new("Alice", "fine thanks", 3),
            SpeakerUtterance::new("me", "great", 4),
            SpeakerUtterance::new("Alice", "and you?", 5),
        ]
    }

    #[test]
    fn test_label_only_on_speaker_change() {
        let text = render_full(&transcript());
        assert_eq!(
            text,
            "me: hi there\nhow are you\nAlice: fine thanks\nme: great\nAlice: and you?"
        );
    }

    #[test]
    fn test_latest_per_speaker() {
        let text = render_latest_per_speaker(&transcript());
        assert_eq!(text, "me: great\nAlice: and you?");
    }

    #[test]
    fn test_role_split() {
        let t = transcript();
        assert_eq!(joined_text(&t, "ME", SpeakerRole::Primary), "hi there\nhow are you\ngreat");
        assert_eq!(joined_text(&t, "me", SpeakerRole::External), "fine thanks\nand you?");
        assert_eq!(external_speakers(&t, "me"), vec!["Alice".to_string()]);
    }
}
