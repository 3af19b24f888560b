/// Topic layout under one base path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    base: String,
}

impl Topics {
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            base: base.into().trim_matches('/').to_string(),
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    fn join(&self, tail: &str) -> String {
        format!("{}/{}", self.base, tail)
    }

    pub fn command(&self) -> String {
        self.join("command")
    }

    pub fn config(&self, key: &str) -> String {
        self.join(&format!("config/{}", key))
    }

    /// Matches every `config/<key>` topic
    pub fn config_wildcard(&self) -> String {
        self.join("config/*")
    }

    pub fn response(&self) -> String {
        self.join("response")
    }

    pub fn volume(&self) -> String {
        self.join("audio/volume")
    }

    pub fn frequencies(&self) -> String {
        self.join("audio/frequencies")
    }

    pub fn audio_chunk(&self, timestamp: u64, index: usize) -> String {
        self.join(&format!("audio/{}/{}", timestamp, index))
    }

    pub fn audio_info(&self) -> String {
        self.join("audio/info")
    }

    /// Everything under `audio/`, used by the snapshot receiver
    pub fn audio_wildcard(&self) -> String {
        self.join("audio/>")
    }

    pub fn status(&self) -> String {
        self.join("status")
    }

    pub fn voice_detected(&self) -> String {
        self.join("voice/detected")
    }

    /// `base/config/<key>` -> `<key>`
    pub fn parse_config_key<'a>(&self, topic: &'a str) -> Option<&'a str> {
        let key = topic
            .strip_prefix(self.base.as_str())?
            .strip_prefix("/config/")?;
        if key.is_empty() || key.contains('/') {
            return None;
        }
        Some(key)
    }

    /// `base/audio/<timestamp>/<index>` -> `(timestamp, index)`
    pub fn parse_chunk(&self, topic: &str) -> Option<(u64, usize)> {
        let rest = topic
            .strip_prefix(self.base.as_str())?
            .strip_prefix("/audio/")?;
        let (timestamp, index) = rest.split_once('/')?;
        Some((timestamp.parse().ok()?, index.parse().ok()?))
    }
}

/// Whether `topic` matches `pattern`, where `*` matches one segment and a
/// trailing `>` matches one or more segments
pub fn topic_matches(pattern: &str, topic: &str) -> bool {
    let mut pattern_parts = pattern.split('/');
    let mut topic_parts = topic.split('/');

    loop {
        match (pattern_parts.next(), topic_parts.next()) {
            (Some(">"), Some(_)) => return true,
            (Some("*"), Some(_)) => {}
            (Some(p), Some(t)) if p == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// Logical topic to NATS subject
pub fn to_subject(topic: &str) -> String {
    topic.replace('/', ".")
}

/// NATS subject back to logical topic
pub fn from_subject(subject: &str) -> String {
    subject.replace('.', "/")
}

pub fn format_volume(loudness: f32) -> String {
    format!("{:.3}", loudness)
}

pub fn format_frequencies(magnitudes: &[f32]) -> String {
    magnitudes
        .iter()
        .map(|m| format!("{:.2}", m))
        .collect::<Vec<_>>()
        .join(",")
}
