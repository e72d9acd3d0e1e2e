use serde::{Deserialize, Deserializer, Serialize};

pub const DEFAULT_MODEL: &str = "gpt-4o-realtime-preview";
pub const DEFAULT_VOICE: &str = "alloy";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    Audio,
    Text,
}

/// Both text and audio, the pairing a spoken interview needs.
#[must_use]
pub fn text_and_audio() -> Vec<Modality> {
    vec![Modality::Text, Modality::Audio]
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct Voice(String);

impl Voice {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Voice {
    fn default() -> Self {
        Self(DEFAULT_VOICE.to_string())
    }
}

impl From<&str> for Voice {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Voice {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for Voice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum MaxTokens {
    Count(u32),
    Infinite(Infinite),
}

impl Default for MaxTokens {
    fn default() -> Self {
        Self::Infinite(Infinite::Inf)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Infinite {
    #[serde(rename = "inf")]
    Inf,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
#[serde(transparent)]
pub struct Temperature(f32);

impl Temperature {
    /// # Errors
    /// Returns an error if `val` is outside the range the API accepts for
    /// realtime sessions, [0.6, 1.2].
    pub fn new(val: f32) -> Result<Self, TemperatureError> {
        if (0.6..=1.2).contains(&val) {
            Ok(Self(val))
        } else {
            Err(TemperatureError { value: val })
        }
    }

    #[must_use]
    pub const fn value(self) -> f32 {
        self.0
    }
}

impl Default for Temperature {
    fn default() -> Self {
        Self(0.8)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TemperatureError {
    pub value: f32,
}

impl std::fmt::Display for TemperatureError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "temperature must be between 0.6 and 1.2, got {}",
            self.value
        )
    }
}

impl std::error::Error for TemperatureError {}

impl TryFrom<f32> for Temperature {
    type Error = TemperatureError;

    fn try_from(value: f32) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl<'de> Deserialize<'de> for Temperature {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = f32::deserialize(deserializer)?;
        Self::new(value).map_err(serde::de::Error::custom)
    }
}
