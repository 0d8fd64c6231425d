use serde::{Deserialize, Serialize};

/// Features a provider/model combination may advertise. Calling an
/// unsupported feature fails with [`crate::Error::Unsupported`] before any
/// network I/O.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    Tools,
    Streaming,
    Vision,
    Audio,
    Duplex,
}

impl std::fmt::Display for Feature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Tools => "tools",
            Self::Streaming => "streaming",
            Self::Vision => "vision",
            Self::Audio => "audio",
            Self::Duplex => "duplex",
        };
        f.write_str(s)
    }
}

/// Advertised capability set of a provider instance.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ProviderCapabilities {
    #[serde(default)]
    pub supports_tools: bool,
    #[serde(default)]
    pub supports_streaming: bool,
    #[serde(default)]
    pub supports_vision: bool,
    #[serde(default)]
    pub supports_audio: bool,
    #[serde(default)]
    pub supports_duplex: bool,
}

impl ProviderCapabilities {
    /// All flags enabled — used by the mock provider for test determinism.
    pub fn all() -> Self {
        Self {
            supports_tools: true,
            supports_streaming: true,
            supports_vision: true,
            supports_audio: true,
            supports_duplex: true,
        }
    }

    pub fn supports(&self, feature: Feature) -> bool {
        match feature {
            Feature::Tools => self.supports_tools,
            Feature::Streaming => self.supports_streaming,
            Feature::Vision => self.supports_vision,
            Feature::Audio => self.supports_audio,
            Feature::Duplex => self.supports_duplex,
        }
    }
}
