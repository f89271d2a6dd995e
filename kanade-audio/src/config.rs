use anyhow::{Context, Result};
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct EffectsSettings {
    /// The hardware voice budget shared by every sound effect.
    pub max_sources: usize,
    /// How many idle chains are kept per sound for reuse.
    pub max_pool_size: usize,
}

impl Default for EffectsSettings {
    fn default() -> Self {
        Self {
            max_sources: 32,
            max_pool_size: 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct MusicSettings {
    /// Linear UI volume of the music, in `[0, 1]`.
    pub volume: f32,
}

impl Default for MusicSettings {
    fn default() -> Self {
        Self { volume: 1.0 }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct AudioSettings {
    pub effects: EffectsSettings,
    pub music: MusicSettings,
}

impl AudioSettings {
    pub fn from_yaml(source: &str) -> Result<Self> {
        serde_yaml::from_str(source).context("Parsing audio settings")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_gives_defaults() {
        let settings = AudioSettings::from_yaml("{}").unwrap();
        assert_eq!(settings, AudioSettings::default());
        assert_eq!(settings.effects.max_sources, 32);
    }

    #[test]
    fn partial_sections() {
        let settings = AudioSettings::from_yaml(
            "effects:\n  max_sources: 8\nmusic:\n  volume: 0.5\n",
        )
        .unwrap();
        assert_eq!(settings.effects.max_sources, 8);
        assert_eq!(settings.effects.max_pool_size, 4);
        assert_eq!(settings.music.volume, 0.5);
    }

    #[test]
    fn rejects_garbage() {
        assert!(AudioSettings::from_yaml("effects: [1, 2]").is_err());
    }
}
