use std::sync::Arc;

use crate::{
    asset::AssetLookup,
    backend::AudioBackend,
    chain_pool::ChainPool,
    config::AudioSettings,
    event::EventSink,
    music_player::MusicPlayer,
    timer::Timer,
    voice_player::VoicePlayer,
};

/// Owns one of each player, all sharing the same backend and collaborators.
pub struct AudioManager<B: AudioBackend> {
    backend: Arc<B>,
    pub effects: ChainPool<B>,
    pub music: MusicPlayer<B>,
    pub voices: VoicePlayer<B>,
}

impl<B: AudioBackend> AudioManager<B> {
    pub fn new(
        backend: Arc<B>,
        assets: Arc<dyn AssetLookup<B::Buffer>>,
        timer: Arc<dyn Timer>,
        events: Arc<dyn EventSink>,
        settings: AudioSettings,
    ) -> Self {
        let effects = ChainPool::new(backend.clone(), assets.clone(), settings.effects);
        let music = MusicPlayer::new(
            backend.clone(),
            assets.clone(),
            timer,
            events.clone(),
            settings.music,
        );
        let voices = VoicePlayer::new(backend.clone(), assets, events);

        Self {
            backend,
            effects,
            music,
            voices,
        }
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// Delivers pending completions. Call once per frame, after advancing the timer.
    pub fn update(&mut self) {
        self.backend.update();
        self.effects.update();
        self.music.update();
        self.voices.update();
    }

    pub fn dispose(&mut self) {
        self.effects.dispose();
        self.music.dispose();
        self.voices.dispose();
    }
}
