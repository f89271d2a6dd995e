use std::{collections::HashMap, sync::Arc};

use tracing::{debug, error, warn};

use crate::{
    asset::AssetLookup,
    backend::{
        AudioBackend, BackendError, GainId, SourceId, create_output_gain, create_wired_source,
        release_source,
    },
    completion::Completion,
    event::{AudioEvent, EventSink},
    gain_curve,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VoiceHandle(u64);

struct VoiceEntry {
    voice_id: String,
    source: SourceId,
    gain: GainId,
    ended: Completion,
}

/// Plays voice lines. Nothing is pooled: every line gets its own unit and gain handle, both
/// released as soon as the line ends.
pub struct VoicePlayer<B: AudioBackend> {
    backend: Arc<B>,
    assets: Arc<dyn AssetLookup<B::Buffer>>,
    events: Arc<dyn EventSink>,
    active: HashMap<VoiceHandle, VoiceEntry>,
    next_handle: u64,
}

impl<B: AudioBackend> VoicePlayer<B> {
    pub fn new(
        backend: Arc<B>,
        assets: Arc<dyn AssetLookup<B::Buffer>>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            backend,
            assets,
            events,
            active: HashMap::new(),
            next_handle: 0,
        }
    }

    pub fn play_voice(&mut self, voice_id: &str, volume: f32) -> Option<VoiceHandle> {
        let Some(buffer) = self.assets.get(voice_id) else {
            error!("Voice line {:?} not found", voice_id);
            return None;
        };

        let (source, gain, ended) = match self.start_entry(&buffer, volume) {
            Ok(nodes) => nodes,
            Err(err) => {
                error!("Failed to play voice line {:?}: {}", voice_id, err);
                return None;
            }
        };

        self.next_handle += 1;
        let handle = VoiceHandle(self.next_handle);
        self.active.insert(
            handle,
            VoiceEntry {
                voice_id: voice_id.to_string(),
                source,
                gain,
                ended,
            },
        );
        self.events.emit(AudioEvent::VoiceStarted {
            voice_id: voice_id.to_string(),
        });

        Some(handle)
    }

    fn start_entry(
        &self,
        buffer: &B::Buffer,
        volume: f32,
    ) -> Result<(SourceId, GainId, Completion), BackendError> {
        let gain = create_output_gain(&*self.backend, gain_curve::to_gain(volume))?;
        let source = match create_wired_source(&*self.backend, buffer, false, gain) {
            Ok(source) => source,
            Err(err) => {
                self.backend.disconnect_gain(gain);
                return Err(err);
            }
        };
        match self.backend.start(source, 0.0) {
            Ok(ended) => Ok((source, gain, ended)),
            Err(err) => {
                self.backend.disconnect_source(source);
                self.backend.disconnect_gain(gain);
                Err(err)
            }
        }
    }

    /// Releases the lines that finished playing.
    pub fn update(&mut self) {
        let mut finished = self
            .active
            .iter()
            .filter(|(_, entry)| entry.ended.is_complete())
            .map(|(&handle, _)| handle)
            .collect::<Vec<_>>();
        finished.sort();

        for handle in finished {
            let Some(entry) = self.active.remove(&handle) else {
                continue;
            };
            debug!("Voice line {:?} ended", entry.voice_id);
            self.backend.disconnect_source(entry.source);
            self.backend.disconnect_gain(entry.gain);
            self.events.emit(AudioEvent::VoiceEnded {
                voice_id: entry.voice_id,
            });
        }
    }

    fn release(&self, entry: VoiceEntry) {
        release_source(&*self.backend, entry.source);
        self.backend.disconnect_gain(entry.gain);
    }

    /// Cuts every playing instance of a voice line.
    pub fn stop_voice(&mut self, voice_id: &str) {
        let handles = self
            .active
            .iter()
            .filter(|(_, entry)| entry.voice_id == voice_id)
            .map(|(&handle, _)| handle)
            .collect::<Vec<_>>();
        if handles.is_empty() {
            warn!("Tried to stop voice line {:?}, but it is not playing", voice_id);
        }
        for handle in handles {
            if let Some(entry) = self.active.remove(&handle) {
                self.release(entry);
            }
        }
    }

    pub fn stop_all(&mut self) {
        for (_, entry) in std::mem::take(&mut self.active) {
            self.release(entry);
        }
    }

    pub fn is_playing(&self, voice_id: &str) -> bool {
        self.active.values().any(|entry| entry.voice_id == voice_id)
    }

    pub fn active_voice_count(&self) -> usize {
        self.active.len()
    }

    pub fn dispose(&mut self) {
        self.stop_all();
    }
}
