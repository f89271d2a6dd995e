//! The sound effects player.
//!
//! Every play needs a chain: a gain handle wired into the output bus with a playable unit
//! feeding it. Units are single-use, gain handles are not, so finished chains go back to a small
//! per-sound idle pool and get a fresh unit on their next play.
//!
//! All active chains across all sounds are also tracked in one insertion-ordered registry. Its
//! size is bounded by the hardware voice budget, and its first entry is the oldest voice, which
//! gets stolen when the budget is exhausted.

use std::{collections::HashMap, sync::Arc, time::Duration};

use indexmap::IndexMap;
use tracing::{debug, error, warn};

use crate::{
    asset::AssetLookup,
    backend::{
        AudioBackend, BackendError, GainId, SourceId, create_output_gain, create_wired_source,
        release_source,
    },
    completion::Completion,
    config::EffectsSettings,
    gain_curve,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChainId(u64);

#[derive(Debug)]
struct AudioChain {
    id: ChainId,
    gain: GainId,
}

#[derive(Debug)]
struct ActiveChain {
    chain: AudioChain,
    source: SourceId,
    ended: Completion,
}

#[derive(Debug, Default)]
struct SoundPool {
    idle: Vec<AudioChain>,
    active: HashMap<ChainId, ActiveChain>,
}

pub struct ChainPool<B: AudioBackend> {
    backend: Arc<B>,
    assets: Arc<dyn AssetLookup<B::Buffer>>,
    settings: EffectsSettings,
    pools: HashMap<String, SoundPool>,
    /// Every active chain with the sound owning it, oldest first.
    active: IndexMap<ChainId, String>,
    next_chain_id: u64,
}

impl<B: AudioBackend> ChainPool<B> {
    pub fn new(
        backend: Arc<B>,
        assets: Arc<dyn AssetLookup<B::Buffer>>,
        settings: EffectsSettings,
    ) -> Self {
        Self {
            backend,
            assets,
            settings,
            pools: HashMap::new(),
            active: IndexMap::new(),
            next_chain_id: 0,
        }
    }

    /// Plays a sound effect once.
    ///
    /// Returns the chain that is playing it, or `None` if the sound could not be played (this is
    /// logged, never propagated).
    pub fn play(&mut self, sound_id: &str, volume: f32) -> Option<ChainId> {
        let Some(buffer) = self.assets.get(sound_id) else {
            error!("Sound effect {:?} not found", sound_id);
            return None;
        };

        if self.settings.max_sources == 0 {
            warn!("Not playing {:?}: the voice budget is zero", sound_id);
            return None;
        }

        if self.active.len() >= self.settings.max_sources {
            self.steal_oldest();
        }

        match self.try_play(sound_id, &buffer, volume) {
            Ok(id) => Some(id),
            Err(err) => {
                error!("Failed to play sound effect {:?}: {}", sound_id, err);
                None
            }
        }
    }

    fn try_play(
        &mut self,
        sound_id: &str,
        buffer: &B::Buffer,
        volume: f32,
    ) -> Result<ChainId, BackendError> {
        let chain = self.acquire_chain(sound_id)?;

        let source = match create_wired_source(&*self.backend, buffer, false, chain.gain) {
            Ok(source) => source,
            Err(err) => {
                self.recycle(sound_id, chain);
                return Err(err);
            }
        };

        let started = self
            .backend
            .set_gain(chain.gain, gain_curve::to_gain(volume))
            .and_then(|()| self.backend.start(source, 0.0));
        let ended = match started {
            Ok(ended) => ended,
            Err(err) => {
                self.backend.disconnect_source(source);
                self.recycle(sound_id, chain);
                return Err(err);
            }
        };

        let id = chain.id;
        self.pools
            .entry(sound_id.to_string())
            .or_default()
            .active
            .insert(
                id,
                ActiveChain {
                    chain,
                    source,
                    ended,
                },
            );
        self.active.insert(id, sound_id.to_string());

        Ok(id)
    }

    /// Takes an idle chain of this sound, or builds a new one.
    fn acquire_chain(&mut self, sound_id: &str) -> Result<AudioChain, BackendError> {
        let pool = self.pools.entry(sound_id.to_string()).or_default();

        if let Some(chain) = pool.idle.pop() {
            // the gain may still carry a fade from the previous play; left alone it would apply
            // to the new unit as well
            let reset = self
                .backend
                .cancel_gain_automation(chain.gain)
                .and_then(|()| self.backend.set_gain(chain.gain, 1.0));
            match reset {
                Ok(()) => {
                    debug!("Reusing {:?} for {:?}", chain.id, sound_id);
                    return Ok(chain);
                }
                Err(err) => {
                    warn!(
                        "Could not reset idle {:?} of {:?}, discarding it: {}",
                        chain.id, sound_id, err
                    );
                    self.backend.disconnect_gain(chain.gain);
                }
            }
        }

        let gain = create_output_gain(&*self.backend, 1.0)?;
        self.next_chain_id += 1;
        let id = ChainId(self.next_chain_id);
        debug!("Created {:?} for {:?}", id, sound_id);

        Ok(AudioChain { id, gain })
    }

    /// Returns a chain whose unit is gone to its idle pool, or discards it if the pool is full.
    fn recycle(&mut self, sound_id: &str, chain: AudioChain) {
        let max_pool_size = self.settings.max_pool_size;
        match self.pools.get_mut(sound_id) {
            Some(pool) if pool.idle.len() < max_pool_size => pool.idle.push(chain),
            _ => {
                debug!("Discarding {:?} of {:?}", chain.id, sound_id);
                self.backend.disconnect_gain(chain.gain);
            }
        }
    }

    /// Removes an active chain from both its pool and the registry.
    fn take_active(&mut self, id: ChainId, sound_id: &str) -> Option<ActiveChain> {
        self.active.shift_remove(&id);
        self.pools
            .get_mut(sound_id)
            .and_then(|pool| pool.active.remove(&id))
    }

    fn steal_oldest(&mut self) {
        let Some((&id, sound_id)) = self.active.first() else {
            return;
        };
        let sound_id = sound_id.clone();
        debug!("Voice budget exhausted, stealing {:?} of {:?}", id, sound_id);

        if let Some(active) = self.take_active(id, &sound_id) {
            release_source(&*self.backend, active.source);
            self.recycle(&sound_id, active.chain);
        }
    }

    /// Processes natural completions, oldest chain first.
    pub fn update(&mut self) {
        let finished = self
            .active
            .iter()
            .filter(|&(id, sound_id)| {
                self.pools
                    .get(sound_id)
                    .and_then(|pool| pool.active.get(id))
                    .is_some_and(|active| active.ended.is_complete())
            })
            .map(|(&id, sound_id)| (id, sound_id.clone()))
            .collect::<Vec<_>>();

        for (id, sound_id) in finished {
            if let Some(active) = self.take_active(id, &sound_id) {
                self.backend.disconnect_source(active.source);
                self.recycle(&sound_id, active.chain);
            }
        }
    }

    /// Sets the volume of every playing instance of a sound.
    pub fn set_volume(&mut self, sound_id: &str, volume: f32) {
        let gain = gain_curve::to_gain(volume);
        let chains = self.active_gains(sound_id);
        if chains.is_empty() {
            warn!("Tried to set volume of {:?}, but it is not playing", sound_id);
        }
        for chain in chains {
            let result = self
                .backend
                .cancel_gain_automation(chain)
                .and_then(|()| self.backend.set_gain(chain, gain));
            if let Err(err) = result {
                warn!("Failed to set volume of {:?}: {}", sound_id, err);
            }
        }
    }

    /// Fades every playing instance of a sound to silence.
    ///
    /// The chains keep their voices until they end or get stolen.
    pub fn fade_out(&mut self, sound_id: &str, duration: Duration) {
        let chains = self.active_gains(sound_id);
        if chains.is_empty() {
            warn!("Tried to fade out {:?}, but it is not playing", sound_id);
        }
        for chain in chains {
            if let Err(err) = self.backend.ramp_gain(chain, 0.0, duration) {
                warn!("Failed to fade out {:?}: {}", sound_id, err);
            }
        }
    }

    /// Stops every playing instance of a sound right away.
    pub fn stop(&mut self, sound_id: &str) {
        let ids = self
            .pools
            .get(sound_id)
            .map(|pool| pool.active.keys().copied().collect::<Vec<_>>())
            .unwrap_or_default();
        if ids.is_empty() {
            warn!("Tried to stop {:?}, but it is not playing", sound_id);
        }
        for id in ids {
            if let Some(active) = self.take_active(id, sound_id) {
                release_source(&*self.backend, active.source);
                self.recycle(sound_id, active.chain);
            }
        }
    }

    /// Stops everything and releases every chain, idle ones included.
    pub fn stop_all(&mut self) {
        for pool in self.pools.values_mut() {
            for (_, active) in pool.active.drain() {
                release_source(&*self.backend, active.source);
                self.backend.disconnect_gain(active.chain.gain);
            }
            for chain in pool.idle.drain(..) {
                self.backend.disconnect_gain(chain.gain);
            }
        }
        self.active.clear();
    }

    pub fn dispose(&mut self) {
        self.stop_all();
        self.pools.clear();
    }

    fn active_gains(&self, sound_id: &str) -> Vec<GainId> {
        self.pools
            .get(sound_id)
            .map(|pool| pool.active.values().map(|a| a.chain.gain).collect())
            .unwrap_or_default()
    }

    /// Active chains across all sounds, oldest first.
    pub fn active_chains(&self) -> Vec<ChainId> {
        self.active.keys().copied().collect()
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn active_count_for(&self, sound_id: &str) -> usize {
        self.pools.get(sound_id).map_or(0, |pool| pool.active.len())
    }

    pub fn idle_count(&self, sound_id: &str) -> usize {
        self.pools.get(sound_id).map_or(0, |pool| pool.idle.len())
    }

    /// Sounds that have a pool, in no particular order.
    pub fn pooled_sounds(&self) -> Vec<&str> {
        self.pools.keys().map(String::as_str).collect()
    }

    /// The unit and gain handle of an active chain.
    pub fn chain_nodes(&self, id: ChainId) -> Option<(SourceId, GainId)> {
        let sound_id = self.active.get(&id)?;
        let active = self.pools.get(sound_id)?.active.get(&id)?;
        Some((active.source, active.chain.gain))
    }
}
