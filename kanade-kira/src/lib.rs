//! Kira backend for the Kanade audio core.
//!
//! Gain handles are kira sub-tracks (they route into the main track, which is the output bus).
//! Playable units are static sounds: created lazily on `start` and routed into the sub-track they
//! were connected to. Kira has no end-of-playback callback, so [`KiraBackend::update`] polls the
//! sound handles and resolves the completions of the ones that stopped.

use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use kanade_audio::{
    AudioBackend, BackendError, DecodedBuffer, GainId, SourceId,
    automation::GainAutomation,
    backend::{AllocationSnafu, AlreadyStoppedSnafu, UnknownGainSnafu, UnknownSourceSnafu},
    completion::{self, Completer, Completion},
};
use kira::{
    Volume,
    manager::{AudioManager, backend::Backend},
    sound::{
        PlaybackState,
        static_sound::{StaticSoundData, StaticSoundHandle, StaticSoundSettings},
    },
    track::{TrackBuilder, TrackHandle},
    tween::Tween,
};
use parking_lot::Mutex;
use tracing::{debug, trace};

/// A decoded sound, shared between every unit playing it.
#[derive(Clone)]
pub struct KiraBuffer(Arc<StaticSoundData>);

impl KiraBuffer {
    pub fn new(data: StaticSoundData) -> Self {
        Self(Arc::new(data))
    }
}

impl DecodedBuffer for KiraBuffer {
    fn duration(&self) -> Duration {
        self.0.duration()
    }

    fn is_same(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

struct KiraSource {
    buffer: KiraBuffer,
    looping: bool,
    gain: Option<GainId>,
    handle: Option<StaticSoundHandle>,
    completer: Option<Completer>,
    stopped: bool,
}

struct KiraGain {
    track: TrackHandle,
    /// Mirrors the volume commands sent to the track, kira can't be asked for it.
    automation: GainAutomation,
}

struct State<K: Backend> {
    manager: AudioManager<K>,
    next_id: u64,
    sources: HashMap<SourceId, KiraSource>,
    gains: HashMap<GainId, KiraGain>,
}

impl<K: Backend> State<K> {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn source(&mut self, id: SourceId) -> Result<&mut KiraSource, BackendError> {
        self.sources
            .get_mut(&id)
            .ok_or_else(|| UnknownSourceSnafu { id }.build())
    }

    fn gain(&mut self, id: GainId) -> Result<&mut KiraGain, BackendError> {
        self.gains
            .get_mut(&id)
            .ok_or_else(|| UnknownGainSnafu { id }.build())
    }
}

fn amplitude(value: f32) -> Volume {
    Volume::Amplitude(value as f64)
}

fn linear(duration: Duration) -> Tween {
    Tween {
        duration,
        ..Default::default()
    }
}

pub struct KiraBackend<K: Backend> {
    state: Mutex<State<K>>,
    epoch: Instant,
}

impl<K: Backend> KiraBackend<K> {
    pub fn new(manager: AudioManager<K>) -> Self {
        Self {
            state: Mutex::new(State {
                manager,
                next_id: 0,
                sources: HashMap::new(),
                gains: HashMap::new(),
            }),
            epoch: Instant::now(),
        }
    }
}

#[cfg(feature = "cpal")]
impl KiraBackend<kira::manager::backend::cpal::CpalBackend> {
    /// Opens the default output device.
    pub fn with_default_device() -> anyhow::Result<Self> {
        let manager = AudioManager::new(kira::manager::AudioManagerSettings::default())
            .map_err(|err| anyhow::anyhow!("Failed to create kira audio manager: {:?}", err))?;
        Ok(Self::new(manager))
    }
}

impl<K: Backend> AudioBackend for KiraBackend<K> {
    type Buffer = KiraBuffer;

    fn current_time(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }

    fn create_source(&self, buffer: &KiraBuffer, looping: bool) -> Result<SourceId, BackendError> {
        let mut state = self.state.lock();
        let id = SourceId(state.next_id());
        state.sources.insert(
            id,
            KiraSource {
                buffer: buffer.clone(),
                looping,
                gain: None,
                handle: None,
                completer: None,
                stopped: false,
            },
        );
        Ok(id)
    }

    fn create_gain(&self) -> Result<GainId, BackendError> {
        let mut state = self.state.lock();
        let track = state
            .manager
            .add_sub_track(TrackBuilder::new())
            .map_err(|err| {
                AllocationSnafu {
                    what: "sub-track",
                    message: format!("{:?}", err),
                }
                .build()
            })?;
        let id = GainId(state.next_id());
        state.gains.insert(
            id,
            KiraGain {
                track,
                automation: GainAutomation::new(1.0),
            },
        );
        Ok(id)
    }

    fn connect(&self, source: SourceId, gain: GainId) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        state.gain(gain)?;
        state.source(source)?.gain = Some(gain);
        Ok(())
    }

    fn connect_output(&self, gain: GainId) -> Result<(), BackendError> {
        // sub-tracks feed the main track unless told otherwise
        self.state.lock().gain(gain).map(|_| ())
    }

    fn disconnect_source(&self, source: SourceId) {
        let mut state = self.state.lock();
        if let Some(mut source) = state.sources.remove(&source) {
            if let Some(handle) = source.handle.as_mut() {
                if !source.stopped {
                    handle.stop(Tween::default());
                }
            }
        }
    }

    fn disconnect_gain(&self, gain: GainId) {
        // dropping the handle removes the sub-track
        self.state.lock().gains.remove(&gain);
    }

    fn start(&self, source: SourceId, offset: f64) -> Result<Completion, BackendError> {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let unit = state
            .sources
            .get_mut(&source)
            .ok_or_else(|| UnknownSourceSnafu { id: source }.build())?;
        if unit.stopped || unit.handle.is_some() {
            return AlreadyStoppedSnafu { id: source }.fail();
        }

        let mut settings = StaticSoundSettings::new().start_position(offset);
        if unit.looping {
            settings = settings.loop_region(..);
        }
        if let Some(gain) = unit.gain.and_then(|gain| state.gains.get(&gain)) {
            settings = settings.output_destination(&gain.track);
        }

        let handle = state
            .manager
            .play(unit.buffer.0.with_settings(settings))
            .map_err(|err| {
                AllocationSnafu {
                    what: "sound",
                    message: format!("{:?}", err),
                }
                .build()
            })?;

        let (completer, completion) = completion::channel();
        unit.handle = Some(handle);
        unit.completer = Some(completer);
        Ok(completion)
    }

    fn stop(&self, source: SourceId) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        let unit = state.source(source)?;
        if unit.stopped {
            return AlreadyStoppedSnafu { id: source }.fail();
        }
        unit.stopped = true;
        let Some(handle) = unit.handle.as_mut() else {
            return AlreadyStoppedSnafu { id: source }.fail();
        };
        handle.stop(Tween::default());
        if let Some(completer) = unit.completer.take() {
            completer.complete();
        }
        Ok(())
    }

    fn gain(&self, gain: GainId) -> Result<f32, BackendError> {
        let now = self.current_time();
        Ok(self.state.lock().gain(gain)?.automation.value_at(now))
    }

    fn set_gain(&self, gain: GainId, value: f32) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        let gain = state.gain(gain)?;
        gain.track.set_volume(amplitude(value), linear(Duration::ZERO));
        gain.automation.set(value);
        Ok(())
    }

    fn ramp_gain(&self, gain: GainId, value: f32, duration: Duration) -> Result<(), BackendError> {
        let now = self.current_time();
        let mut state = self.state.lock();
        let gain = state.gain(gain)?;
        gain.track.set_volume(amplitude(value), linear(duration));
        gain.automation.ramp_to(now, value, duration);
        Ok(())
    }

    fn cancel_gain_automation(&self, gain: GainId) -> Result<(), BackendError> {
        let now = self.current_time();
        let mut state = self.state.lock();
        let gain = state.gain(gain)?;
        gain.automation.cancel(now);
        let held = gain.automation.value_at(now);
        gain.track.set_volume(amplitude(held), linear(Duration::ZERO));
        Ok(())
    }

    fn update(&self) {
        let mut state = self.state.lock();
        for (id, unit) in state.sources.iter_mut() {
            if unit.stopped {
                continue;
            }
            let Some(handle) = &unit.handle else {
                continue;
            };
            if handle.state() == PlaybackState::Stopped {
                trace!("{:?} finished playing", id);
                unit.stopped = true;
                if let Some(completer) = unit.completer.take() {
                    completer.complete();
                }
            }
        }
    }
}

impl<K: Backend> Drop for KiraBackend<K> {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        debug!(
            "Dropping kira backend with {} units and {} gain tracks alive",
            state.sources.len(),
            state.gains.len()
        );
    }
}
