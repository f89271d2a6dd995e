use std::{collections::HashMap, sync::Arc, time::Duration};

use parking_lot::Mutex;
use tracing::trace;

use super::{
    AlreadyStoppedSnafu, AudioBackend, BackendError, DecodedBuffer, GainId, SourceId,
    UnknownGainSnafu, UnknownSourceSnafu,
};
use crate::{
    automation::GainAutomation,
    completion::{self, Completer, Completion},
};

/// A decoded buffer that only knows its name and duration.
#[derive(Debug, Clone)]
pub struct MockBuffer(Arc<MockBufferData>);

#[derive(Debug)]
struct MockBufferData {
    name: String,
    duration: Duration,
}

impl MockBuffer {
    pub fn new(name: impl Into<String>, duration: Duration) -> Self {
        Self(Arc::new(MockBufferData {
            name: name.into(),
            duration,
        }))
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }
}

impl DecodedBuffer for MockBuffer {
    fn duration(&self) -> Duration {
        self.0.duration
    }

    fn is_same(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// Every mutating call made against a [`MockBackend`], in order.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendCall {
    CreateSource { source: SourceId, buffer: String },
    CreateGain { gain: GainId },
    Connect { source: SourceId, gain: GainId },
    ConnectOutput { gain: GainId },
    DisconnectSource { source: SourceId },
    DisconnectGain { gain: GainId },
    Start { source: SourceId, offset: f64 },
    Stop { source: SourceId },
    SetGain { gain: GainId, value: f32 },
    RampGain { gain: GainId, value: f32, duration: Duration },
    CancelAutomation { gain: GainId },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SourceStatus {
    Created,
    Playing { offset: f64, started_at: f64 },
    Stopped,
}

struct MockSource {
    buffer: MockBuffer,
    looping: bool,
    gain: Option<GainId>,
    status: SourceStatus,
    completer: Option<Completer>,
    disconnected: bool,
}

struct MockGain {
    automation: GainAutomation,
    connected_to_output: bool,
    disconnected: bool,
}

#[derive(Default)]
struct MockState {
    now: f64,
    next_id: u64,
    sources: HashMap<SourceId, MockSource>,
    gains: HashMap<GainId, MockGain>,
    calls: Vec<BackendCall>,
}

impl MockState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn source(&mut self, id: SourceId) -> Result<&mut MockSource, BackendError> {
        match self.sources.get_mut(&id) {
            Some(source) if !source.disconnected => Ok(source),
            _ => UnknownSourceSnafu { id }.fail(),
        }
    }

    fn gain(&mut self, id: GainId) -> Result<&mut MockGain, BackendError> {
        match self.gains.get_mut(&id) {
            Some(gain) if !gain.disconnected => Ok(gain),
            _ => UnknownGainSnafu { id }.fail(),
        }
    }
}

/// A deterministic in-memory backend.
///
/// Time only moves when [`MockBackend::advance`] is called. Non-looping units end on their own
/// once enough time has passed, or immediately via [`MockBackend::finish`].
#[derive(Default)]
pub struct MockBackend {
    state: Mutex<MockState>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves the clock forward, ending every non-looping unit that ran out of buffer.
    pub fn advance(&self, delta: Duration) {
        let mut state = self.state.lock();
        state.now += delta.as_secs_f64();
        let now = state.now;

        for (id, source) in state.sources.iter_mut() {
            let SourceStatus::Playing { offset, started_at } = source.status else {
                continue;
            };
            if source.looping {
                continue;
            }
            if offset + (now - started_at) >= source.buffer.duration().as_secs_f64() {
                trace!("{:?} reached the end of its buffer", id);
                source.status = SourceStatus::Stopped;
                if let Some(completer) = source.completer.take() {
                    completer.complete();
                }
            }
        }
    }

    /// Ends a playing unit as if it reached the end of its buffer.
    pub fn finish(&self, source: SourceId) {
        let mut state = self.state.lock();
        if let Some(source) = state.sources.get_mut(&source) {
            if matches!(source.status, SourceStatus::Playing { .. }) {
                source.status = SourceStatus::Stopped;
                if let Some(completer) = source.completer.take() {
                    completer.complete();
                }
            }
        }
    }

    pub fn calls(&self) -> Vec<BackendCall> {
        self.state.lock().calls.clone()
    }

    pub fn take_calls(&self) -> Vec<BackendCall> {
        std::mem::take(&mut self.state.lock().calls)
    }

    pub fn sources_created(&self) -> usize {
        self.state.lock().sources.len()
    }

    pub fn gains_created(&self) -> usize {
        self.state.lock().gains.len()
    }

    /// Units currently playing, oldest first.
    pub fn playing_sources(&self) -> Vec<SourceId> {
        let state = self.state.lock();
        let mut playing = state
            .sources
            .iter()
            .filter(|(_, source)| matches!(source.status, SourceStatus::Playing { .. }))
            .map(|(&id, _)| id)
            .collect::<Vec<_>>();
        playing.sort();
        playing
    }

    pub fn source_status(&self, source: SourceId) -> Option<SourceStatus> {
        self.state.lock().sources.get(&source).map(|s| s.status)
    }

    pub fn source_buffer(&self, source: SourceId) -> Option<String> {
        self.state
            .lock()
            .sources
            .get(&source)
            .map(|s| s.buffer.name().to_string())
    }

    pub fn source_gain(&self, source: SourceId) -> Option<GainId> {
        self.state.lock().sources.get(&source).and_then(|s| s.gain)
    }

    pub fn is_source_disconnected(&self, source: SourceId) -> bool {
        self.state
            .lock()
            .sources
            .get(&source)
            .is_some_and(|s| s.disconnected)
    }

    pub fn is_gain_disconnected(&self, gain: GainId) -> bool {
        self.state
            .lock()
            .gains
            .get(&gain)
            .is_some_and(|g| g.disconnected)
    }

    /// Gain handles still wired into the output bus.
    pub fn live_gains(&self) -> Vec<GainId> {
        let state = self.state.lock();
        let mut gains = state
            .gains
            .iter()
            .filter(|(_, gain)| gain.connected_to_output && !gain.disconnected)
            .map(|(&id, _)| id)
            .collect::<Vec<_>>();
        gains.sort();
        gains
    }

    /// The value the gain settles on once its ramp (if any) finishes.
    pub fn gain_target(&self, gain: GainId) -> Option<f32> {
        self.state
            .lock()
            .gains
            .get(&gain)
            .map(|g| g.automation.target())
    }

    pub fn has_automation(&self, gain: GainId) -> bool {
        let state = self.state.lock();
        let now = state.now;
        state
            .gains
            .get(&gain)
            .is_some_and(|g| !g.automation.is_idle(now))
    }
}

impl AudioBackend for MockBackend {
    type Buffer = MockBuffer;

    fn current_time(&self) -> f64 {
        self.state.lock().now
    }

    fn create_source(&self, buffer: &MockBuffer, looping: bool) -> Result<SourceId, BackendError> {
        let mut state = self.state.lock();
        let id = SourceId(state.next_id());
        state.sources.insert(
            id,
            MockSource {
                buffer: buffer.clone(),
                looping,
                gain: None,
                status: SourceStatus::Created,
                completer: None,
                disconnected: false,
            },
        );
        state.calls.push(BackendCall::CreateSource {
            source: id,
            buffer: buffer.name().to_string(),
        });
        Ok(id)
    }

    fn create_gain(&self) -> Result<GainId, BackendError> {
        let mut state = self.state.lock();
        let id = GainId(state.next_id());
        state.gains.insert(
            id,
            MockGain {
                automation: GainAutomation::new(1.0),
                connected_to_output: false,
                disconnected: false,
            },
        );
        state.calls.push(BackendCall::CreateGain { gain: id });
        Ok(id)
    }

    fn connect(&self, source: SourceId, gain: GainId) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        state.gain(gain)?;
        state.source(source)?.gain = Some(gain);
        state.calls.push(BackendCall::Connect { source, gain });
        Ok(())
    }

    fn connect_output(&self, gain: GainId) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        state.gain(gain)?.connected_to_output = true;
        state.calls.push(BackendCall::ConnectOutput { gain });
        Ok(())
    }

    fn disconnect_source(&self, source: SourceId) {
        let mut state = self.state.lock();
        if let Some(s) = state.sources.get_mut(&source) {
            s.disconnected = true;
            s.gain = None;
        }
        state.calls.push(BackendCall::DisconnectSource { source });
    }

    fn disconnect_gain(&self, gain: GainId) {
        let mut state = self.state.lock();
        if let Some(g) = state.gains.get_mut(&gain) {
            g.disconnected = true;
            g.connected_to_output = false;
        }
        state.calls.push(BackendCall::DisconnectGain { gain });
    }

    fn start(&self, source: SourceId, offset: f64) -> Result<Completion, BackendError> {
        let mut state = self.state.lock();
        let now = state.now;
        let s = state.source(source)?;
        if s.status != SourceStatus::Created {
            return AlreadyStoppedSnafu { id: source }.fail();
        }
        let (completer, completion) = completion::channel();
        s.status = SourceStatus::Playing {
            offset,
            started_at: now,
        };
        s.completer = Some(completer);
        state.calls.push(BackendCall::Start { source, offset });
        Ok(completion)
    }

    fn stop(&self, source: SourceId) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        state.calls.push(BackendCall::Stop { source });
        let s = state.source(source)?;
        match s.status {
            SourceStatus::Playing { .. } => {
                s.status = SourceStatus::Stopped;
                if let Some(completer) = s.completer.take() {
                    completer.complete();
                }
                Ok(())
            }
            SourceStatus::Created | SourceStatus::Stopped => {
                s.status = SourceStatus::Stopped;
                AlreadyStoppedSnafu { id: source }.fail()
            }
        }
    }

    fn gain(&self, gain: GainId) -> Result<f32, BackendError> {
        let mut state = self.state.lock();
        let now = state.now;
        Ok(state.gain(gain)?.automation.value_at(now))
    }

    fn set_gain(&self, gain: GainId, value: f32) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        state.gain(gain)?.automation.set(value);
        state.calls.push(BackendCall::SetGain { gain, value });
        Ok(())
    }

    fn ramp_gain(&self, gain: GainId, value: f32, duration: Duration) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        let now = state.now;
        state.gain(gain)?.automation.ramp_to(now, value, duration);
        state.calls.push(BackendCall::RampGain {
            gain,
            value,
            duration,
        });
        Ok(())
    }

    fn cancel_gain_automation(&self, gain: GainId) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        let now = state.now;
        state.gain(gain)?.automation.cancel(now);
        state.calls.push(BackendCall::CancelAutomation { gain });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn beep() -> MockBuffer {
        MockBuffer::new("beep", Duration::from_secs(1))
    }

    #[test]
    fn unit_ends_after_its_buffer() {
        let backend = MockBackend::new();
        let gain = backend.create_gain().unwrap();
        let source = backend.create_source(&beep(), false).unwrap();
        backend.connect(source, gain).unwrap();
        let ended = backend.start(source, 0.25).unwrap();

        backend.advance(Duration::from_millis(500));
        assert!(!ended.is_complete());
        backend.advance(Duration::from_millis(250));
        assert!(ended.is_complete());
        assert_eq!(backend.source_status(source), Some(SourceStatus::Stopped));
    }

    #[test]
    fn looping_unit_never_ends_on_its_own() {
        let backend = MockBackend::new();
        let source = backend.create_source(&beep(), true).unwrap();
        let ended = backend.start(source, 0.0).unwrap();

        backend.advance(Duration::from_secs(60));
        assert!(!ended.is_complete());
    }

    #[test]
    fn units_are_single_use() {
        let backend = MockBackend::new();
        let source = backend.create_source(&beep(), false).unwrap();
        let _ended = backend.start(source, 0.0).unwrap();
        backend.stop(source).unwrap();

        assert!(matches!(
            backend.start(source, 0.0),
            Err(BackendError::AlreadyStopped { .. })
        ));
        assert!(matches!(
            backend.stop(source),
            Err(BackendError::AlreadyStopped { .. })
        ));
    }

    #[test]
    fn stop_resolves_the_completion() {
        let backend = MockBackend::new();
        let source = backend.create_source(&beep(), false).unwrap();
        let ended = backend.start(source, 0.0).unwrap();
        backend.stop(source).unwrap();
        assert!(ended.is_complete());
    }

    #[test]
    fn disconnected_nodes_are_unusable() {
        let backend = MockBackend::new();
        let gain = backend.create_gain().unwrap();
        backend.disconnect_gain(gain);
        assert!(matches!(
            backend.set_gain(gain, 0.5),
            Err(BackendError::UnknownGain { .. })
        ));

        let source = backend.create_source(&beep(), false).unwrap();
        backend.disconnect_source(source);
        assert!(matches!(
            backend.start(source, 0.0),
            Err(BackendError::UnknownSource { .. })
        ));
    }

    #[test]
    fn gain_follows_the_clock() {
        let backend = MockBackend::new();
        let gain = backend.create_gain().unwrap();
        backend.ramp_gain(gain, 0.0, Duration::from_secs(2)).unwrap();
        assert!(backend.has_automation(gain));

        backend.advance(Duration::from_secs(1));
        assert!((backend.gain(gain).unwrap() - 0.5).abs() < 1e-6);

        backend.cancel_gain_automation(gain).unwrap();
        assert!(!backend.has_automation(gain));
        backend.advance(Duration::from_secs(5));
        assert!((backend.gain(gain).unwrap() - 0.5).abs() < 1e-6);
    }
}
