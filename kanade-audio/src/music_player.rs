//! The streaming music player.
//!
//! There is one music slot. Playing a new track preempts whatever is in it; pausing throws the
//! playable unit away and remembers the position, resuming starts a new unit from there.

use std::{sync::Arc, time::Duration};

use tracing::{debug, error, warn};

use crate::{
    asset::AssetLookup,
    backend::{
        AudioBackend, BackendError, DecodedBuffer, GainId, SourceId, create_output_gain,
        create_wired_source, release_source,
    },
    completion::Completion,
    config::MusicSettings,
    event::{AudioEvent, EventSink},
    gain_curve,
    timer::{ScheduledTimer, Timer},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MusicState {
    Stopped,
    Playing,
    Paused,
}

struct MusicTrack<Buf> {
    track_id: String,
    buffer: Buf,
    looping: bool,
    duration: f64,
    gain: GainId,
    /// The unit currently playing the track, `None` while paused.
    source: Option<(SourceId, Completion)>,
    /// Backend time at which position 0 would have been played.
    start_time: f64,
    pause_offset: f64,
    fade_out: Option<ScheduledTimer>,
}

fn wrap_position(position: f64, duration: f64) -> f64 {
    if duration > 0.0 && position.is_finite() {
        position.rem_euclid(duration)
    } else {
        0.0
    }
}

fn start_source<B: AudioBackend>(
    backend: &B,
    buffer: &B::Buffer,
    looping: bool,
    gain: GainId,
    offset: f64,
) -> Result<(SourceId, Completion), BackendError> {
    let source = create_wired_source(backend, buffer, looping, gain)?;
    match backend.start(source, offset) {
        Ok(ended) => Ok((source, ended)),
        Err(err) => {
            backend.disconnect_source(source);
            Err(err)
        }
    }
}

pub struct MusicPlayer<B: AudioBackend> {
    backend: Arc<B>,
    assets: Arc<dyn AssetLookup<B::Buffer>>,
    timer: Arc<dyn Timer>,
    events: Arc<dyn EventSink>,
    volume: f32,
    current: Option<MusicTrack<B::Buffer>>,
    /// Outgoing tracks of a crossfade, fading out on their own timers.
    retiring: Vec<MusicTrack<B::Buffer>>,
}

impl<B: AudioBackend> MusicPlayer<B> {
    pub fn new(
        backend: Arc<B>,
        assets: Arc<dyn AssetLookup<B::Buffer>>,
        timer: Arc<dyn Timer>,
        events: Arc<dyn EventSink>,
        settings: MusicSettings,
    ) -> Self {
        Self {
            backend,
            assets,
            timer,
            events,
            volume: settings.volume,
            current: None,
            retiring: Vec::new(),
        }
    }

    pub fn state(&self) -> MusicState {
        match &self.current {
            None => MusicState::Stopped,
            Some(track) if track.source.is_some() => MusicState::Playing,
            Some(_) => MusicState::Paused,
        }
    }

    pub fn current_track(&self) -> Option<&str> {
        self.current.as_ref().map(|track| track.track_id.as_str())
    }

    pub fn play_music(&mut self, track_id: &str, looping: bool, fade_in: Duration) {
        let Some(buffer) = self.assets.get(track_id) else {
            error!("Music track {:?} not found", track_id);
            return;
        };

        if self.current.is_some() {
            self.stop_music(Duration::ZERO);
        }

        match self.start_track(track_id, buffer, looping, fade_in) {
            Ok(track) => {
                debug!("Playing music {:?} (loop: {})", track_id, looping);
                self.current = Some(track);
                self.events.emit(AudioEvent::MusicStarted {
                    track_id: track_id.to_string(),
                });
            }
            Err(err) => error!("Failed to play music {:?}: {}", track_id, err),
        }
    }

    fn start_track(
        &self,
        track_id: &str,
        buffer: B::Buffer,
        looping: bool,
        fade_in: Duration,
    ) -> Result<MusicTrack<B::Buffer>, BackendError> {
        let target = gain_curve::to_gain(self.volume);
        let initial = if fade_in.is_zero() { target } else { 0.0 };
        let gain = create_output_gain(&*self.backend, initial)?;

        let faded_in = if fade_in.is_zero() {
            Ok(())
        } else {
            self.backend.ramp_gain(gain, target, fade_in)
        };
        let started =
            faded_in.and_then(|()| start_source(&*self.backend, &buffer, looping, gain, 0.0));
        let source = match started {
            Ok(source) => source,
            Err(err) => {
                self.backend.disconnect_gain(gain);
                return Err(err);
            }
        };

        Ok(MusicTrack {
            track_id: track_id.to_string(),
            duration: buffer.duration().as_secs_f64(),
            buffer,
            looping,
            gain,
            source: Some(source),
            start_time: self.backend.current_time(),
            pause_offset: 0.0,
            fade_out: None,
        })
    }

    pub fn pause_music(&mut self) {
        let Some(track) = self.current.as_mut() else {
            warn!("Tried to pause music, but none is playing");
            return;
        };
        let Some((source, _ended)) = track.source.take() else {
            warn!("Tried to pause music {:?}, but it is already paused", track.track_id);
            return;
        };

        let now = self.backend.current_time();
        track.pause_offset = wrap_position(now - track.start_time, track.duration);
        // units can't be paused in place, resuming creates a new one
        release_source(&*self.backend, source);

        self.events.emit(AudioEvent::MusicPaused {
            track_id: track.track_id.clone(),
            position: track.pause_offset,
        });
    }

    pub fn resume_music(&mut self) {
        let Some(track) = self.current.as_mut() else {
            warn!("Tried to resume music, but none is loaded");
            return;
        };
        if track.source.is_some() {
            warn!("Tried to resume music {:?}, but it is not paused", track.track_id);
            return;
        }

        let offset = track.pause_offset;
        match start_source(
            &*self.backend,
            &track.buffer,
            track.looping,
            track.gain,
            offset,
        ) {
            Ok(source) => {
                track.source = Some(source);
                track.start_time = self.backend.current_time() - offset;
                self.events.emit(AudioEvent::MusicResumed {
                    track_id: track.track_id.clone(),
                    position: offset,
                });
            }
            Err(err) => error!("Failed to resume music {:?}: {}", track.track_id, err),
        }
    }

    /// Stops the music, fading it out first if `fade_out` is non-zero.
    ///
    /// The stop event is sent right away, even while the fade is still audible.
    pub fn stop_music(&mut self, fade_out: Duration) {
        let Some(mut track) = self.current.take() else {
            debug!("No music to stop");
            return;
        };

        if let Some(pending) = track.fade_out.take() {
            self.timer.cancel(pending.id);
        }

        let track_id = track.track_id.clone();
        if fade_out.is_zero() {
            self.release_track(track);
        } else {
            if let Err(err) = self.backend.ramp_gain(track.gain, 0.0, fade_out) {
                warn!("Failed to fade out music {:?}: {}", track_id, err);
            }
            track.fade_out = Some(self.timer.schedule(fade_out));
            self.current = Some(track);
        }

        self.events.emit(AudioEvent::MusicStopped {
            track_id,
            fade_out,
        });
    }

    /// Fades the current track out while fading `track_id` in, both over `duration`.
    ///
    /// The two fades run independently, so both tracks are audible for the whole duration.
    pub fn crossfade_music(&mut self, track_id: &str, duration: Duration) {
        let Some(buffer) = self.assets.get(track_id) else {
            error!("Music track {:?} not found", track_id);
            return;
        };
        if let Some(current) = &self.current {
            if current.buffer.is_same(&buffer) {
                debug!("Not crossfading to {:?}: it is already playing", track_id);
                return;
            }
        }

        let from = self.current.as_ref().map(|track| track.track_id.clone());
        self.stop_music(duration);
        if let Some(outgoing) = self.current.take() {
            self.retiring.push(outgoing);
        }
        self.play_music(track_id, true, duration);

        self.events.emit(AudioEvent::MusicCrossfaded {
            from,
            to: track_id.to_string(),
            duration,
        });
    }

    /// Current playback position in seconds, wrapped to the track duration.
    pub fn music_position(&self) -> f64 {
        match &self.current {
            None => 0.0,
            Some(track) if track.source.is_some() => wrap_position(
                self.backend.current_time() - track.start_time,
                track.duration,
            ),
            Some(track) => track.pause_offset,
        }
    }

    pub fn set_music_position(&mut self, seconds: f64) {
        let Some(track) = self.current.as_mut() else {
            warn!("Tried to seek music, but none is loaded");
            return;
        };
        let position = wrap_position(seconds, track.duration);

        let Some((source, _ended)) = track.source.take() else {
            track.pause_offset = position;
            return;
        };
        release_source(&*self.backend, source);

        match start_source(
            &*self.backend,
            &track.buffer,
            track.looping,
            track.gain,
            position,
        ) {
            Ok(source) => {
                track.source = Some(source);
                track.start_time = self.backend.current_time() - position;
            }
            Err(err) => {
                error!("Failed to seek music {:?}: {}", track.track_id, err);
                track.pause_offset = position;
            }
        }
    }

    /// Sets the linear volume of the music, applied to the current track unless it is fading out.
    pub fn set_music_volume(&mut self, volume: f32) {
        self.volume = volume;
        let Some(track) = &self.current else {
            return;
        };
        if track.fade_out.is_some() {
            return;
        }
        let result = self
            .backend
            .cancel_gain_automation(track.gain)
            .and_then(|()| self.backend.set_gain(track.gain, gain_curve::to_gain(volume)));
        if let Err(err) = result {
            warn!("Failed to set music volume: {}", err);
        }
    }

    pub fn music_volume(&self) -> f32 {
        self.volume
    }

    /// Finishes elapsed fade-outs and picks up tracks that played to their end.
    pub fn update(&mut self) {
        let retiring = std::mem::take(&mut self.retiring);
        for track in retiring {
            if Self::track_finished(&track) {
                debug!("Crossfade-out of {:?} finished", track.track_id);
                self.release_track(track);
            } else {
                self.retiring.push(track);
            }
        }

        let Some(track) = &self.current else {
            return;
        };
        if !Self::track_finished(track) {
            return;
        }
        let Some(mut track) = self.current.take() else {
            return;
        };

        match track.fade_out.take() {
            Some(pending) => {
                debug!("Fade-out of {:?} finished", track.track_id);
                self.timer.cancel(pending.id);
                self.release_track(track);
            }
            None => {
                debug!("Music {:?} ended", track.track_id);
                let track_id = track.track_id.clone();
                self.release_track(track);
                self.events.emit(AudioEvent::MusicEnded { track_id });
            }
        }
    }

    fn track_finished(track: &MusicTrack<B::Buffer>) -> bool {
        let faded = track
            .fade_out
            .as_ref()
            .is_some_and(|pending| pending.fired.is_complete());
        let ended = track
            .source
            .as_ref()
            .is_some_and(|(_, ended)| ended.is_complete());
        faded || ended
    }

    fn release_track(&self, track: MusicTrack<B::Buffer>) {
        if let Some((source, _ended)) = track.source {
            release_source(&*self.backend, source);
        }
        self.backend.disconnect_gain(track.gain);
    }

    pub fn dispose(&mut self) {
        self.stop_music(Duration::ZERO);
        for track in std::mem::take(&mut self.retiring) {
            if let Some(pending) = &track.fade_out {
                self.timer.cancel(pending.id);
            }
            self.release_track(track);
        }
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;
    use crate::{
        asset::SoundBank,
        backend::{BackendCall, MockBackend, MockBuffer, SourceStatus},
        event::EventLog,
        timer::FrameTimer,
    };

    struct Fixture {
        backend: Arc<MockBackend>,
        timer: Arc<FrameTimer>,
        events: Arc<EventLog>,
        player: MusicPlayer<MockBackend>,
    }

    fn fixture() -> Fixture {
        let backend = Arc::new(MockBackend::new());
        let timer = Arc::new(FrameTimer::new());
        let events = Arc::new(EventLog::new());
        let bank = Arc::new(SoundBank::new());
        bank.insert("t1", MockBuffer::new("t1", Duration::from_secs(10)));
        bank.insert("t2", MockBuffer::new("t2", Duration::from_secs(20)));
        bank.insert("jingle", MockBuffer::new("jingle", Duration::from_secs(3)));
        let t1 = AssetLookup::get(&*bank, "t1").unwrap();
        bank.insert("t1-alias", t1);

        let player = MusicPlayer::new(
            backend.clone(),
            bank,
            timer.clone(),
            events.clone(),
            MusicSettings::default(),
        );
        Fixture {
            backend,
            timer,
            events,
            player,
        }
    }

    fn started(track: &str) -> AudioEvent {
        AudioEvent::MusicStarted {
            track_id: track.to_string(),
        }
    }

    fn stopped(track: &str, fade_out: Duration) -> AudioEvent {
        AudioEvent::MusicStopped {
            track_id: track.to_string(),
            fade_out,
        }
    }

    fn last_start(backend: &MockBackend) -> (SourceId, f64) {
        backend
            .calls()
            .into_iter()
            .rev()
            .find_map(|call| match call {
                BackendCall::Start { source, offset } => Some((source, offset)),
                _ => None,
            })
            .unwrap()
    }

    fn assert_close(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < 1e-9,
            "expected {expected}, got {actual}"
        );
    }

    #[test]
    fn pause_and_resume_keep_position() {
        let mut f = fixture();
        f.player.play_music("t1", true, Duration::ZERO);
        let (first_source, _) = last_start(&f.backend);

        f.backend.advance(Duration::from_secs(5));
        f.player.pause_music();
        assert_eq!(f.player.state(), MusicState::Paused);
        assert_close(f.player.music_position(), 5.0);
        assert_eq!(
            f.backend.source_status(first_source),
            Some(SourceStatus::Stopped)
        );

        f.backend.advance(Duration::from_secs(30));
        assert_close(f.player.music_position(), 5.0);

        f.player.resume_music();
        assert_eq!(f.player.state(), MusicState::Playing);
        let (second_source, offset) = last_start(&f.backend);
        assert_ne!(second_source, first_source);
        assert_close(offset, 5.0);
        assert_close(f.player.music_position(), 5.0);

        // wraps around the loop
        f.backend.advance(Duration::from_secs(7));
        assert_close(f.player.music_position(), 2.0);

        assert_eq!(
            f.events.names(),
            vec!["music_started", "music_paused", "music_resumed"]
        );
    }

    #[test]
    fn fade_out_stops_after_timer() {
        let mut f = fixture();
        f.player.play_music("t1", true, Duration::ZERO);
        let (source, _) = last_start(&f.backend);
        let gain = f.backend.source_gain(source).unwrap();

        f.player.stop_music(Duration::from_secs(2));
        // the event does not wait for the fade
        assert_eq!(
            f.events.events(),
            vec![started("t1"), stopped("t1", Duration::from_secs(2))]
        );
        assert!(f.backend.calls().contains(&BackendCall::RampGain {
            gain,
            value: 0.0,
            duration: Duration::from_secs(2),
        }));
        assert_eq!(f.player.state(), MusicState::Playing);

        f.timer.advance(Duration::from_millis(1999));
        f.player.update();
        assert_eq!(f.player.state(), MusicState::Playing);

        f.timer.advance(Duration::from_millis(1));
        f.player.update();
        assert_eq!(f.player.state(), MusicState::Stopped);
        assert_eq!(f.backend.source_status(source), Some(SourceStatus::Stopped));
        assert!(f.backend.is_gain_disconnected(gain));
        assert_eq!(f.events.events().len(), 2);
    }

    #[test]
    fn immediate_stop() {
        let mut f = fixture();
        f.player.play_music("t1", false, Duration::ZERO);
        f.player.stop_music(Duration::ZERO);
        assert_eq!(f.player.state(), MusicState::Stopped);
        assert!(f.backend.live_gains().is_empty());
        assert_eq!(f.timer.pending_count(), 0);
    }

    #[test]
    fn stop_retrigger_replaces_pending_fade() {
        let mut f = fixture();
        f.player.play_music("t1", true, Duration::ZERO);
        f.player.stop_music(Duration::from_secs(2));
        f.player.stop_music(Duration::from_secs(5));
        assert_eq!(f.timer.pending_count(), 1);

        f.timer.advance(Duration::from_secs(2));
        f.player.update();
        assert_eq!(f.player.state(), MusicState::Playing);

        f.timer.advance(Duration::from_secs(3));
        f.player.update();
        assert_eq!(f.player.state(), MusicState::Stopped);
    }

    #[test]
    fn fade_in_ramps_from_silence() {
        let mut f = fixture();
        f.player.play_music("t1", true, Duration::from_secs(3));
        let (source, _) = last_start(&f.backend);
        let gain = f.backend.source_gain(source).unwrap();

        let calls = f.backend.calls();
        assert!(calls.contains(&BackendCall::SetGain { gain, value: 0.0 }));
        assert!(calls.contains(&BackendCall::RampGain {
            gain,
            value: 1.0,
            duration: Duration::from_secs(3),
        }));
        f.backend.advance(Duration::from_secs(3));
        assert_eq!(f.backend.gain(gain).unwrap(), 1.0);
    }

    #[test]
    fn new_track_preempts_current() {
        let mut f = fixture();
        f.player.play_music("t1", true, Duration::ZERO);
        let (t1_source, _) = last_start(&f.backend);
        f.player.play_music("t2", true, Duration::ZERO);

        assert_eq!(f.player.current_track(), Some("t2"));
        assert_eq!(
            f.backend.source_status(t1_source),
            Some(SourceStatus::Stopped)
        );
        assert_eq!(f.backend.playing_sources().len(), 1);
        assert_eq!(
            f.events.events(),
            vec![started("t1"), stopped("t1", Duration::ZERO), started("t2")]
        );
    }

    #[test]
    fn new_track_cancels_pending_fade() {
        let mut f = fixture();
        f.player.play_music("t1", true, Duration::ZERO);
        f.player.stop_music(Duration::from_secs(2));
        f.player.play_music("t2", true, Duration::ZERO);

        assert_eq!(f.timer.pending_count(), 0);
        assert_eq!(f.backend.playing_sources().len(), 1);

        f.timer.advance(Duration::from_secs(2));
        f.player.update();
        assert_eq!(f.player.current_track(), Some("t2"));
    }

    #[test]
    fn crossfade_overlaps_both_tracks() {
        let mut f = fixture();
        f.player.play_music("t1", true, Duration::ZERO);
        let (t1_source, _) = last_start(&f.backend);

        f.player.crossfade_music("t2", Duration::from_millis(1500));
        let (t2_source, _) = last_start(&f.backend);
        assert_eq!(f.player.current_track(), Some("t2"));
        assert_eq!(f.backend.playing_sources(), vec![t1_source, t2_source]);
        assert_eq!(
            f.events.events(),
            vec![
                started("t1"),
                stopped("t1", Duration::from_millis(1500)),
                started("t2"),
                AudioEvent::MusicCrossfaded {
                    from: Some("t1".to_string()),
                    to: "t2".to_string(),
                    duration: Duration::from_millis(1500),
                },
            ]
        );

        f.timer.advance(Duration::from_millis(1500));
        f.player.update();
        assert_eq!(f.backend.playing_sources(), vec![t2_source]);
        assert_eq!(f.player.state(), MusicState::Playing);
    }

    #[test]
    fn crossfade_to_same_buffer_is_noop() {
        let mut f = fixture();
        f.player.play_music("t1", true, Duration::ZERO);
        f.player.crossfade_music("t1-alias", Duration::from_secs(1));

        assert_eq!(f.player.current_track(), Some("t1"));
        assert_eq!(f.events.names(), vec!["music_started"]);
        assert_eq!(f.timer.pending_count(), 0);
    }

    #[test]
    fn crossfade_from_silence_just_fades_in() {
        let mut f = fixture();
        f.player.crossfade_music("t2", Duration::from_secs(1));
        assert_eq!(f.player.state(), MusicState::Playing);
        assert_eq!(f.events.names(), vec!["music_started", "music_crossfaded"]);
    }

    #[test]
    fn missing_track_is_ignored() {
        let mut f = fixture();
        f.player.play_music("t1", true, Duration::ZERO);
        f.player.play_music("nope", true, Duration::ZERO);
        f.player.crossfade_music("nope", Duration::from_secs(1));

        assert_eq!(f.player.current_track(), Some("t1"));
        assert_eq!(f.events.names(), vec!["music_started"]);
    }

    #[test]
    fn invalid_transitions_do_nothing() {
        let mut f = fixture();
        f.player.pause_music();
        f.player.resume_music();
        f.player.stop_music(Duration::from_secs(1));
        assert_eq!(f.player.state(), MusicState::Stopped);

        f.player.play_music("t1", true, Duration::ZERO);
        f.player.resume_music();
        f.player.pause_music();
        f.player.pause_music();
        assert_eq!(f.player.state(), MusicState::Paused);
        assert_eq!(f.events.names(), vec!["music_started", "music_paused"]);
        assert_eq!(f.timer.pending_count(), 0);
    }

    #[test]
    fn non_looping_track_ends() {
        let mut f = fixture();
        f.player.play_music("jingle", false, Duration::ZERO);
        f.backend.advance(Duration::from_secs(3));
        f.player.update();

        assert_eq!(f.player.state(), MusicState::Stopped);
        assert!(f.backend.live_gains().is_empty());
        assert_eq!(f.events.names(), vec!["music_started", "music_ended"]);
    }

    #[test]
    fn seeking() {
        let mut f = fixture();
        f.player.play_music("t1", true, Duration::ZERO);
        f.player.set_music_position(13.0);
        let (_, offset) = last_start(&f.backend);
        assert_close(offset, 3.0);
        assert_close(f.player.music_position(), 3.0);

        f.player.pause_music();
        f.player.set_music_position(-1.0);
        assert_close(f.player.music_position(), 9.0);
        f.player.resume_music();
        assert_close(last_start(&f.backend).1, 9.0);
    }

    #[test]
    fn volume_goes_through_the_curve() {
        let mut f = fixture();
        f.player.play_music("t1", true, Duration::ZERO);
        let (source, _) = last_start(&f.backend);
        let gain = f.backend.source_gain(source).unwrap();

        f.player.set_music_volume(0.5);
        assert_eq!(f.backend.gain(gain).unwrap(), 0.25);
        assert_eq!(f.player.music_volume(), 0.5);
    }

    #[test]
    fn dispose_releases_everything() {
        let mut f = fixture();
        f.player.play_music("t1", true, Duration::ZERO);
        f.player.crossfade_music("t2", Duration::from_secs(4));
        f.player.dispose();

        assert_eq!(f.player.state(), MusicState::Stopped);
        assert!(f.backend.playing_sources().is_empty());
        assert!(f.backend.live_gains().is_empty());
        assert_eq!(f.timer.pending_count(), 0);
    }
}
