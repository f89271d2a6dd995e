//! Fire-and-forget lifecycle announcements.

use std::time::Duration;

use parking_lot::Mutex;

#[derive(Debug, Clone, PartialEq, strum::IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum AudioEvent {
    MusicStarted {
        track_id: String,
    },
    MusicPaused {
        track_id: String,
        position: f64,
    },
    MusicResumed {
        track_id: String,
        position: f64,
    },
    /// Sent as soon as the stop is requested, not when the fade-out has finished.
    MusicStopped {
        track_id: String,
        fade_out: Duration,
    },
    MusicCrossfaded {
        from: Option<String>,
        to: String,
        duration: Duration,
    },
    /// A non-looping track played to its end.
    MusicEnded {
        track_id: String,
    },
    VoiceStarted {
        voice_id: String,
    },
    VoiceEnded {
        voice_id: String,
    },
}

impl AudioEvent {
    pub fn name(&self) -> &'static str {
        self.into()
    }
}

pub trait EventSink {
    fn emit(&self, event: AudioEvent);
}

impl<F: Fn(AudioEvent)> EventSink for F {
    fn emit(&self, event: AudioEvent) {
        self(event)
    }
}

/// Records every event it receives.
#[derive(Default)]
pub struct EventLog {
    events: Mutex<Vec<AudioEvent>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AudioEvent> {
        self.events.lock().clone()
    }

    pub fn take(&self) -> Vec<AudioEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.events.lock().iter().map(AudioEvent::name).collect()
    }
}

impl EventSink for EventLog {
    fn emit(&self, event: AudioEvent) {
        self.events.lock().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_snake_case() {
        let event = AudioEvent::MusicStarted {
            track_id: "title".to_string(),
        };
        assert_eq!(event.name(), "music_started");
        assert_eq!(
            AudioEvent::VoiceEnded {
                voice_id: "v01".to_string()
            }
            .name(),
            "voice_ended"
        );
    }

    #[test]
    fn closures_are_sinks() {
        let log = EventLog::new();
        let forward = |event: AudioEvent| log.emit(event);
        forward.emit(AudioEvent::VoiceStarted {
            voice_id: "v01".to_string(),
        });
        assert_eq!(log.names(), vec!["voice_started"]);
        assert_eq!(log.take().len(), 1);
        assert!(log.events().is_empty());
    }
}
