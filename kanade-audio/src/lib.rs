//! Audio playback core of the Kanade engine.
//!
//! Turns "play this sound" requests into bounded use of a small number of backend voices:
//! - [`ChainPool`] plays sound effects, reusing gain chains per sound and stealing the oldest
//!   voice once the budget is exhausted
//! - [`MusicPlayer`] drives a single streaming track through play/pause/resume/stop/crossfade
//! - [`VoicePlayer`] plays unpooled voice lines
//!
//! The players never block and never fail loudly: missing assets and backend hiccups are logged
//! and the request is dropped. Completions are polled from `update`, once per frame.

pub mod asset;
pub mod automation;
pub mod backend;
pub mod chain_pool;
pub mod completion;
pub mod config;
pub mod event;
pub mod gain_curve;
pub mod manager;
pub mod music_player;
pub mod timer;
pub mod voice_player;

pub use asset::{AssetLookup, SoundBank};
pub use backend::{AudioBackend, BackendError, DecodedBuffer, GainId, SourceId};
pub use chain_pool::{ChainId, ChainPool};
pub use config::{AudioSettings, EffectsSettings, MusicSettings};
pub use event::{AudioEvent, EventLog, EventSink};
pub use manager::AudioManager;
pub use music_player::{MusicPlayer, MusicState};
pub use timer::{FrameTimer, Timer};
pub use voice_player::{VoiceHandle, VoicePlayer};
