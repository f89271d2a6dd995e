//! The capability interface the players drive.
//!
//! A backend exposes two kinds of node: single-use playable units ([`SourceId`]), each bound to
//! one decoded buffer, and persistent gain handles ([`GainId`]) that sit between a unit and the
//! output bus. Backends are shared between the players, so every method takes `&self`.

mod mock;

use std::{fmt, time::Duration};

use snafu::Snafu;

use crate::completion::Completion;

pub use mock::{BackendCall, MockBackend, MockBuffer, SourceStatus};

/// A handle to a single-use playable unit.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(pub u64);

impl fmt::Debug for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "source#{}", self.0)
    }
}

/// A handle to a persistent gain node.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GainId(pub u64);

impl fmt::Debug for GainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gain#{}", self.0)
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum BackendError {
    #[snafu(display("Playable unit {id:?} was already stopped"))]
    AlreadyStopped { id: SourceId },
    #[snafu(display("Unknown playable unit {id:?}"))]
    UnknownSource { id: SourceId },
    #[snafu(display("Unknown gain handle {id:?}"))]
    UnknownGain { id: GainId },
    #[snafu(display("Could not allocate a {what}: {message}"))]
    Allocation { what: &'static str, message: String },
}

/// An opaque decoded buffer as produced by the asset collaborator.
pub trait DecodedBuffer: Clone {
    fn duration(&self) -> Duration;

    /// Whether both handles refer to the same decoded data.
    fn is_same(&self, other: &Self) -> bool;
}

pub trait AudioBackend {
    type Buffer: DecodedBuffer + 'static;

    /// Current backend time, in seconds.
    fn current_time(&self) -> f64;

    fn create_source(&self, buffer: &Self::Buffer, looping: bool)
    -> Result<SourceId, BackendError>;
    fn create_gain(&self) -> Result<GainId, BackendError>;

    fn connect(&self, source: SourceId, gain: GainId) -> Result<(), BackendError>;
    fn connect_output(&self, gain: GainId) -> Result<(), BackendError>;
    /// Releases the unit for good. It must not be used afterwards.
    fn disconnect_source(&self, source: SourceId);
    /// Releases the gain handle for good. It must not be used afterwards.
    fn disconnect_gain(&self, gain: GainId);

    /// Starts playback `offset` seconds into the buffer.
    ///
    /// The returned completion resolves once, when the unit ends naturally or is stopped.
    fn start(&self, source: SourceId, offset: f64) -> Result<Completion, BackendError>;
    fn stop(&self, source: SourceId) -> Result<(), BackendError>;

    fn gain(&self, gain: GainId) -> Result<f32, BackendError>;
    fn set_gain(&self, gain: GainId, value: f32) -> Result<(), BackendError>;
    /// Linearly ramps the gain to `value`, starting now.
    fn ramp_gain(&self, gain: GainId, value: f32, duration: Duration) -> Result<(), BackendError>;
    /// Drops any scheduled change, holding the current value.
    fn cancel_gain_automation(&self, gain: GainId) -> Result<(), BackendError>;

    /// Lets the backend deliver completions it learns about by polling.
    fn update(&self) {}
}

/// Stops a unit, treating "already stopped" as success.
pub(crate) fn stop_quietly<B: AudioBackend + ?Sized>(backend: &B, source: SourceId) {
    if let Err(err) = backend.stop(source) {
        tracing::trace!("Ignoring stop failure: {}", err);
    }
}

/// Stops a unit and releases it.
pub(crate) fn release_source<B: AudioBackend + ?Sized>(backend: &B, source: SourceId) {
    stop_quietly(backend, source);
    backend.disconnect_source(source);
}

/// Creates a gain handle wired into the output bus.
pub(crate) fn create_output_gain<B: AudioBackend + ?Sized>(
    backend: &B,
    value: f32,
) -> Result<GainId, BackendError> {
    let gain = backend.create_gain()?;
    let wired = backend
        .set_gain(gain, value)
        .and_then(|()| backend.connect_output(gain));
    if let Err(err) = wired {
        backend.disconnect_gain(gain);
        return Err(err);
    }
    Ok(gain)
}

/// Creates a playable unit for `buffer` and wires it into `gain`.
pub(crate) fn create_wired_source<B: AudioBackend + ?Sized>(
    backend: &B,
    buffer: &B::Buffer,
    looping: bool,
    gain: GainId,
) -> Result<SourceId, BackendError> {
    let source = backend.create_source(buffer, looping)?;
    if let Err(err) = backend.connect(source, gain) {
        backend.disconnect_source(source);
        return Err(err);
    }
    Ok(source)
}
