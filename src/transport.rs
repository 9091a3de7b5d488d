//! Contracts the core consumes from the transport and archive collaborators.
//!
//! The receive pipeline never talks to a concrete messaging library; it polls
//! a [`Subscription`] and issues replay RPCs through an [`ArchiveClient`].
//! Adapters for a real transport implement these traits; tests drive the core
//! with in-memory fakes.

use anyhow::Result;

/// Sentinel for "no position available".
pub const NULL_POSITION: i64 = -1;
/// Matches any publisher session when searching recordings.
pub const ANY_SESSION: i32 = -1;

/// One sender's stream on a destination endpoint, as seen by the transport.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImageDescriptor {
    pub session_id: i64,
    /// Position at which this image joined the stream.
    pub join_position: i64,
    /// Current consume position; monotonic within the image.
    pub position: i64,
}

/// A (possibly multi-destination) subscription.
///
/// Each handler invocation corresponds to exactly one wire message; the
/// handler receives the fragment bytes and the transport position after the
/// fragment.
pub trait Subscription {
    fn add_destination(&mut self, endpoint: &str) -> Result<()>;

    fn remove_destination(&mut self, endpoint: &str) -> Result<()>;

    /// The concrete endpoint bound for an ephemeral-port destination, once
    /// the transport has resolved it.
    fn resolved_endpoint(&self) -> Option<String>;

    /// Polls all images, up to `fragment_limit` fragments. Returns the number
    /// of fragments delivered to the handler.
    fn poll(
        &mut self,
        handler: &mut dyn FnMut(&[u8], i64),
        fragment_limit: usize,
    ) -> Result<usize>;

    /// Polls a single image, selected by session id. Returns 0 when the image
    /// does not exist (yet).
    fn poll_image(
        &mut self,
        session_id: i64,
        handler: &mut dyn FnMut(&[u8], i64),
        fragment_limit: usize,
    ) -> Result<usize>;

    fn images(&self) -> Vec<ImageDescriptor>;
}

/// Replay RPCs against the archive service. All calls may block for at most
/// one round-trip; they are only ever issued from the replay-merge thread.
pub trait ArchiveClient {
    /// Highest recording id matching the channel fragment and stream, or
    /// `None` when nothing matches.
    fn find_last_matching_recording(
        &mut self,
        min_recording_id: i64,
        channel_fragment: &str,
        stream_id: i32,
        session_id: i32,
    ) -> Result<Option<i64>>;

    /// Current (still-growing) position of a recording.
    fn recording_position(&mut self, recording_id: i64) -> Result<i64>;

    /// Starts replaying `[start_position, start_position + length)` into the
    /// destination endpoint. Returns the replay session id.
    fn start_replay(
        &mut self,
        recording_id: i64,
        start_position: i64,
        length: i64,
        dest_endpoint: &str,
        dest_stream_id: i32,
    ) -> Result<i64>;

    fn stop_replay(&mut self, replay_session_id: i64) -> Result<()>;
}
