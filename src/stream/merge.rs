use std::time::{Duration, Instant};

use anyhow::Result;

use crate::transport::{ArchiveClient, ImageDescriptor, Subscription, ANY_SESSION};

pub const DEFAULT_MERGE_PROGRESS_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_CATCHUP_EPSILON: i64 = 0;

/// Replay-merge lifecycle. Linear except for the two terminal states.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MergeState {
    ResolveReplayPort,
    GetRecordingPosition,
    Replay,
    Catchup,
    AttemptLiveJoin,
    Merged,
    Failed,
}

#[derive(Clone, Debug)]
pub struct MergeConfig {
    /// Endpoint the archive replays into (may use an ephemeral port).
    pub replay_endpoint: String,
    /// Endpoint of the live stream.
    pub live_endpoint: String,
    pub stream_id: i32,
    /// Maximum wall time allowed between any two state changes.
    pub progress_timeout: Duration,
    /// How close (in transport bytes) the replay must get to the recording
    /// position before the live destination is added.
    pub catchup_epsilon: i64,
}

impl MergeConfig {
    pub fn new(replay_endpoint: impl Into<String>, live_endpoint: impl Into<String>, stream_id: i32) -> Self {
        Self {
            replay_endpoint: replay_endpoint.into(),
            live_endpoint: live_endpoint.into(),
            stream_id,
            progress_timeout: DEFAULT_MERGE_PROGRESS_TIMEOUT,
            catchup_epsilon: DEFAULT_CATCHUP_EPSILON,
        }
    }
}

/// Merges a historical replay into the live stream on one logical
/// subscription, with no duplicated delivery at the boundary.
///
/// The engine owns the subscription and the archive client for the duration
/// of the merge; on `Merged` the caller takes them back via [`into_parts`]
/// and continues live-only. On `Failed` the replay session has already been
/// stopped (best effort) and the caller may retry or fall back to live.
///
/// [`into_parts`]: ReplayMerge::into_parts
pub struct ReplayMerge<S: Subscription, A: ArchiveClient> {
    subscription: S,
    archive: A,
    config: MergeConfig,
    recording_id: i64,
    start_position: i64,
    state: MergeState,
    /// Recording position P captured in GET_RECORDING_POSITION.
    target_position: i64,
    replay_session_id: Option<i64>,
    resolved_replay_endpoint: Option<String>,
    /// Highest replay position consumed by the receive path.
    consumed_position: i64,
    last_progress: Instant,
    failure: Option<&'static str>,
    boundary_gap: Option<(i64, i64)>,
}

impl<S: Subscription, A: ArchiveClient> ReplayMerge<S, A> {
    /// Starts a merge for `recording_id` at `start_position`. The replay
    /// destination is added to the subscription immediately; everything else
    /// happens incrementally in [`poll`](Self::poll).
    pub fn new(
        mut subscription: S,
        archive: A,
        recording_id: i64,
        start_position: i64,
        config: MergeConfig,
    ) -> Result<Self> {
        subscription.add_destination(&config.replay_endpoint)?;
        Ok(Self {
            subscription,
            archive,
            config,
            recording_id,
            start_position,
            state: MergeState::ResolveReplayPort,
            target_position: 0,
            replay_session_id: None,
            resolved_replay_endpoint: None,
            consumed_position: start_position,
            last_progress: Instant::now(),
            failure: None,
            boundary_gap: None,
        })
    }

    pub fn state(&self) -> MergeState {
        self.state
    }

    pub fn is_merged(&self) -> bool {
        self.state == MergeState::Merged
    }

    pub fn has_failed(&self) -> bool {
        self.state == MergeState::Failed
    }

    pub fn failure(&self) -> Option<&'static str> {
        self.failure
    }

    /// Transport-position gap observed at the replay/live boundary, if any.
    /// Sequence-level recovery is owned by the receive path.
    pub fn boundary_gap(&self) -> Option<(i64, i64)> {
        self.boundary_gap
    }

    /// Advances the state machine and polls the active image. Fragments are
    /// handed to `handler` exactly as a live subscription would.
    pub fn poll(
        &mut self,
        handler: &mut dyn FnMut(&[u8], i64),
        fragment_limit: usize,
    ) -> Result<usize> {
        self.do_work();

        let fragments = match (self.state, self.replay_session_id) {
            (MergeState::Merged, _) => self.subscription.poll(handler, fragment_limit)?,
            (MergeState::Failed, _) => 0,
            (_, Some(session_id)) => {
                let consumed = &mut self.consumed_position;
                let count = self.subscription.poll_image(
                    session_id,
                    &mut |fragment, position| {
                        *consumed = position;
                        handler(fragment, position);
                    },
                    fragment_limit,
                )?;
                count
            }
            _ => 0,
        };

        if fragments > 0 {
            self.last_progress = Instant::now();
        }
        Ok(fragments)
    }

    /// Releases the subscription and archive client. Meaningful once merged;
    /// also usable after failure to recover the collaborators.
    pub fn into_parts(self) -> (S, A) {
        (self.subscription, self.archive)
    }

    fn do_work(&mut self) {
        match self.state {
            MergeState::Merged | MergeState::Failed => return,
            _ => {}
        }

        if self.last_progress.elapsed() > self.config.progress_timeout {
            self.fail("merge progress timeout");
            return;
        }

        match self.state {
            MergeState::ResolveReplayPort => self.resolve_replay_port(),
            MergeState::GetRecordingPosition => self.get_recording_position(),
            MergeState::Replay => self.start_or_await_replay(),
            MergeState::Catchup => self.catchup(),
            MergeState::AttemptLiveJoin => self.attempt_live_join(),
            MergeState::Merged | MergeState::Failed => {}
        }
    }

    fn resolve_replay_port(&mut self) {
        if let Some(endpoint) = self.subscription.resolved_endpoint() {
            self.resolved_replay_endpoint = Some(endpoint);
            self.transition(MergeState::GetRecordingPosition);
        }
    }

    fn get_recording_position(&mut self) {
        match self.archive.recording_position(self.recording_id) {
            Ok(position) => {
                self.target_position = position;
                self.transition(MergeState::Replay);
            }
            Err(err) => {
                log::warn!("recording position query failed: {err}");
                self.fail("recording position query failed");
            }
        }
    }

    fn start_or_await_replay(&mut self) {
        if self.replay_session_id.is_none() {
            let endpoint = match &self.resolved_replay_endpoint {
                Some(endpoint) => endpoint.clone(),
                None => {
                    self.fail("replay endpoint not resolved");
                    return;
                }
            };
            let length = (self.target_position - self.start_position).max(0);
            match self.archive.start_replay(
                self.recording_id,
                self.start_position,
                length,
                &endpoint,
                self.config.stream_id,
            ) {
                Ok(session_id) => self.replay_session_id = Some(session_id),
                Err(err) => {
                    log::warn!("start replay failed: {err}");
                    self.fail("start replay failed");
                    return;
                }
            }
        }

        if self.replay_image().is_some() {
            self.transition(MergeState::Catchup);
        }
    }

    fn catchup(&mut self) {
        if self.consumed_position >= self.target_position - self.config.catchup_epsilon {
            if let Err(err) = self.subscription.add_destination(&self.config.live_endpoint) {
                log::warn!("adding live destination failed: {err}");
                self.fail("adding live destination failed");
                return;
            }
            self.transition(MergeState::AttemptLiveJoin);
        }
    }

    fn attempt_live_join(&mut self) {
        let Some(live) = self.live_image() else {
            return;
        };

        if live.join_position <= self.consumed_position {
            self.finish_merge();
            return;
        }

        // The replay can still cover the remainder; refresh the target so the
        // replay image keeps draining toward the live join point.
        match self.archive.recording_position(self.recording_id) {
            Ok(position) => self.target_position = position,
            Err(err) => {
                log::warn!("recording position refresh failed: {err}");
                self.fail("recording position refresh failed");
                return;
            }
        }

        if self.consumed_position >= self.target_position && live.join_position > self.consumed_position {
            // Live joined strictly above the replay end: report the hole and
            // merge anyway; sequence-gap recovery owns the missing range.
            log::warn!(
                "replay/live boundary gap: replay ended at {}, live joined at {}",
                self.consumed_position,
                live.join_position
            );
            self.boundary_gap = Some((self.consumed_position, live.join_position));
            self.finish_merge();
        }
    }

    fn finish_merge(&mut self) {
        if let Some(session_id) = self.replay_session_id.take() {
            if let Err(err) = self.archive.stop_replay(session_id) {
                log::warn!("stop replay failed: {err}");
            }
        }
        if let Err(err) = self
            .subscription
            .remove_destination(&self.config.replay_endpoint)
        {
            log::warn!("removing replay destination failed: {err}");
        }
        self.transition(MergeState::Merged);
    }

    fn fail(&mut self, reason: &'static str) {
        if let Some(session_id) = self.replay_session_id.take() {
            let _ = self.archive.stop_replay(session_id);
        }
        self.failure = Some(reason);
        self.state = MergeState::Failed;
    }

    fn transition(&mut self, next: MergeState) {
        self.state = next;
        self.last_progress = Instant::now();
    }

    fn replay_image(&self) -> Option<ImageDescriptor> {
        let session_id = self.replay_session_id?;
        self.subscription
            .images()
            .into_iter()
            .find(|image| image.session_id == session_id)
    }

    fn live_image(&self) -> Option<ImageDescriptor> {
        let replay_session = self.replay_session_id?;
        self.subscription
            .images()
            .into_iter()
            .filter(|image| image.session_id != replay_session)
            .min_by_key(|image| image.join_position)
    }
}

/// Finds the most recent recording for a channel/stream, or `None` when the
/// archive has nothing to offer and the caller should fall back to live-only.
pub fn find_latest_recording<A: ArchiveClient>(
    archive: &mut A,
    channel_fragment: &str,
    stream_id: i32,
) -> Result<Option<i64>> {
    archive.find_last_matching_recording(0, channel_fragment, stream_id, ANY_SESSION)
}
