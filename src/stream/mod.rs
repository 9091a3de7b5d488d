use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{anyhow, Result};

use crate::core::clock::{Clock, MonotonicClock};
use crate::core::Error;
use crate::receiver::{Receiver, DEFAULT_FRAGMENT_LIMIT};
use crate::transport::{ArchiveClient, Subscription};

pub mod merge;

pub use merge::{
    find_latest_recording, MergeConfig, MergeState, ReplayMerge, DEFAULT_MERGE_PROGRESS_TIMEOUT,
};

const IDLE_SLEEP: Duration = Duration::from_millis(1);

/// Where the receive thread's fragments come from. Variants instead of
/// dynamic dispatch keep the receive loop monomorphic.
pub enum SubscriptionSource<S: Subscription, A: ArchiveClient> {
    LiveOnly(S),
    Merging(ReplayMerge<S, A>),
    ReplayOnly(S),
}

impl<S: Subscription, A: ArchiveClient> SubscriptionSource<S, A> {
    pub fn poll(
        &mut self,
        handler: &mut dyn FnMut(&[u8], i64),
        fragment_limit: usize,
    ) -> Result<usize> {
        match self {
            SubscriptionSource::LiveOnly(sub) | SubscriptionSource::ReplayOnly(sub) => {
                sub.poll(handler, fragment_limit)
            }
            SubscriptionSource::Merging(merge) => merge.poll(handler, fragment_limit),
        }
    }
}

/// One receiver instance bound to its fragment source.
///
/// Owns the receive fast path and the subscription (directly, or through a
/// replay merge during startup-with-history). When a merge completes the
/// subscription transfers back to the live-only path and the archive client
/// is parked for later use.
pub struct Session<S: Subscription, A: ArchiveClient, C: Clock = MonotonicClock> {
    source: Option<SubscriptionSource<S, A>>,
    idle_archive: Option<A>,
    receiver: Receiver<C>,
    fragment_limit: usize,
}

impl<S: Subscription, A: ArchiveClient, C: Clock> Session<S, A, C> {
    /// Live-only session: every fragment comes from the live subscription.
    pub fn live(subscription: S, receiver: Receiver<C>) -> Self {
        Self {
            source: Some(SubscriptionSource::LiveOnly(subscription)),
            idle_archive: None,
            receiver,
            fragment_limit: DEFAULT_FRAGMENT_LIMIT,
        }
    }

    /// Replay-only session, e.g. for offline reprocessing of a recording.
    pub fn replay_only(subscription: S, receiver: Receiver<C>) -> Self {
        Self {
            source: Some(SubscriptionSource::ReplayOnly(subscription)),
            idle_archive: None,
            receiver,
            fragment_limit: DEFAULT_FRAGMENT_LIMIT,
        }
    }

    /// Starts with history: replays `recording_id` from `start_position`,
    /// then hands over to live seamlessly.
    pub fn replay_merge(
        subscription: S,
        archive: A,
        recording_id: i64,
        start_position: i64,
        config: MergeConfig,
        mut receiver: Receiver<C>,
    ) -> Result<Self> {
        let merge = ReplayMerge::new(subscription, archive, recording_id, start_position, config)?;
        receiver.set_merging(true);
        Ok(Self {
            source: Some(SubscriptionSource::Merging(merge)),
            idle_archive: None,
            receiver,
            fragment_limit: DEFAULT_FRAGMENT_LIMIT,
        })
    }

    /// Auto-discovers the latest recording for the channel and merges from
    /// it; falls back to live-only when the archive has no recording.
    pub fn replay_merge_auto(
        subscription: S,
        mut archive: A,
        channel_fragment: &str,
        start_position: i64,
        config: MergeConfig,
        receiver: Receiver<C>,
    ) -> Result<Self> {
        match find_latest_recording(&mut archive, channel_fragment, config.stream_id)? {
            Some(recording_id) => Self::replay_merge(
                subscription,
                archive,
                recording_id,
                start_position,
                config,
                receiver,
            ),
            None => {
                log::info!("no recording found for '{channel_fragment}'; starting live-only");
                let mut session = Self::live(subscription, receiver);
                session.idle_archive = Some(archive);
                Ok(session)
            }
        }
    }

    pub fn set_fragment_limit(&mut self, fragment_limit: usize) {
        self.fragment_limit = fragment_limit;
    }

    pub fn receiver(&self) -> &Receiver<C> {
        &self.receiver
    }

    pub fn receiver_mut(&mut self) -> &mut Receiver<C> {
        &mut self.receiver
    }

    pub fn is_merging(&self) -> bool {
        matches!(self.source, Some(SubscriptionSource::Merging(_)))
    }

    pub fn merge_state(&self) -> Option<MergeState> {
        match &self.source {
            Some(SubscriptionSource::Merging(merge)) => Some(merge.state()),
            _ => None,
        }
    }

    /// Polls the active source once, feeding fragments to the fast path.
    /// Returns the number of fragments consumed. A failed merge surfaces as
    /// an error on every poll until [`fall_back_to_live`](Self::fall_back_to_live)
    /// is called.
    pub fn poll_once(&mut self) -> Result<usize> {
        let source = self
            .source
            .as_mut()
            .ok_or_else(|| anyhow!("session has no active source"))?;
        let receiver = &mut self.receiver;
        let fragments = source.poll(
            &mut |fragment, position| receiver.on_fragment(fragment, position),
            self.fragment_limit,
        )?;
        self.after_poll()?;
        Ok(fragments)
    }

    /// Polls until `running` is cleared, idling briefly on empty polls.
    pub fn run(&mut self, running: &AtomicBool) -> Result<()> {
        while running.load(Ordering::Acquire) {
            if self.poll_once()? == 0 {
                std::thread::sleep(IDLE_SLEEP);
            }
        }
        Ok(())
    }

    /// After a failed merge, recovers the subscription and continues
    /// live-only. Returns false when there was no failed merge to unwind.
    pub fn fall_back_to_live(&mut self) -> bool {
        let failed = matches!(&self.source, Some(SubscriptionSource::Merging(m)) if m.has_failed());
        if !failed {
            return false;
        }
        if let Some(SubscriptionSource::Merging(merge)) = self.source.take() {
            let (subscription, archive) = merge.into_parts();
            self.idle_archive = Some(archive);
            self.source = Some(SubscriptionSource::LiveOnly(subscription));
            self.receiver.set_merging(false);
        }
        true
    }

    /// Takes back the archive client once the merge no longer owns it, e.g.
    /// to issue gap-recovery replays.
    pub fn take_archive(&mut self) -> Option<A> {
        self.idle_archive.take()
    }

    /// Dismantles the session, returning the subscription if one is held.
    pub fn into_subscription(mut self) -> Option<S> {
        match self.source.take() {
            Some(SubscriptionSource::LiveOnly(sub))
            | Some(SubscriptionSource::ReplayOnly(sub)) => Some(sub),
            Some(SubscriptionSource::Merging(merge)) => Some(merge.into_parts().0),
            None => None,
        }
    }

    fn after_poll(&mut self) -> Result<()> {
        let merged = matches!(&self.source, Some(SubscriptionSource::Merging(m)) if m.is_merged());
        if merged {
            if let Some(SubscriptionSource::Merging(merge)) = self.source.take() {
                let (subscription, archive) = merge.into_parts();
                self.idle_archive = Some(archive);
                self.source = Some(SubscriptionSource::LiveOnly(subscription));
                self.receiver.set_merging(false);
                log::info!("replay merge complete; continuing live-only");
            }
            return Ok(());
        }

        let failure = match &self.source {
            Some(SubscriptionSource::Merging(m)) if m.has_failed() => {
                Some(m.failure().unwrap_or("replay merge failed"))
            }
            _ => None,
        };
        if let Some(reason) = failure {
            return Err(anyhow::Error::new(Error::ReplayMergeFailed(reason)));
        }
        Ok(())
    }
}
