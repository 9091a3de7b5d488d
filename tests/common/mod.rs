//! In-memory transport and archive fakes used by the integration tests.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{anyhow, Result};
use sekr::transport::{ArchiveClient, ImageDescriptor, Subscription};
use sekr::wire::{self, MessageHeader, MessageType, HEADER_SIZE};

pub const FRAME_BYTES: i64 = 64;

/// Builds one wire frame. `position` bookkeeping in the fakes assumes every
/// frame advances the stream by `FRAME_BYTES`.
pub fn frame(seq: u64, payload: &[u8], with_checksum: bool) -> Vec<u8> {
    typed_frame(seq, MessageType::Test.as_u16(), payload, with_checksum)
}

/// Like [`frame`] but with an explicit `message_type` on the wire.
pub fn typed_frame(seq: u64, message_type: u16, payload: &[u8], with_checksum: bool) -> Vec<u8> {
    let mut header = MessageHeader {
        version: 1,
        message_type,
        sequence_number: seq,
        event_time_ns: 10 + seq,
        publish_time_ns: 100 + seq,
        message_length: (HEADER_SIZE + payload.len()) as u32,
        publisher_id: 1,
        session_id: 0xA11CE,
        ..MessageHeader::default()
    };
    header.set_magic();
    if with_checksum {
        header.flags = wire::FLAG_CHECKSUM_ENABLED;
        header.checksum = wire::compute_crc(&header, payload);
    }
    let mut bytes = header.to_bytes().to_vec();
    bytes.extend_from_slice(payload);
    bytes
}

struct FakeImage {
    session_id: i64,
    destination: String,
    join_position: i64,
    position: i64,
    fragments: VecDeque<(Vec<u8>, i64)>,
}

#[derive(Default)]
struct SubState {
    destinations: Vec<String>,
    resolved_endpoint: Option<String>,
    images: Vec<FakeImage>,
    /// Images that appear once their destination is added.
    pending: Vec<FakeImage>,
}

/// Cheap cloneable handle; tests keep one clone to feed fragments while the
/// session owns another.
#[derive(Clone)]
pub struct FakeSubscription {
    state: Arc<Mutex<SubState>>,
}

impl Default for FakeSubscription {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeSubscription {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SubState::default())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SubState> {
        self.state.lock().expect("fake subscription lock")
    }

    pub fn set_resolved_endpoint(&self, endpoint: &str) {
        self.lock().resolved_endpoint = Some(endpoint.to_string());
    }

    /// Creates a live image immediately.
    pub fn add_image(&self, session_id: i64, destination: &str, join_position: i64) {
        self.lock().images.push(FakeImage {
            session_id,
            destination: destination.to_string(),
            join_position,
            position: join_position,
            fragments: VecDeque::new(),
        });
    }

    /// Stages an image that only materializes once `destination` is added to
    /// the subscription.
    pub fn stage_image(&self, session_id: i64, destination: &str, join_position: i64) {
        self.lock().pending.push(FakeImage {
            session_id,
            destination: destination.to_string(),
            join_position,
            position: join_position,
            fragments: VecDeque::new(),
        });
    }

    /// Appends a fragment to an image. `end_position` is the transport
    /// position after the fragment.
    pub fn push_fragment(&self, session_id: i64, bytes: Vec<u8>, end_position: i64) {
        let mut guard = self.lock();
        let state = &mut *guard;
        let image = state
            .images
            .iter_mut()
            .chain(state.pending.iter_mut())
            .find(|image| image.session_id == session_id)
            .expect("unknown fake image");
        image.fragments.push_back((bytes, end_position));
    }

    pub fn has_destination(&self, endpoint: &str) -> bool {
        self.lock().destinations.iter().any(|d| d == endpoint)
    }
}

impl Subscription for FakeSubscription {
    fn add_destination(&mut self, endpoint: &str) -> Result<()> {
        let mut state = self.lock();
        state.destinations.push(endpoint.to_string());
        let mut activated: Vec<FakeImage> = Vec::new();
        let mut remaining: Vec<FakeImage> = Vec::new();
        for image in state.pending.drain(..) {
            if image.destination == endpoint {
                activated.push(image);
            } else {
                remaining.push(image);
            }
        }
        state.pending = remaining;
        state.images.extend(activated);
        Ok(())
    }

    fn remove_destination(&mut self, endpoint: &str) -> Result<()> {
        let mut state = self.lock();
        state.destinations.retain(|d| d != endpoint);
        state.images.retain(|image| image.destination != endpoint);
        Ok(())
    }

    fn resolved_endpoint(&self) -> Option<String> {
        self.lock().resolved_endpoint.clone()
    }

    fn poll(
        &mut self,
        handler: &mut dyn FnMut(&[u8], i64),
        fragment_limit: usize,
    ) -> Result<usize> {
        let mut state = self.lock();
        let mut delivered = 0;
        for image in state.images.iter_mut() {
            while delivered < fragment_limit {
                let Some((bytes, end_position)) = image.fragments.pop_front() else {
                    break;
                };
                image.position = end_position;
                handler(&bytes, end_position);
                delivered += 1;
            }
        }
        Ok(delivered)
    }

    fn poll_image(
        &mut self,
        session_id: i64,
        handler: &mut dyn FnMut(&[u8], i64),
        fragment_limit: usize,
    ) -> Result<usize> {
        let mut state = self.lock();
        let Some(image) = state
            .images
            .iter_mut()
            .find(|image| image.session_id == session_id)
        else {
            return Ok(0);
        };
        let mut delivered = 0;
        while delivered < fragment_limit {
            let Some((bytes, end_position)) = image.fragments.pop_front() else {
                break;
            };
            image.position = end_position;
            handler(&bytes, end_position);
            delivered += 1;
        }
        Ok(delivered)
    }

    fn images(&self) -> Vec<ImageDescriptor> {
        self.lock()
            .images
            .iter()
            .map(|image| ImageDescriptor {
                session_id: image.session_id,
                join_position: image.join_position,
                position: image.position,
            })
            .collect()
    }
}

pub struct Recording {
    pub id: i64,
    pub channel: String,
    pub stream_id: i32,
    /// (frame bytes, end position) in stream order.
    pub frames: Vec<(Vec<u8>, i64)>,
    pub position: i64,
}

#[derive(Default)]
struct ArchState {
    recordings: Vec<Recording>,
    replay_requests: Vec<(i64, i64, i64)>,
    stopped_sessions: Vec<i64>,
    next_session_id: i64,
    fail_position_queries: bool,
    suppress_replay_image: bool,
}

/// Archive fake that "replays" recorded frames into a fresh image on the
/// subscription it is bound to.
#[derive(Clone)]
pub struct FakeArchive {
    state: Arc<Mutex<ArchState>>,
    subscription: FakeSubscription,
}

impl FakeArchive {
    pub fn new(subscription: FakeSubscription) -> Self {
        Self {
            state: Arc::new(Mutex::new(ArchState {
                next_session_id: 1000,
                ..ArchState::default()
            })),
            subscription,
        }
    }

    fn lock(&self) -> MutexGuard<'_, ArchState> {
        self.state.lock().expect("fake archive lock")
    }

    pub fn add_recording(&self, recording: Recording) {
        self.lock().recordings.push(recording);
    }

    pub fn fail_position_queries(&self) {
        self.lock().fail_position_queries = true;
    }

    /// Makes start_replay succeed without ever producing a replay image.
    pub fn suppress_replay_image(&self) {
        self.lock().suppress_replay_image = true;
    }

    pub fn replay_requests(&self) -> Vec<(i64, i64, i64)> {
        self.lock().replay_requests.clone()
    }

    pub fn stopped_sessions(&self) -> Vec<i64> {
        self.lock().stopped_sessions.clone()
    }
}

impl ArchiveClient for FakeArchive {
    fn find_last_matching_recording(
        &mut self,
        min_recording_id: i64,
        channel_fragment: &str,
        stream_id: i32,
        _session_id: i32,
    ) -> Result<Option<i64>> {
        Ok(self
            .lock()
            .recordings
            .iter()
            .filter(|rec| {
                rec.id >= min_recording_id
                    && rec.stream_id == stream_id
                    && rec.channel.contains(channel_fragment)
            })
            .map(|rec| rec.id)
            .max())
    }

    fn recording_position(&mut self, recording_id: i64) -> Result<i64> {
        let state = self.lock();
        if state.fail_position_queries {
            return Err(anyhow!("archive unavailable"));
        }
        state
            .recordings
            .iter()
            .find(|rec| rec.id == recording_id)
            .map(|rec| rec.position)
            .ok_or_else(|| anyhow!("unknown recording {recording_id}"))
    }

    fn start_replay(
        &mut self,
        recording_id: i64,
        start_position: i64,
        length: i64,
        dest_endpoint: &str,
        _dest_stream_id: i32,
    ) -> Result<i64> {
        let mut state = self.lock();
        let session_id = state.next_session_id;
        state.next_session_id += 1;
        state
            .replay_requests
            .push((recording_id, start_position, length));

        if state.suppress_replay_image {
            return Ok(session_id);
        }

        let recording = state
            .recordings
            .iter()
            .find(|rec| rec.id == recording_id)
            .ok_or_else(|| anyhow!("unknown recording {recording_id}"))?;
        let frames: Vec<(Vec<u8>, i64)> = recording
            .frames
            .iter()
            .filter(|(_, end_position)| {
                *end_position > start_position && *end_position <= start_position + length
            })
            .cloned()
            .collect();
        drop(state);

        self.subscription
            .add_image(session_id, dest_endpoint, start_position);
        for (bytes, end_position) in frames {
            self.subscription
                .push_fragment(session_id, bytes, end_position);
        }
        Ok(session_id)
    }

    fn stop_replay(&mut self, replay_session_id: i64) -> Result<()> {
        self.lock().stopped_sessions.push(replay_session_id);
        Ok(())
    }
}
