//! Media return path
//!
//! Agent speech produced by the voice-AI provider travels back to the caller
//! through the [`MediaBridge`]. The telephony socket for a call attaches a
//! bounded receiver; relaying never blocks and drops frames when the socket
//! falls behind.

use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, trace};

use crate::types::CallId;

/// Frame written to a call's telephony leg
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaFrame {
    /// Agent audio in the call's media format
    Audio(Bytes),
    /// Discard audio queued on the telephony side (caller barged in)
    Clear,
}

struct Route {
    id: u64,
    tx: mpsc::Sender<MediaFrame>,
}

/// Receiving end of one telephony leg's attachment
#[derive(Debug)]
pub struct MediaAttachment {
    call_id: CallId,
    id: u64,
    frames: mpsc::Receiver<MediaFrame>,
}

impl MediaAttachment {
    pub fn call_id(&self) -> &CallId {
        &self.call_id
    }

    /// Next frame, or `None` once the attachment was dropped by the bridge
    pub async fn recv(&mut self) -> Option<MediaFrame> {
        self.frames.recv().await
    }
}

pub struct MediaBridge {
    capacity: usize,
    routes: DashMap<CallId, Route>,
    next_id: AtomicU64,
    dropped: AtomicU64,
}

impl MediaBridge {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            routes: DashMap::new(),
            next_id: AtomicU64::new(1),
            dropped: AtomicU64::new(0),
        }
    }

    /// Attach the telephony leg of a call.
    ///
    /// Returns `None` while another leg is attached to the same call; the
    /// existing attachment is left untouched. A leg whose receiver is gone
    /// is replaced.
    pub fn attach(&self, call_id: &CallId) -> Option<MediaAttachment> {
        let (tx, frames) = mpsc::channel(self.capacity);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        match self.routes.entry(call_id.clone()) {
            Entry::Occupied(mut entry) => {
                if !entry.get().tx.is_closed() {
                    debug!("Call {} already has a media leg attached", call_id);
                    return None;
                }
                entry.insert(Route { id, tx });
            }
            Entry::Vacant(entry) => {
                entry.insert(Route { id, tx });
            }
        }
        Some(MediaAttachment {
            call_id: call_id.clone(),
            id,
            frames,
        })
    }

    /// Best-effort delivery. Returns false when nothing is attached, the
    /// receiver is gone, or the buffer is full.
    pub fn relay(&self, call_id: &CallId, frame: MediaFrame) -> bool {
        let result = match self.routes.get(call_id) {
            Some(route) => route.tx.try_send(frame),
            None => return false,
        };
        match result {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                trace!("Media bridge full for call {}, dropping frame", call_id);
                false
            }
            Err(TrySendError::Closed(_)) => {
                self.routes.remove_if(call_id, |_, route| route.tx.is_closed());
                false
            }
        }
    }

    pub fn relay_audio(&self, call_id: &CallId, audio: Bytes) -> bool {
        self.relay(call_id, MediaFrame::Audio(audio))
    }

    pub fn relay_clear(&self, call_id: &CallId) -> bool {
        self.relay(call_id, MediaFrame::Clear)
    }

    /// Drop whatever is attached to the call; its receiver sees end-of-stream
    pub fn detach(&self, call_id: &CallId) -> bool {
        self.routes.remove(call_id).is_some()
    }

    /// Drop `attachment`'s route if it is still the one attached to its call
    pub fn release(&self, attachment: &MediaAttachment) -> bool {
        self.routes
            .remove_if(&attachment.call_id, |_, route| route.id == attachment.id)
            .is_some()
    }

    pub fn is_attached(&self, call_id: &CallId) -> bool {
        self.routes.contains_key(call_id)
    }

    /// Frames dropped because a receiver fell behind
    pub fn dropped_frames(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
