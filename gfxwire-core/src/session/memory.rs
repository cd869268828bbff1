//! An in-process [`SessionHandle`] fed by the caller.
//!
//! Useful for driving the pipeline without an engine: tests, demos and
//! replaying captured event streams. Events and audio frames are queued
//! with the `push_*` methods; `poll` blocks until something is queued,
//! the session fails, or the timeout passes.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::{Condvar, Mutex};

use super::{AudioBufferStats, AudioFormat, BufferRelease, CodecId, Event, ExternalBuffer, SessionHandle};
use crate::error::SessionError;
use crate::wire::FrameAck;

#[derive(Default)]
struct State {
    events: VecDeque<Event>,
    audio: VecDeque<Bytes>,
    audio_format: Option<AudioFormat>,
    audio_stats: Option<AudioBufferStats>,
    pending_audio_errors: usize,
    pending_poll_errors: usize,
    failure: Option<String>,
    codec: Option<CodecId>,
    acks: Vec<FrameAck>,
}

#[derive(Default)]
struct ReleaseLog {
    released: Mutex<Vec<u64>>,
}

impl BufferRelease for ReleaseLog {
    fn release(&self, id: u64) {
        self.released.lock().push(id);
    }
}

/// Scriptable in-memory session.
#[derive(Default)]
pub struct MemorySession {
    state: Mutex<State>,
    wake: Condvar,
    releases: Arc<ReleaseLog>,
    next_buffer_id: AtomicU64,
    issued: AtomicUsize,
    polls: AtomicUsize,
    disconnects: AtomicUsize,
}

impl MemorySession {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Scripting ────────────────────────────────────────────────

    pub fn push_event(&self, event: Event) {
        self.state.lock().events.push_back(event);
        self.wake.notify_all();
    }

    pub fn push_events(&self, events: impl IntoIterator<Item = Event>) {
        self.state.lock().events.extend(events);
        self.wake.notify_all();
    }

    pub fn push_audio(&self, frame: impl Into<Bytes>) {
        self.state.lock().audio.push_back(frame.into());
        self.wake.notify_all();
    }

    pub fn set_audio_format(&self, format: AudioFormat) {
        self.state.lock().audio_format = Some(format);
    }

    pub fn set_audio_stats(&self, stats: AudioBufferStats) {
        self.state.lock().audio_stats = Some(stats);
    }

    /// The next `count` audio reads fail with a transient error.
    pub fn fail_audio_reads(&self, count: usize) {
        self.state.lock().pending_audio_errors = count;
    }

    /// The next `count` polls fail with a transient error.
    pub fn fail_polls(&self, count: usize) {
        self.state.lock().pending_poll_errors = count;
    }

    pub fn set_active_codec(&self, codec: CodecId) {
        self.state.lock().codec = Some(codec);
    }

    /// Every later `poll` fails fatally with `reason`.
    pub fn fail(&self, reason: impl Into<String>) {
        self.state.lock().failure = Some(reason.into());
        self.wake.notify_all();
    }

    /// A payload owned by this session, released back on drop.
    pub fn buffer(&self, data: impl Into<Bytes>) -> ExternalBuffer {
        let id = self.next_buffer_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.issued.fetch_add(1, Ordering::Relaxed);
        ExternalBuffer::new(id, data.into(), self.releases.clone())
    }

    // ── Inspection ───────────────────────────────────────────────

    pub fn acks(&self) -> Vec<FrameAck> {
        self.state.lock().acks.clone()
    }

    pub fn released_buffers(&self) -> Vec<u64> {
        self.releases.released.lock().clone()
    }

    /// Buffers handed out and not yet released.
    pub fn outstanding_buffers(&self) -> usize {
        self.issued.load(Ordering::Relaxed) - self.releases.released.lock().len()
    }

    pub fn pending_events(&self) -> usize {
        self.state.lock().events.len()
    }

    pub fn poll_count(&self) -> usize {
        self.polls.load(Ordering::Relaxed)
    }

    pub fn disconnect_count(&self) -> usize {
        self.disconnects.load(Ordering::Relaxed)
    }
}

impl SessionHandle for MemorySession {
    fn poll(&self, timeout: Duration) -> Result<(), SessionError> {
        self.polls.fetch_add(1, Ordering::Relaxed);
        let mut state = self.state.lock();
        if state.pending_poll_errors > 0 {
            state.pending_poll_errors -= 1;
            return Err(SessionError::Transient("poll interrupted".into()));
        }
        if state.failure.is_none() && state.events.is_empty() {
            self.wake.wait_for(&mut state, timeout);
        }
        match &state.failure {
            Some(reason) => Err(SessionError::Fatal(reason.clone())),
            None => Ok(()),
        }
    }

    fn has_events(&self) -> bool {
        !self.state.lock().events.is_empty()
    }

    fn next_event(&self) -> Option<Event> {
        self.state.lock().events.pop_front()
    }

    fn last_error(&self) -> Option<String> {
        self.state.lock().failure.clone()
    }

    fn send_frame_ack(&self, ack: &FrameAck) -> Result<(), SessionError> {
        self.state.lock().acks.push(*ack);
        Ok(())
    }

    fn active_codec(&self) -> Option<CodecId> {
        self.state.lock().codec
    }

    fn has_audio(&self) -> bool {
        let state = self.state.lock();
        !state.audio.is_empty() || state.pending_audio_errors > 0
    }

    fn audio_format(&self) -> Option<AudioFormat> {
        self.state.lock().audio_format
    }

    fn read_audio_frame(&self, buf: &mut [u8]) -> Result<usize, SessionError> {
        let mut state = self.state.lock();
        if state.pending_audio_errors > 0 {
            state.pending_audio_errors -= 1;
            return Err(SessionError::Transient("audio read failed".into()));
        }
        let Some(frame) = state.audio.front() else {
            return Ok(0);
        };
        if frame.len() > buf.len() {
            return Err(SessionError::BufferTooSmall {
                needed: frame.len(),
            });
        }
        let len = frame.len();
        buf[..len].copy_from_slice(frame);
        state.audio.pop_front();
        Ok(len)
    }

    fn audio_stats(&self) -> Option<AudioBufferStats> {
        self.state.lock().audio_stats
    }

    fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::Relaxed);
        // Queued events still own engine buffers; drop them here.
        let mut state = self.state.lock();
        state.events.clear();
        state.audio.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Rect;

    #[test]
    fn events_drain_in_push_order() {
        let session = MemorySession::new();
        session.push_events([
            Event::StartFrame { frame_id: 1 },
            Event::EndFrame { frame_id: 1 },
        ]);
        assert!(session.has_events());
        assert!(matches!(session.next_event(), Some(Event::StartFrame { frame_id: 1 })));
        assert!(matches!(session.next_event(), Some(Event::EndFrame { frame_id: 1 })));
        assert!(session.next_event().is_none());
    }

    #[test]
    fn poll_reports_failure() {
        let session = MemorySession::new();
        assert!(session.poll(Duration::from_millis(1)).is_ok());
        session.fail("remote closed");
        let err = session.poll(Duration::from_millis(1)).unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(session.last_error().as_deref(), Some("remote closed"));
    }

    #[test]
    fn buffers_are_tracked() {
        let session = MemorySession::new();
        let a = session.buffer(&b"aa"[..]);
        let b = session.buffer(&b"bb"[..]);
        assert_eq!(session.outstanding_buffers(), 2);
        drop(b);
        drop(a);
        assert_eq!(session.released_buffers(), vec![2, 1]);
        assert_eq!(session.outstanding_buffers(), 0);
    }

    #[test]
    fn audio_read_respects_buffer_size() {
        let session = MemorySession::new();
        session.push_audio(vec![1u8; 8]);
        let mut small = [0u8; 4];
        assert_eq!(
            session.read_audio_frame(&mut small),
            Err(SessionError::BufferTooSmall { needed: 8 })
        );
        let mut big = [0u8; 16];
        assert_eq!(session.read_audio_frame(&mut big), Ok(8));
        assert!(!session.has_audio());
    }

    #[test]
    fn disconnect_releases_queued_payloads() {
        let session = MemorySession::new();
        let payload = session.buffer(&b"webp"[..]);
        session.push_event(Event::WebpTile {
            frame_id: 1,
            surface_id: 1,
            rect: Rect::new(0, 0, 4, 4),
            payload: Some(payload),
        });
        session.disconnect();
        assert_eq!(session.outstanding_buffers(), 0);
        assert_eq!(session.disconnect_count(), 1);
    }
}
