//! Local and remote media stream ownership.
//!
//! A session exclusively owns its [`LocalStream`]: every track is stopped on
//! teardown, and the mute/camera toggles flip per-track enabled flags. The
//! [`RemoteStream`] is populated by the engine and read-only from the
//! session's side.

use crate::error::PeerError;
use async_trait::async_trait;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use webcall_signal_core::CallType;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

/// Kind of a media track.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq)]
pub enum TrackKind {
    Audio,
    Video,
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackKind::Audio => write!(f, "audio"),
            TrackKind::Video => write!(f, "video"),
        }
    }
}

/// A locally captured track.
///
/// The `enabled` flag mirrors the UI's mute/camera-off toggles; the capture
/// integration feeding samples into the RTP track checks it before writing.
/// `stop` is idempotent and final.
#[derive(Clone)]
pub struct LocalTrack {
    kind: TrackKind,
    enabled: Arc<AtomicBool>,
    stopped: Arc<AtomicBool>,
    rtp: Option<Arc<TrackLocalStaticSample>>,
}

impl LocalTrack {
    /// Track without an RTP source; used by media backends that register
    /// tracks with the engine themselves, and by test doubles.
    pub fn new(kind: TrackKind) -> Self {
        Self {
            kind,
            enabled: Arc::new(AtomicBool::new(true)),
            stopped: Arc::new(AtomicBool::new(false)),
            rtp: None,
        }
    }

    /// Track backed by a webrtc-rs sample track.
    pub fn with_rtp(kind: TrackKind, rtp: Arc<TrackLocalStaticSample>) -> Self {
        Self {
            rtp: Some(rtp),
            ..Self::new(kind)
        }
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    /// Flip the enabled flag; returns the new enabled state.
    pub fn toggle(&self) -> bool {
        // fetch_xor returns the previous value
        !self.enabled.fetch_xor(true, Ordering::SeqCst)
    }

    /// Stop the track. Idempotent; a stopped track is never re-enabled.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.enabled.store(false, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn rtp(&self) -> Option<&Arc<TrackLocalStaticSample>> {
        self.rtp.as_ref()
    }
}

impl fmt::Debug for LocalTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalTrack")
            .field("kind", &self.kind)
            .field("enabled", &self.is_enabled())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

/// The set of local tracks owned by one session.
#[derive(Debug, Clone, Default)]
pub struct LocalStream {
    tracks: Vec<LocalTrack>,
}

impl LocalStream {
    pub fn new(tracks: Vec<LocalTrack>) -> Self {
        Self { tracks }
    }

    pub fn tracks(&self) -> &[LocalTrack] {
        &self.tracks
    }

    /// First track of the given kind.
    pub fn track(&self, kind: TrackKind) -> Option<&LocalTrack> {
        self.tracks.iter().find(|t| t.kind() == kind)
    }

    /// Flip the first track of `kind` and return the new *disabled* state
    /// (`true` means muted / camera off). No-op returning `false` when no
    /// such track exists.
    pub fn toggle(&self, kind: TrackKind) -> bool {
        match self.track(kind) {
            Some(track) => !track.toggle(),
            None => false,
        }
    }

    /// Stop every track. Per-track and infallible, so one track can never
    /// prevent the rest from stopping.
    pub fn stop_all(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }

    /// Number of tracks not yet stopped.
    pub fn live_track_count(&self) -> usize {
        self.tracks.iter().filter(|t| !t.is_stopped()).count()
    }
}

/// Read-only view of the tracks the remote side has delivered so far.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RemoteStream {
    kinds: Vec<TrackKind>,
}

impl RemoteStream {
    pub fn add_track(&mut self, kind: TrackKind) {
        if !self.kinds.contains(&kind) {
            self.kinds.push(kind);
        }
    }

    pub fn has_track(&self, kind: TrackKind) -> bool {
        self.kinds.contains(&kind)
    }

    pub fn track_count(&self) -> usize {
        self.kinds.len()
    }
}

/// Local media acquisition.
///
/// Acquisition has no timeout by design: a pending permission prompt may
/// hang indefinitely, and the session stays responsive around it.
#[async_trait]
pub trait MediaSource: Send + Sync {
    /// Acquire microphone (and camera, for video calls) tracks.
    ///
    /// Fails with [`PeerError::MediaAcquisition`] when permission is denied
    /// or no device is available.
    async fn acquire(&self, call_type: CallType) -> Result<LocalStream, PeerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn audio_video_stream() -> LocalStream {
        LocalStream::new(vec![
            LocalTrack::new(TrackKind::Audio),
            LocalTrack::new(TrackKind::Video),
        ])
    }

    #[test]
    fn toggle_twice_restores_original_state() {
        let stream = audio_video_stream();
        assert!(stream.track(TrackKind::Audio).unwrap().is_enabled());
        assert!(stream.toggle(TrackKind::Audio)); // now muted
        assert!(!stream.toggle(TrackKind::Audio)); // back on
        assert!(stream.track(TrackKind::Audio).unwrap().is_enabled());
    }

    #[test]
    fn toggle_without_matching_track_is_a_noop() {
        let stream = LocalStream::new(vec![LocalTrack::new(TrackKind::Audio)]);
        assert!(!stream.toggle(TrackKind::Video));
        let empty = LocalStream::default();
        assert!(!empty.toggle(TrackKind::Audio));
    }

    #[test]
    fn stop_all_stops_every_track_and_is_idempotent() {
        let stream = audio_video_stream();
        assert_eq!(stream.live_track_count(), 2);
        stream.stop_all();
        assert_eq!(stream.live_track_count(), 0);
        stream.stop_all();
        assert_eq!(stream.live_track_count(), 0);
        assert!(!stream.track(TrackKind::Audio).unwrap().is_enabled());
    }

    #[test]
    fn remote_stream_dedupes_track_kinds() {
        let mut remote = RemoteStream::default();
        remote.add_track(TrackKind::Audio);
        remote.add_track(TrackKind::Audio);
        remote.add_track(TrackKind::Video);
        assert_eq!(remote.track_count(), 2);
        assert!(remote.has_track(TrackKind::Video));
    }
}
