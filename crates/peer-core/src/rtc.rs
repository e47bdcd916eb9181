//! webrtc-rs backend for the [`PeerConnector`] / [`PeerLink`] seam.

use crate::config::SessionConfig;
use crate::connection::{LinkConnState, LinkEvent, PeerConnector, PeerLink};
use crate::error::PeerError;
use crate::media::{LocalStream, LocalTrack, MediaSource, TrackKind};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use webcall_signal_core::{CallType, IceCandidatePayload};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::offer_answer_options::RTCOfferOptions;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

fn engine_err(e: webrtc::Error) -> PeerError {
    PeerError::Engine(e.to_string())
}

/// Builds webrtc-rs peer connections with default codecs and interceptors.
#[derive(Debug, Clone, Default)]
pub struct RtcConnector;

impl RtcConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PeerConnector for RtcConnector {
    async fn connect(&self, config: &SessionConfig) -> Result<Box<dyn PeerLink>, PeerError> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs().map_err(engine_err)?;
        let registry =
            register_default_interceptors(Registry::new(), &mut media_engine).map_err(engine_err)?;
        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: config
                .ice_servers
                .iter()
                .map(|server| RTCIceServer {
                    urls: server.urls.clone(),
                    username: server.username.clone().unwrap_or_default(),
                    credential: server.credential.clone().unwrap_or_default(),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        };

        let pc = Arc::new(api.new_peer_connection(rtc_config).await.map_err(engine_err)?);
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let candidate_tx = events_tx.clone();
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let candidate_tx = candidate_tx.clone();
            Box::pin(async move {
                let Some(candidate) = candidate else {
                    return; // gathering finished
                };
                match candidate.to_json() {
                    Ok(init) => {
                        let _ = candidate_tx.send(LinkEvent::LocalCandidate(IceCandidatePayload {
                            candidate: init.candidate,
                            sdp_mid: init.sdp_mid,
                            sdp_mline_index: init.sdp_mline_index,
                        }));
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to serialize local candidate");
                    }
                }
            })
        }));

        let track_tx = events_tx.clone();
        pc.on_track(Box::new(
            move |track: Arc<TrackRemote>,
                  _receiver: Arc<RTCRtpReceiver>,
                  _transceiver: Arc<RTCRtpTransceiver>| {
                let kind = match track.kind() {
                    RTPCodecType::Video => TrackKind::Video,
                    _ => TrackKind::Audio,
                };
                tracing::debug!(%kind, "remote track arrived");
                let _ = track_tx.send(LinkEvent::RemoteTrack(kind));
                Box::pin(async {})
            },
        ));

        let state_tx = events_tx.clone();
        pc.on_ice_connection_state_change(Box::new(move |state: RTCIceConnectionState| {
            let mapped = match state {
                RTCIceConnectionState::Checking => LinkConnState::Connecting,
                RTCIceConnectionState::Connected | RTCIceConnectionState::Completed => {
                    LinkConnState::Connected
                }
                RTCIceConnectionState::Disconnected => LinkConnState::Disconnected,
                RTCIceConnectionState::Failed => LinkConnState::Failed,
                RTCIceConnectionState::Closed => LinkConnState::Closed,
                _ => LinkConnState::New,
            };
            let _ = state_tx.send(LinkEvent::StateChanged(mapped));
            Box::pin(async {})
        }));

        Ok(Box::new(RtcLink {
            pc,
            events: Mutex::new(Some(events_rx)),
            trickle: config.trickle_ice,
            gather_timeout: config.ice_gather_timeout,
        }))
    }
}

/// A live webrtc-rs peer connection.
pub struct RtcLink {
    pc: Arc<RTCPeerConnection>,
    events: Mutex<Option<mpsc::UnboundedReceiver<LinkEvent>>>,
    trickle: bool,
    gather_timeout: Duration,
}

impl RtcLink {
    /// Read back the local description, after an optional bounded wait for
    /// candidate gathering when trickle ICE is disabled.
    async fn local_sdp(
        &self,
        gather: Option<mpsc::Receiver<()>>,
    ) -> Result<String, PeerError> {
        if let Some(mut gather) = gather {
            // Bounded: a stuck STUN/TURN server must not wedge the offer.
            let _ = tokio::time::timeout(self.gather_timeout, gather.recv()).await;
        }
        self.pc
            .local_description()
            .await
            .map(|desc| desc.sdp)
            .ok_or_else(|| PeerError::Engine("no local description".into()))
    }

    async fn gather_watch(&self) -> Option<mpsc::Receiver<()>> {
        if self.trickle {
            None
        } else {
            Some(self.pc.gathering_complete_promise().await)
        }
    }
}

#[async_trait]
impl PeerLink for RtcLink {
    async fn add_local_track(&self, track: &LocalTrack) -> Result<(), PeerError> {
        let Some(rtp) = track.rtp() else {
            return Err(PeerError::Engine(format!(
                "{} track has no RTP source",
                track.kind()
            )));
        };
        let rtp: Arc<dyn TrackLocal + Send + Sync> = rtp.clone();
        self.pc.add_track(rtp).await.map_err(engine_err)?;
        Ok(())
    }

    async fn create_offer(&self, ice_restart: bool) -> Result<String, PeerError> {
        let gather = self.gather_watch().await;
        let options = ice_restart.then(|| RTCOfferOptions {
            ice_restart: true,
            ..Default::default()
        });
        let offer = self.pc.create_offer(options).await.map_err(engine_err)?;
        self.pc.set_local_description(offer).await.map_err(engine_err)?;
        self.local_sdp(gather).await
    }

    async fn create_answer(&self) -> Result<String, PeerError> {
        let gather = self.gather_watch().await;
        let answer = self.pc.create_answer(None).await.map_err(engine_err)?;
        self.pc.set_local_description(answer).await.map_err(engine_err)?;
        self.local_sdp(gather).await
    }

    async fn set_remote_offer(&self, sdp: &str) -> Result<(), PeerError> {
        let desc = RTCSessionDescription::offer(sdp.to_string())
            .map_err(|e| PeerError::InvalidOffer(e.to_string()))?;
        self.pc
            .set_remote_description(desc)
            .await
            .map_err(|e| PeerError::InvalidOffer(e.to_string()))
    }

    async fn set_remote_answer(&self, sdp: &str) -> Result<(), PeerError> {
        let desc = RTCSessionDescription::answer(sdp.to_string())
            .map_err(|e| PeerError::InvalidAnswer(e.to_string()))?;
        self.pc
            .set_remote_description(desc)
            .await
            .map_err(|e| PeerError::InvalidAnswer(e.to_string()))
    }

    async fn add_remote_candidate(
        &self,
        candidate: IceCandidatePayload,
    ) -> Result<(), PeerError> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            ..Default::default()
        };
        self.pc.add_ice_candidate(init).await.map_err(engine_err)
    }

    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<LinkEvent>> {
        self.events.lock().take()
    }

    async fn close(&self) {
        if let Err(e) = self.pc.close().await {
            tracing::debug!(error = %e, "peer connection close");
        }
    }
}

/// Media source producing webrtc-rs sample tracks (Opus audio, VP8 video).
///
/// The capture integration feeds samples into the returned tracks and
/// checks each track's enabled flag before writing, which is what makes the
/// mute/camera toggles take effect on the wire.
#[derive(Debug, Clone)]
pub struct RtcMediaSource {
    stream_id: String,
}

impl RtcMediaSource {
    pub fn new(stream_id: impl Into<String>) -> Self {
        Self {
            stream_id: stream_id.into(),
        }
    }
}

impl Default for RtcMediaSource {
    fn default() -> Self {
        Self::new("webcall")
    }
}

#[async_trait]
impl MediaSource for RtcMediaSource {
    async fn acquire(&self, call_type: CallType) -> Result<LocalStream, PeerError> {
        let mut tracks = Vec::new();
        let audio = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                ..Default::default()
            },
            "audio".to_owned(),
            self.stream_id.clone(),
        ));
        tracks.push(LocalTrack::with_rtp(TrackKind::Audio, audio));
        if call_type.has_video() {
            let video = Arc::new(TrackLocalStaticSample::new(
                RTCRtpCodecCapability {
                    mime_type: MIME_TYPE_VP8.to_owned(),
                    ..Default::default()
                },
                "video".to_owned(),
                self.stream_id.clone(),
            ));
            tracks.push(LocalTrack::with_rtp(TrackKind::Video, video));
        }
        Ok(LocalStream::new(tracks))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn media_source_matches_call_type() {
        let source = RtcMediaSource::default();
        let audio_only = source.acquire(CallType::Audio).await.unwrap();
        assert_eq!(audio_only.tracks().len(), 1);
        assert!(audio_only.track(TrackKind::Video).is_none());

        let video = source.acquire(CallType::Video).await.unwrap();
        assert_eq!(video.tracks().len(), 2);
        assert!(video.track(TrackKind::Video).is_some());
    }

    #[tokio::test]
    async fn connector_builds_a_link_and_creates_an_offer() {
        let connector = RtcConnector::new();
        // No ICE servers: host candidates only, no network dependency.
        let config = SessionConfig {
            ice_servers: Vec::new(),
            ..SessionConfig::default()
        };
        let link = connector.connect(&config).await.unwrap();
        let stream = RtcMediaSource::default()
            .acquire(CallType::Audio)
            .await
            .unwrap();
        for track in stream.tracks() {
            link.add_local_track(track).await.unwrap();
        }
        let sdp = link.create_offer(false).await.unwrap();
        assert!(sdp.contains("v=0"));
        link.close().await;
        link.close().await; // idempotent
    }

    #[tokio::test]
    async fn remote_candidate_without_description_is_refused() {
        let connector = RtcConnector::new();
        let config = SessionConfig {
            ice_servers: Vec::new(),
            ..SessionConfig::default()
        };
        let link = connector.connect(&config).await.unwrap();
        let result = link
            .add_remote_candidate(IceCandidatePayload {
                candidate: "candidate:1 1 UDP 2122260223 192.0.2.1 54321 typ host".into(),
                sdp_mid: Some("0".into()),
                sdp_mline_index: Some(0),
            })
            .await;
        assert!(result.is_err());
        link.close().await;
    }
}
