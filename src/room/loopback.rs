//! In-process loopback room
//!
//! [`LoopbackRoom`] implements [`AvatarRoom`] without any media transport:
//! whatever the avatar is asked to say is echoed back as a burst of
//! `aiavatar-*` events, split into word fragments. It backs the CLI's offline
//! mode and drives end-to-end tests of the session controller.
//!
//! [`LoopbackProvisioner`] mints session descriptors locally so an offline
//! session never touches the network.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{
    AvatarRoom, JoinOptions, RoomConnector, RoomError, RoomEvent, RoomHandle, SpeakInput,
    SpeakRequest,
};
use crate::error::{AvatalkError, Result};
use crate::provisioning::{Provisioner, SessionDescriptor, SessionRequest};

/// Default delay between echoed fragments
pub const DEFAULT_FRAGMENT_DELAY: Duration = Duration::from_millis(30);

#[derive(Debug)]
struct Utterance {
    id: u64,
    cancel: CancellationToken,
    disable_interrupt: bool,
}

#[derive(Debug, Default)]
struct LoopbackState {
    joined: Option<JoinOptions>,
    user_audio_muted: bool,
    microphone_denied: bool,
    left: bool,
    speaking: Option<Utterance>,
    next_utterance: u64,
}

impl LoopbackState {
    /// Cancel the current utterance and announce its end
    ///
    /// Runs under the state lock so the stop event is queued before anything
    /// the next utterance sends.
    fn end_utterance(&mut self, events_tx: &mpsc::UnboundedSender<RoomEvent>) {
        if let Some(utterance) = self.speaking.take() {
            utterance.cancel.cancel();
            let _ = events_tx.send(RoomEvent::AvatarStopSpeaking);
        }
    }
}

/// Room that echoes speak requests back as avatar events
#[derive(Debug)]
pub struct LoopbackRoom {
    events_tx: mpsc::UnboundedSender<RoomEvent>,
    state: Arc<Mutex<LoopbackState>>,
    fragment_delay: Duration,
}

fn lock(state: &Mutex<LoopbackState>) -> MutexGuard<'_, LoopbackState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Split text into word fragments, keeping whitespace attached
///
/// Concatenating the fragments yields `text` again.
pub fn word_fragments(text: &str) -> Vec<String> {
    text.split_inclusive(' ').map(str::to_string).collect()
}

impl LoopbackRoom {
    /// Create a room and the receiver for its events
    pub fn new(fragment_delay: Duration) -> (Self, mpsc::UnboundedReceiver<RoomEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let room = Self {
            events_tx,
            state: Arc::new(Mutex::new(LoopbackState {
                user_audio_muted: true,
                ..LoopbackState::default()
            })),
            fragment_delay,
        };
        (room, events_rx)
    }

    /// Inject an arbitrary event, e.g. simulated speech-to-text data or an error
    pub fn emit(&self, event: RoomEvent) {
        let _ = self.events_tx.send(event);
    }

    /// Options the room was joined with, if joined
    pub fn joined_with(&self) -> Option<JoinOptions> {
        lock(&self.state).joined.clone()
    }

    /// Whether the simulated microphone is muted
    pub fn is_user_audio_muted(&self) -> bool {
        lock(&self.state).user_audio_muted
    }

    /// Whether an utterance is in progress
    pub fn is_speaking(&self) -> bool {
        lock(&self.state).speaking.is_some()
    }

    /// Whether `leave` has been called on this room
    pub fn has_left(&self) -> bool {
        lock(&self.state).left
    }

    /// Simulate a microphone the user has not granted access to
    ///
    /// While denied, `unmute_user_audio` fails and the mute state is kept.
    pub fn deny_microphone(&self, denied: bool) {
        lock(&self.state).microphone_denied = denied;
    }

    fn require_joined(&self) -> Result<MutexGuard<'_, LoopbackState>> {
        let state = lock(&self.state);
        if state.joined.is_none() {
            return Err(AvatalkError::NotInitialized.into());
        }
        Ok(state)
    }
}

#[async_trait::async_trait]
impl AvatarRoom for LoopbackRoom {
    async fn join(&self, options: JoinOptions) -> Result<()> {
        if options.token.is_empty() {
            return Err(AvatalkError::Room {
                code: "INVALID_TOKEN".to_string(),
                message: "empty access token".to_string(),
            }
            .into());
        }
        {
            let mut state = lock(&self.state);
            state.user_audio_muted = !options.unmute_user_audio_on_joined;
            state.joined = Some(options);
        }
        tracing::debug!("Loopback room joined");
        self.emit(RoomEvent::Joined);
        Ok(())
    }

    async fn leave(&self) -> Result<()> {
        {
            let mut state = lock(&self.state);
            state.end_utterance(&self.events_tx);
            state.joined = None;
            state.left = true;
        }
        self.emit(RoomEvent::Left);
        Ok(())
    }

    async fn speak(&self, request: SpeakRequest) -> Result<()> {
        let (id, cancel) = {
            let mut state = self.require_joined()?;
            if let Some(current) = state.speaking.as_ref() {
                if current.disable_interrupt {
                    tracing::debug!("Avatar is speaking uninterruptibly, request dropped");
                    return Ok(());
                }
            }
            state.end_utterance(&self.events_tx);
            state.next_utterance += 1;
            let id = state.next_utterance;
            let cancel = CancellationToken::new();
            state.speaking = Some(Utterance {
                id,
                cancel: cancel.clone(),
                disable_interrupt: request.disable_interrupt,
            });
            let _ = self.events_tx.send(RoomEvent::AvatarStartSpeaking);
            (id, cancel)
        };

        let events_tx = self.events_tx.clone();
        let state = Arc::clone(&self.state);
        let delay = self.fragment_delay;

        tokio::spawn(async move {
            let mut chunks = match request.input {
                SpeakInput::Text(text) => futures::stream::iter(word_fragments(&text)).boxed(),
                SpeakInput::Stream(stream) => stream,
            };
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    next = chunks.next() => match next {
                        Some(text) => {
                            let guard = lock(&state);
                            if guard.speaking.as_ref().map(|u| u.id) != Some(id) {
                                break;
                            }
                            let _ = events_tx.send(RoomEvent::AvatarMessage { text });
                        }
                        None => break,
                    },
                }
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            // An interrupted utterance was already ended by whoever replaced it.
            let mut state = lock(&state);
            if state.speaking.as_ref().map(|u| u.id) == Some(id) {
                state.end_utterance(&events_tx);
            }
        });
        Ok(())
    }

    async fn stop_speaking(&self) -> Result<()> {
        let mut state = self.require_joined()?;
        let protected = state.speaking.as_ref().map(|u| u.disable_interrupt);
        match protected {
            Some(true) => tracing::debug!("Stop ignored for uninterruptible utterance"),
            Some(false) => state.end_utterance(&self.events_tx),
            None => {}
        }
        Ok(())
    }

    async fn mute_user_audio(&self) -> Result<()> {
        let mut state = self.require_joined()?;
        state.user_audio_muted = true;
        Ok(())
    }

    async fn unmute_user_audio(&self) -> Result<()> {
        let mut state = self.require_joined()?;
        if state.microphone_denied {
            return Err(AvatalkError::Room {
                code: "MICROPHONE_UNAVAILABLE".to_string(),
                message: "microphone access denied".to_string(),
            }
            .into());
        }
        state.user_audio_muted = false;
        Ok(())
    }
}

/// Connector producing [`LoopbackRoom`]s
///
/// The most recently created room is kept so callers (the CLI, tests) can
/// inject events or inspect its state.
#[derive(Debug, Default)]
pub struct LoopbackConnector {
    fragment_delay: Option<Duration>,
    last_room: Mutex<Option<Arc<LoopbackRoom>>>,
    fail_with: Mutex<Option<RoomError>>,
}

impl LoopbackConnector {
    /// Connector with a custom fragment delay
    pub fn with_fragment_delay(fragment_delay: Duration) -> Self {
        Self {
            fragment_delay: Some(fragment_delay),
            ..Self::default()
        }
    }

    /// Make the next `connect` fail with `error`
    pub fn fail_next(&self, error: RoomError) {
        *self
            .fail_with
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(error);
    }

    /// The room created by the latest successful `connect`
    pub fn last_room(&self) -> Option<Arc<LoopbackRoom>> {
        self.last_room
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait::async_trait]
impl RoomConnector for LoopbackConnector {
    async fn connect(&self, server_url: &str) -> Result<RoomHandle> {
        let failure = self
            .fail_with
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(error) = failure {
            return Err(AvatalkError::Room {
                code: error.code,
                message: error.message.unwrap_or_default(),
            }
            .into());
        }

        tracing::debug!(server_url, "Creating loopback room");
        let (room, events) =
            LoopbackRoom::new(self.fragment_delay.unwrap_or(DEFAULT_FRAGMENT_DELAY));
        let room = Arc::new(room);
        *self
            .last_room
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&room));
        Ok(RoomHandle { room, events })
    }
}

/// Provisioner that mints descriptors locally
#[derive(Debug, Default)]
pub struct LoopbackProvisioner;

#[async_trait::async_trait]
impl Provisioner for LoopbackProvisioner {
    async fn request_session(&self, request: &SessionRequest) -> Result<SessionDescriptor> {
        tracing::debug!(avatar_id = %request.avatar_id, "Minting loopback session");
        Ok(SessionDescriptor {
            token: uuid::Uuid::new_v4().to_string(),
            session_id: uuid::Uuid::new_v4().to_string(),
            stream_id: uuid::Uuid::new_v4().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> JoinOptions {
        JoinOptions {
            session_id: "s".to_string(),
            token: "t".to_string(),
            stream_id: "x".to_string(),
            unmute_user_audio_on_joined: true,
            stt_language: "ko".to_string(),
        }
    }

    async fn drain(rx: &mut mpsc::UnboundedReceiver<RoomEvent>) -> Vec<RoomEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_fragments_keep_whitespace() {
        assert_eq!(word_fragments("a b  c"), vec!["a ", "b ", " ", "c"]);
        assert_eq!(word_fragments("a b  c").concat(), "a b  c");
    }

    #[tokio::test(start_paused = true)]
    async fn test_speak_echoes_fragments() {
        let (room, mut rx) = LoopbackRoom::new(Duration::from_millis(10));
        room.join(options()).await.unwrap();
        room.speak(SpeakRequest::text("hello there")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        let events = drain(&mut rx).await;
        assert_eq!(
            events,
            vec![
                RoomEvent::Joined,
                RoomEvent::AvatarStartSpeaking,
                RoomEvent::AvatarMessage {
                    text: "hello ".to_string()
                },
                RoomEvent::AvatarMessage {
                    text: "there".to_string()
                },
                RoomEvent::AvatarStopSpeaking,
            ]
        );
        assert!(!room.is_speaking());
    }

    #[tokio::test(start_paused = true)]
    async fn test_speak_stream_forwards_chunks() {
        let (room, mut rx) = LoopbackRoom::new(Duration::from_millis(10));
        room.join(options()).await.unwrap();
        let chunks = futures::stream::iter(vec!["a".to_string(), "b".to_string()]).boxed();
        room.speak(SpeakRequest::stream(chunks)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        let texts: Vec<String> = drain(&mut rx)
            .await
            .into_iter()
            .filter_map(|e| match e {
                RoomEvent::AvatarMessage { text } => Some(text),
                _ => None,
            })
            .collect();
        assert_eq!(texts, vec!["a", "b"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disable_interrupt_protects_utterance() {
        let (room, mut rx) = LoopbackRoom::new(Duration::from_millis(10));
        room.join(options()).await.unwrap();
        room.speak(SpeakRequest::text("one two three").with_disable_interrupt(true))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        room.speak(SpeakRequest::text("other")).await.unwrap();
        room.stop_speaking().await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        let texts: String = drain(&mut rx)
            .await
            .into_iter()
            .filter_map(|e| match e {
                RoomEvent::AvatarMessage { text } => Some(text),
                _ => None,
            })
            .collect();
        assert_eq!(texts, "one two three");
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_speaking_interrupts() {
        let (room, mut rx) = LoopbackRoom::new(Duration::from_millis(50));
        room.join(options()).await.unwrap();
        room.speak(SpeakRequest::text("one two three four"))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        room.stop_speaking().await.unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;

        let events = drain(&mut rx).await;
        let fragments = events
            .iter()
            .filter(|e| matches!(e, RoomEvent::AvatarMessage { .. }))
            .count();
        assert!(fragments < 4);
        assert_eq!(events.last(), Some(&RoomEvent::AvatarStopSpeaking));
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupting_speak_ends_previous_utterance_first() {
        let (room, mut rx) = LoopbackRoom::new(Duration::from_millis(10));
        room.join(options()).await.unwrap();
        room.speak(SpeakRequest::text("one two three")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        room.speak(SpeakRequest::text("four five")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        let message = |text: &str| RoomEvent::AvatarMessage {
            text: text.to_string(),
        };
        assert_eq!(
            drain(&mut rx).await,
            vec![
                RoomEvent::Joined,
                RoomEvent::AvatarStartSpeaking,
                message("one "),
                RoomEvent::AvatarStopSpeaking,
                RoomEvent::AvatarStartSpeaking,
                message("four "),
                message("five"),
                RoomEvent::AvatarStopSpeaking,
            ]
        );
    }

    #[tokio::test]
    async fn test_denied_microphone_keeps_mute() {
        let (room, _rx) = LoopbackRoom::new(DEFAULT_FRAGMENT_DELAY);
        let mut opts = options();
        opts.unmute_user_audio_on_joined = false;
        room.join(opts).await.unwrap();

        room.deny_microphone(true);
        assert!(room.unmute_user_audio().await.is_err());
        assert!(room.is_user_audio_muted());

        room.deny_microphone(false);
        room.unmute_user_audio().await.unwrap();
        assert!(!room.is_user_audio_muted());
    }

    #[tokio::test]
    async fn test_leave_ends_utterance_before_left() {
        let (room, mut rx) = LoopbackRoom::new(Duration::from_millis(50));
        room.join(options()).await.unwrap();
        room.speak(SpeakRequest::text("a b c")).await.unwrap();
        room.leave().await.unwrap();

        let events = drain(&mut rx).await;
        assert!(room.has_left());
        assert_eq!(
            &events[events.len() - 2..],
            &[RoomEvent::AvatarStopSpeaking, RoomEvent::Left]
        );
    }

    #[tokio::test]
    async fn test_controls_require_join() {
        let (room, _rx) = LoopbackRoom::new(DEFAULT_FRAGMENT_DELAY);
        let err = room.speak(SpeakRequest::text("x")).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<AvatalkError>(),
            Some(AvatalkError::NotInitialized)
        ));
        assert!(room.mute_user_audio().await.is_err());
    }

    #[tokio::test]
    async fn test_mute_state_follows_join_options() {
        let (room, _rx) = LoopbackRoom::new(DEFAULT_FRAGMENT_DELAY);
        let mut opts = options();
        opts.unmute_user_audio_on_joined = false;
        room.join(opts).await.unwrap();
        assert!(room.is_user_audio_muted());

        room.unmute_user_audio().await.unwrap();
        assert!(!room.is_user_audio_muted());
    }

    #[tokio::test]
    async fn test_connector_failure_is_one_shot() {
        let connector = LoopbackConnector::default();
        connector.fail_next(RoomError::new(RoomError::AVATAR_CONNECTION_FAILED, "down"));
        assert!(connector.connect("loopback://").await.is_err());
        assert!(connector.connect("loopback://").await.is_ok());
        assert!(connector.last_room().is_some());
    }
}
