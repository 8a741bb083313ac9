//! Avatar session controller
//!
//! [`AvatarSession`] orchestrates one avatar conversation: it provisions a
//! session descriptor, creates and joins a room, dispatches room events to
//! the renderer and to caller callbacks, and exposes the session actions
//! (speak, stop, mute, unmute, leave).
//!
//! State machine:
//!
//! ```text
//! Idle --join--> Joining --ok--> Joined --Left event--> Disconnected
//!                   |                 \--leave()-----> Idle
//!                   \--error--> Idle
//! ```
//!
//! Callbacks live in a replaceable slot that is read when each event is
//! delivered, so replacing them takes effect without re-registering anything
//! on the room.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::{AvatalkError, Result};
use crate::message::{merge_transcript, ChatMessage};
use crate::provisioning::{Provisioner, SessionDescriptor, SessionRequest};
use crate::renderer::{RenderMode, Renderer};
use crate::room::{
    AvatarRoom, JoinOptions, RoomConnector, RoomError, RoomEvent, SpeakRequest, SttEventType,
};

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// No room; `join` may be called
    #[default]
    Idle,
    /// Provisioning or joining is in progress
    Joining,
    /// The room is joined
    Joined,
    /// The room reported that the session ended
    Disconnected,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Joining => "joining",
            SessionState::Joined => "joined",
            SessionState::Disconnected => "disconnected",
        };
        f.write_str(name)
    }
}

/// Callback without arguments
pub type EventCallback = Arc<dyn Fn() + Send + Sync>;
/// Callback receiving text
pub type TextCallback = Arc<dyn Fn(&str) + Send + Sync>;
/// Callback receiving a room error
pub type ErrorCallback = Arc<dyn Fn(&RoomError) + Send + Sync>;

/// Optional caller hooks for session events
///
/// Every hook is optional. Hooks run on the event dispatch task and should
/// return quickly.
#[derive(Clone, Default)]
pub struct SessionCallbacks {
    /// Room joined
    pub on_joined: Option<EventCallback>,
    /// Session ended
    pub on_left: Option<EventCallback>,
    /// Avatar started speaking
    pub on_avatar_start_speaking: Option<EventCallback>,
    /// Avatar stopped speaking
    pub on_avatar_stop_speaking: Option<EventCallback>,
    /// Raw avatar message fragment
    pub on_avatar_message: Option<TextCallback>,
    /// User voice activity started
    pub on_user_start_speaking: Option<EventCallback>,
    /// User voice activity ended
    pub on_user_stop_speaking: Option<EventCallback>,
    /// Final user transcript
    pub on_user_transcript: Option<TextCallback>,
    /// Room error
    pub on_error: Option<ErrorCallback>,
}

impl fmt::Debug for SessionCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let set = |hook: bool| if hook { "set" } else { "unset" };
        f.debug_struct("SessionCallbacks")
            .field("on_joined", &set(self.on_joined.is_some()))
            .field("on_left", &set(self.on_left.is_some()))
            .field(
                "on_avatar_message",
                &set(self.on_avatar_message.is_some()),
            )
            .field(
                "on_user_transcript",
                &set(self.on_user_transcript.is_some()),
            )
            .field("on_error", &set(self.on_error.is_some()))
            .finish_non_exhaustive()
    }
}

/// Static parameters of a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    /// Avatar to host
    pub avatar_id: String,
    /// Avatar and speech-to-text language
    pub language: String,
    /// Server-side session timeout (seconds)
    pub max_duration_secs: u32,
    /// Unmute the microphone once joined
    pub unmute_user_audio_on_joined: bool,
    /// Streaming SDK server endpoint
    pub server_url: String,
}

impl SessionOptions {
    /// Options for `avatar_id` with defaults for everything else
    pub fn new(avatar_id: impl Into<String>) -> Self {
        Self {
            avatar_id: avatar_id.into(),
            language: "ko".to_string(),
            max_duration_secs: crate::provisioning::DEFAULT_MAX_DURATION_SECS,
            unmute_user_audio_on_joined: true,
            server_url: String::new(),
        }
    }

    /// Options taken from loaded configuration
    pub fn from_config(config: &Config) -> Self {
        Self {
            avatar_id: config.avatar.avatar_id.clone(),
            language: config.avatar.language.clone(),
            max_duration_secs: config.avatar.max_duration_secs,
            unmute_user_audio_on_joined: config.avatar.unmute_user_audio_on_joined,
            server_url: config.api.server_url.clone(),
        }
    }
}

#[derive(Debug)]
struct SessionInner {
    state: SessionState,
    room: Option<Arc<dyn AvatarRoom>>,
    descriptor: Option<SessionDescriptor>,
    user_messages: Vec<ChatMessage>,
    user_speaking: bool,
    avatar_speaking: bool,
    user_audio_muted: bool,
    dispatch: Option<CancellationToken>,
    generation: u64,
}

impl Default for SessionInner {
    fn default() -> Self {
        Self {
            state: SessionState::default(),
            room: None,
            descriptor: None,
            user_messages: Vec::new(),
            user_speaking: false,
            avatar_speaking: false,
            user_audio_muted: true,
            dispatch: None,
            generation: 0,
        }
    }
}

impl SessionInner {
    fn clear_room(&mut self) {
        self.room = None;
        self.descriptor = None;
        self.avatar_speaking = false;
        self.user_audio_muted = true;
    }
}

struct Shared {
    options: SessionOptions,
    provisioner: Arc<dyn Provisioner>,
    connector: Arc<dyn RoomConnector>,
    renderer: Renderer,
    callbacks: RwLock<SessionCallbacks>,
    inner: Mutex<SessionInner>,
}

/// Controller for a single avatar conversation
///
/// Cloning yields another handle to the same session.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use avatalk::renderer::RenderMode;
/// use avatalk::room::loopback::{LoopbackConnector, LoopbackProvisioner};
/// use avatalk::room::SpeakRequest;
/// use avatalk::session::{AvatarSession, SessionOptions};
///
/// # async fn example() -> avatalk::Result<()> {
/// let session = AvatarSession::new(
///     SessionOptions::new("avatar-123"),
///     Arc::new(LoopbackProvisioner),
///     Arc::new(LoopbackConnector::default()),
///     RenderMode::default(),
/// );
/// session.join().await?;
/// session.speak(SpeakRequest::text("Hello there")).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct AvatarSession {
    shared: Arc<Shared>,
}

impl fmt::Debug for AvatarSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AvatarSession")
            .field("avatar_id", &self.shared.options.avatar_id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl AvatarSession {
    /// Create an idle session
    pub fn new(
        options: SessionOptions,
        provisioner: Arc<dyn Provisioner>,
        connector: Arc<dyn RoomConnector>,
        render_mode: RenderMode,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                options,
                provisioner,
                connector,
                renderer: Renderer::new(render_mode),
                callbacks: RwLock::new(SessionCallbacks::default()),
                inner: Mutex::new(SessionInner::default()),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionInner> {
        self.shared
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the callback slot
    pub fn set_callbacks(&self, callbacks: SessionCallbacks) {
        *self
            .shared
            .callbacks
            .write()
            .unwrap_or_else(PoisonError::into_inner) = callbacks;
    }

    /// Modify the callback slot in place
    pub fn update_callbacks(&self, update: impl FnOnce(&mut SessionCallbacks)) {
        let mut callbacks = self
            .shared
            .callbacks
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        update(&mut callbacks);
    }

    fn callbacks(&self) -> SessionCallbacks {
        self.shared
            .callbacks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Provision a session and join its room
    ///
    /// Prior conversation state is cleared before provisioning starts.
    ///
    /// # Errors
    ///
    /// - [`AvatalkError::AlreadyActive`] while another join is in flight or
    ///   the room is joined
    /// - provisioning, connection, and room join errors; the session returns
    ///   to [`SessionState::Idle`] in that case
    pub async fn join(&self) -> Result<()> {
        let generation = {
            let mut inner = self.lock();
            if matches!(inner.state, SessionState::Joining | SessionState::Joined) {
                return Err(AvatalkError::AlreadyActive(inner.state.to_string()).into());
            }
            inner.state = SessionState::Joining;
            inner.generation += 1;
            if let Some(dispatch) = inner.dispatch.take() {
                dispatch.cancel();
            }
            inner.user_messages.clear();
            inner.user_speaking = false;
            inner.avatar_speaking = false;
            inner.generation
        };
        self.shared.renderer.reset();

        match self.provision_and_join().await {
            Ok((room, descriptor, events)) => {
                tracing::info!(session_id = %descriptor.session_id, "Avatar session joined");
                let token = CancellationToken::new();
                {
                    let mut inner = self.lock();
                    inner.state = SessionState::Joined;
                    inner.room = Some(room);
                    inner.descriptor = Some(descriptor);
                    inner.user_audio_muted = !self.shared.options.unmute_user_audio_on_joined;
                    inner.dispatch = Some(token.clone());
                }
                self.spawn_dispatch(events, token, generation);
                Ok(())
            }
            Err(e) => {
                tracing::error!("Failed to join avatar session: {:#}", e);
                self.lock().state = SessionState::Idle;
                Err(e)
            }
        }
    }

    async fn provision_and_join(
        &self,
    ) -> Result<(
        Arc<dyn AvatarRoom>,
        SessionDescriptor,
        mpsc::UnboundedReceiver<RoomEvent>,
    )> {
        let options = &self.shared.options;
        let request = SessionRequest::new(&options.avatar_id, &options.language)
            .with_max_duration(options.max_duration_secs);
        let descriptor = self.shared.provisioner.request_session(&request).await?;

        let handle = self.shared.connector.connect(&options.server_url).await?;
        let joined = handle
            .room
            .join(JoinOptions {
                session_id: descriptor.session_id.clone(),
                token: descriptor.token.clone(),
                stream_id: descriptor.stream_id.clone(),
                unmute_user_audio_on_joined: options.unmute_user_audio_on_joined,
                stt_language: options.language.clone(),
            })
            .await;
        if let Err(e) = joined {
            if let Err(leave_error) = handle.room.leave().await {
                tracing::debug!("Leaving half-joined room failed: {:#}", leave_error);
            }
            return Err(e);
        }

        Ok((handle.room, descriptor, handle.events))
    }

    fn spawn_dispatch(
        &self,
        mut events: mpsc::UnboundedReceiver<RoomEvent>,
        token: CancellationToken,
        generation: u64,
    ) {
        let session = self.clone();
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = token.cancelled() => break,
                    event = events.recv() => event,
                };
                match event {
                    Some(event) => session.handle_event(event, generation),
                    None => {
                        tracing::debug!("Room event channel closed");
                        break;
                    }
                }
            }
        });
    }

    /// Apply one room event
    ///
    /// Events from a superseded room (older `generation`) are ignored.
    pub(crate) fn handle_event(&self, event: RoomEvent, generation: u64) {
        if self.lock().generation != generation {
            tracing::debug!(event = event.name(), "Ignoring event from a stale room");
            return;
        }
        tracing::trace!(event = event.name(), "Room event");

        let callbacks = self.callbacks();
        match event {
            RoomEvent::Joined => {
                if let Some(hook) = callbacks.on_joined {
                    hook();
                }
            }
            RoomEvent::Left => {
                {
                    let mut inner = self.lock();
                    if inner.generation != generation {
                        return;
                    }
                    if inner.state == SessionState::Joined {
                        inner.state = SessionState::Disconnected;
                    }
                    inner.clear_room();
                    inner.user_messages.clear();
                    inner.user_speaking = false;
                    if let Some(dispatch) = inner.dispatch.take() {
                        dispatch.cancel();
                    }
                }
                self.shared.renderer.reset();
                tracing::info!("Avatar session ended");
                if let Some(hook) = callbacks.on_left {
                    hook();
                }
            }
            RoomEvent::AvatarStartSpeaking => {
                self.lock().avatar_speaking = true;
                if let Some(hook) = callbacks.on_avatar_start_speaking {
                    hook();
                }
            }
            RoomEvent::AvatarStopSpeaking => {
                self.lock().avatar_speaking = false;
                if let Some(hook) = callbacks.on_avatar_stop_speaking {
                    hook();
                }
                self.shared.renderer.finalize();
            }
            RoomEvent::AvatarMessage { text } => {
                if let Some(hook) = callbacks.on_avatar_message {
                    hook(&text);
                }
                self.shared.renderer.append_fragment(&text);
            }
            RoomEvent::SttData(data) => match data.event_type {
                SttEventType::StartOfSpeech => {
                    self.lock().user_speaking = true;
                    if let Some(hook) = callbacks.on_user_start_speaking {
                        hook();
                    }
                }
                SttEventType::EndOfSpeech => {
                    self.lock().user_speaking = false;
                    if let Some(hook) = callbacks.on_user_stop_speaking {
                        hook();
                    }
                }
                SttEventType::Transcript => {
                    self.lock()
                        .user_messages
                        .push(ChatMessage::human(data.text.clone()));
                    if let Some(hook) = callbacks.on_user_transcript {
                        hook(&data.text);
                    }
                }
                SttEventType::PartialTranscript => {
                    tracing::trace!(text = %data.text, "Partial transcript");
                }
            },
            RoomEvent::Error(error) => {
                match error.alert_text() {
                    Some(alert) => tracing::error!(code = %error.code, "{}", alert),
                    None => tracing::warn!(
                        code = %error.code,
                        message = error.message.as_deref().unwrap_or(""),
                        "Room reported an error"
                    ),
                }
                if let Some(hook) = callbacks.on_error {
                    hook(&error);
                }
            }
        }
    }

    fn require_room(&self) -> Result<Arc<dyn AvatarRoom>> {
        self.lock()
            .room
            .clone()
            .ok_or_else(|| AvatalkError::NotInitialized.into())
    }

    /// Ask the avatar to speak
    ///
    /// # Errors
    ///
    /// Returns [`AvatalkError::NotInitialized`] when no room is joined.
    pub async fn speak(&self, request: SpeakRequest) -> Result<()> {
        let room = self.require_room()?;
        tracing::debug!(stream = request.is_stream(), "Speak request");
        room.speak(request).await
    }

    /// Interrupt the avatar
    pub async fn stop_speaking(&self) -> Result<()> {
        self.require_room()?.stop_speaking().await
    }

    /// Mute the user's microphone
    ///
    /// The tracked mute state only changes when the room accepts the request.
    pub async fn mute_user_audio(&self) -> Result<()> {
        self.require_room()?.mute_user_audio().await?;
        self.lock().user_audio_muted = true;
        Ok(())
    }

    /// Unmute the user's microphone
    pub async fn unmute_user_audio(&self) -> Result<()> {
        self.require_room()?.unmute_user_audio().await?;
        self.lock().user_audio_muted = false;
        Ok(())
    }

    /// Leave the room
    ///
    /// The room's trailing `Left` event is still delivered, so `on_left`
    /// fires and conversation state is cleared.
    ///
    /// # Errors
    ///
    /// Returns [`AvatalkError::NotInitialized`] when no room is joined.
    pub async fn leave(&self) -> Result<()> {
        let room = self.require_room()?;
        room.leave().await?;
        let mut inner = self.lock();
        inner.state = SessionState::Idle;
        inner.clear_room();
        tracing::info!("Left avatar session");
        Ok(())
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    /// Session id of the joined session
    pub fn session_id(&self) -> Option<String> {
        self.lock()
            .descriptor
            .as_ref()
            .map(|descriptor| descriptor.session_id.clone())
    }

    /// Whether speech-to-text reports the user as speaking
    pub fn is_user_speaking(&self) -> bool {
        self.lock().user_speaking
    }

    /// Whether the avatar is between its start and stop speaking events
    pub fn is_avatar_speaking(&self) -> bool {
        self.lock().avatar_speaking
    }

    /// Whether the user's microphone is muted; `true` while no room is joined
    pub fn is_user_audio_muted(&self) -> bool {
        self.lock().user_audio_muted
    }

    /// Final user transcripts in arrival order
    pub fn user_messages(&self) -> Vec<ChatMessage> {
        self.lock().user_messages.clone()
    }

    /// Avatar messages as revealed so far
    pub fn avatar_messages(&self) -> Vec<ChatMessage> {
        self.shared.renderer.messages()
    }

    /// User and avatar messages merged by timestamp
    pub fn transcript(&self) -> Vec<ChatMessage> {
        merge_transcript(&self.user_messages(), &self.avatar_messages())
    }

    /// The avatar message currently being typed
    pub fn current_avatar_message(&self) -> Option<ChatMessage> {
        self.shared.renderer.current_message()
    }

    /// The renderer that receives avatar fragments
    pub fn renderer(&self) -> &Renderer {
        &self.shared.renderer
    }

    /// Session options
    pub fn options(&self) -> &SessionOptions {
        &self.shared.options
    }

    #[cfg(test)]
    fn generation(&self) -> u64 {
        self.lock().generation
    }
}
