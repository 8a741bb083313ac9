//! Incremental message renderer (typing effect)
//!
//! The avatar delivers its reply as a stream of text fragments. [`Renderer`]
//! appends fragments to the open AI message immediately, while a separate
//! reveal task exposes the buffered text one character at a time. Network
//! delivery speed and perceived typing speed are therefore decoupled.
//!
//! Two pacing variants are supported:
//!
//! - [`RenderMode::Character`] reveals every buffered character at a fixed
//!   interval.
//! - [`RenderMode::Sentence`] only reveals complete sentences (see
//!   [`sentence`]), typing them character by character with a pause between
//!   sentences. Trailing text without a terminator is held back until more
//!   text completes it or the message is finalized.
//!
//! In both modes [`Renderer::finalize`] flushes the whole buffer, so the final
//! content of a message is exactly the concatenation of its fragments.
//!
//! # Concurrency
//!
//! All state lives behind one mutex. The reveal task never reads past the
//! end of the buffer, and every task carries the generation it was spawned
//! for: [`Renderer::finalize`] and [`Renderer::reset`] bump the generation and
//! cancel the task, so a tick that was already scheduled cannot mutate state.

pub mod sentence;

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::message::{now_timestamp, ChatMessage};

/// Default per-character interval in character mode
pub const DEFAULT_CHARACTER_INTERVAL: Duration = Duration::from_millis(40);
/// Default per-character interval in sentence mode
pub const DEFAULT_SENTENCE_INTERVAL: Duration = Duration::from_millis(110);
/// Default pause between sentences in sentence mode
pub const DEFAULT_SENTENCE_PAUSE: Duration = Duration::from_millis(500);

/// Pacing strategy for revealing buffered text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderMode {
    /// Reveal one character per interval
    Character {
        /// Delay between characters
        interval: Duration,
    },
    /// Reveal complete sentences one character per interval, pausing between sentences
    Sentence {
        /// Delay between characters
        interval: Duration,
        /// Delay after a sentence is fully revealed
        pause: Duration,
    },
}

impl Default for RenderMode {
    fn default() -> Self {
        RenderMode::Character {
            interval: DEFAULT_CHARACTER_INTERVAL,
        }
    }
}

impl RenderMode {
    fn interval(&self) -> Duration {
        match self {
            RenderMode::Character { interval } | RenderMode::Sentence { interval, .. } => *interval,
        }
    }
}

/// Typing buffer of the open message
#[derive(Debug, Default)]
struct OpenMessage {
    /// Everything appended since the message was opened
    buffer: String,
    /// Byte offset of revealed text; always on a char boundary, never past `buffer.len()`
    cursor: usize,
    /// Sentence mode: ends of complete sentences not yet fully revealed
    sentence_ends: VecDeque<usize>,
    /// Sentence mode: start of the residue that has not been scanned to a boundary
    scanned: usize,
}

#[derive(Debug, Default)]
struct RenderState {
    messages: Vec<ChatMessage>,
    open: Option<OpenMessage>,
    generation: u64,
    reveal: Option<CancellationToken>,
}

enum Step {
    Revealed { next_delay: Duration },
    Idle,
}

impl RenderState {
    fn cancel_reveal(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        if let Some(token) = self.reveal.take() {
            token.cancel();
        }
    }

    /// Reveal the next character if the pacing mode allows it
    fn step(&mut self, mode: &RenderMode) -> Step {
        let Some(open) = self.open.as_mut() else {
            return Step::Idle;
        };

        let limit = match mode {
            RenderMode::Character { .. } => open.buffer.len(),
            RenderMode::Sentence { .. } => match open.sentence_ends.front() {
                Some(end) => *end,
                None => return Step::Idle,
            },
        };
        if open.cursor >= limit {
            return Step::Idle;
        }

        let Some(ch) = open.buffer[open.cursor..].chars().next() else {
            return Step::Idle;
        };
        open.cursor += ch.len_utf8();
        if let Some(last) = self.messages.last_mut() {
            last.content.push(ch);
        }

        let next_delay = match mode {
            RenderMode::Character { interval } => *interval,
            RenderMode::Sentence { interval, pause } => {
                if open.sentence_ends.front() == Some(&open.cursor) {
                    open.sentence_ends.pop_front();
                    *pause
                } else {
                    *interval
                }
            }
        };
        Step::Revealed { next_delay }
    }
}

struct Shared {
    mode: RenderMode,
    state: Mutex<RenderState>,
    current_tx: watch::Sender<Option<ChatMessage>>,
}

/// Time-paced renderer of streamed AI text into chat messages
///
/// Cloning a `Renderer` yields another handle to the same state.
/// [`Renderer::append_fragment`] spawns the reveal task and therefore must be
/// called from within a Tokio runtime.
///
/// # Examples
///
/// ```
/// use avatalk::renderer::{RenderMode, Renderer};
///
/// # #[tokio::main]
/// # async fn main() {
/// let renderer = Renderer::new(RenderMode::default());
/// renderer.append_fragment("Hello, ");
/// renderer.append_fragment("world");
/// renderer.append_fragment("!");
/// renderer.finalize();
///
/// let message = renderer.current_message().unwrap();
/// assert_eq!(message.content, "Hello, world!");
/// assert_eq!(message.is_final, Some(true));
/// # }
/// ```
#[derive(Clone)]
pub struct Renderer {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for Renderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Renderer")
            .field("mode", &self.shared.mode)
            .finish_non_exhaustive()
    }
}

impl Default for Renderer {
    fn default() -> Self {
        Self::new(RenderMode::default())
    }
}

impl Renderer {
    /// Create a renderer with the given pacing mode
    pub fn new(mode: RenderMode) -> Self {
        let (current_tx, _) = watch::channel(None);
        Self {
            shared: Arc::new(Shared {
                mode,
                state: Mutex::new(RenderState::default()),
                current_tx,
            }),
        }
    }

    /// The pacing mode this renderer was built with
    pub fn mode(&self) -> RenderMode {
        self.shared.mode
    }

    fn lock(&self) -> MutexGuard<'_, RenderState> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, state: &RenderState) {
        self.shared
            .current_tx
            .send_replace(state.messages.last().cloned());
    }

    /// Append a fragment to the open AI message, opening one if needed
    ///
    /// Empty fragments are ignored.
    pub fn append_fragment(&self, text: &str) {
        if text.is_empty() {
            return;
        }

        let mut state = self.lock();
        if state.open.is_none() {
            state.messages.push(ChatMessage::ai_open("", now_timestamp()));
            state.open = Some(OpenMessage::default());
            self.publish(&state);
        }

        let sentence_mode = matches!(self.shared.mode, RenderMode::Sentence { .. });
        if let Some(open) = state.open.as_mut() {
            open.buffer.push_str(text);
            if sentence_mode {
                let base = open.scanned;
                for end in sentence::sentence_ends(&open.buffer[base..]) {
                    open.sentence_ends.push_back(base + end);
                    open.scanned = base + end;
                }
            }
        }

        if state.reveal.is_none() {
            let token = CancellationToken::new();
            state.reveal = Some(token.clone());
            self.spawn_reveal(state.generation, token);
        }
    }

    fn spawn_reveal(&self, generation: u64, token: CancellationToken) {
        let renderer = self.clone();
        let mut delay = self.shared.mode.interval();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }

                let mut state = renderer.lock();
                if state.generation != generation || token.is_cancelled() {
                    break;
                }
                match state.step(&renderer.shared.mode) {
                    Step::Revealed { next_delay } => {
                        delay = next_delay;
                        renderer.publish(&state);
                    }
                    Step::Idle => {
                        state.reveal = None;
                        break;
                    }
                }
            }
        });
    }

    /// Close the open message, flushing any unrevealed text and marking it final
    ///
    /// Does nothing when no message is open.
    pub fn finalize(&self) {
        let mut state = self.lock();
        state.cancel_reveal();
        let Some(open) = state.open.take() else {
            return;
        };
        if let Some(last) = state.messages.last_mut() {
            last.content = open.buffer;
            last.is_final = Some(true);
        }
        tracing::debug!("Avatar message finalized");
        self.publish(&state);
    }

    /// Drop all messages and buffered text and cancel any pending reveal
    pub fn reset(&self) {
        let mut state = self.lock();
        state.cancel_reveal();
        state.open = None;
        state.messages.clear();
        self.publish(&state);
    }

    /// The most recent AI message, open or final
    pub fn current_message(&self) -> Option<ChatMessage> {
        self.lock().messages.last().cloned()
    }

    /// All AI messages rendered since the last reset
    pub fn messages(&self) -> Vec<ChatMessage> {
        self.lock().messages.clone()
    }

    /// Whether buffered text is still waiting to be revealed
    pub fn is_typing(&self) -> bool {
        self.lock()
            .open
            .as_ref()
            .map(|open| open.cursor < open.buffer.len())
            .unwrap_or(false)
    }

    /// Whether a reveal task is still scheduled
    ///
    /// Turns false once everything revealable is shown. In sentence mode an
    /// unterminated residue may remain buffered until [`Renderer::finalize`].
    pub fn is_revealing(&self) -> bool {
        self.lock().reveal.is_some()
    }

    /// Watch channel carrying the current message after every change
    pub fn subscribe(&self) -> watch::Receiver<Option<ChatMessage>> {
        self.shared.current_tx.subscribe()
    }
}
