/*!
Command handlers for the CLI

This module provides command handlers invoked by the CLI entrypoint.

It exposes four top-level command modules:

- `chat`     : Interactive avatar session
- `provision`: Request a session descriptor from the stream proxy
- `proxy`    : Run the API-key stream proxy
- `type`     : Render text through the typing effect

The handlers are thin and delegate to the library components: the session
controller, the renderer, the provisioning client and the proxy.
*/

use crate::config::Config;
use crate::error::{AvatalkError, Result};
use crate::message::ChatMessage;
use crate::renderer::Renderer;
use crate::room::loopback::word_fragments;
use std::io::Write;
use std::time::Duration;

// Special commands parser for session control
pub mod special_commands;

/// How long a reply may stay silent before the prompt comes back
const REPLY_IDLE_TIMEOUT: Duration = Duration::from_secs(10);

/// Print the renderer message at `index` as it is revealed
///
/// Returns the final message, or `None` when nothing changed for `idle` or the
/// renderer was reset.
async fn follow_reply(renderer: &Renderer, index: usize, idle: Duration) -> Option<ChatMessage> {
    let mut updates = renderer.subscribe();
    updates.borrow_and_update();
    let mut printed = 0usize;

    loop {
        let messages = renderer.messages();
        if messages.len() < index {
            println!();
            return None;
        }
        if let Some(message) = messages.get(index) {
            if let Some(delta) = message.content.get(printed..) {
                if !delta.is_empty() {
                    print!("{}", delta);
                    std::io::stdout().flush().ok();
                    printed = message.content.len();
                }
            }
            if message.is_final_ai() {
                println!();
                return Some(message.clone());
            }
        }

        match tokio::time::timeout(idle, updates.changed()).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) | Err(_) => {
                if printed > 0 {
                    println!();
                }
                return None;
            }
        }
    }
}

// Chat command handler
pub mod chat {
    //! Interactive avatar session handler.
    //!
    //! Builds an `AvatarSession`, joins it, and runs a readline loop where
    //! ordinary input is spoken by the avatar and `/` commands control the
    //! session. A `SessionTimer` leaves the session when its time is up.

    use super::*;
    use crate::commands::special_commands::{parse_special_command, print_help, SpecialCommand};
    use crate::provisioning::{Provisioner, StreamProvisioningClient};
    use crate::room::loopback::{LoopbackConnector, LoopbackProvisioner};
    use crate::room::{RoomError, SpeakRequest};
    use crate::session::{AvatarSession, SessionCallbacks, SessionOptions, SessionState};
    use crate::timer::SessionTimer;
    use colored::Colorize;
    use futures::StreamExt;
    use rustyline::error::ReadlineError;
    use rustyline::DefaultEditor;
    use std::sync::Arc;

    /// Start interactive chat mode
    ///
    /// # Arguments
    ///
    /// * `config` - Global configuration (consumed)
    /// * `loopback` - Mint descriptors locally instead of calling the proxy
    ///
    /// # Examples
    ///
    /// ```
    /// use avatalk::commands::chat;
    /// use avatalk::config::Config;
    ///
    /// // In application code:
    /// // chat::run_chat(Config::default(), true).await?;
    /// ```
    pub async fn run_chat(config: Config, loopback: bool) -> Result<()> {
        tracing::info!("Starting interactive chat mode");

        let mut options = SessionOptions::from_config(&config);
        let provisioner: Arc<dyn Provisioner> = if loopback {
            if options.avatar_id.is_empty() {
                options.avatar_id = "loopback".to_string();
            }
            Arc::new(LoopbackProvisioner)
        } else {
            config.require_avatar()?;
            Arc::new(StreamProvisioningClient::with_timeout(
                &config.api.proxy_url,
                Duration::from_secs(config.api.request_timeout_secs),
            )?)
        };
        // Media transport belongs to the SDK bridge; the CLI drives the in-process room.
        let connector = Arc::new(LoopbackConnector::default());

        let session = AvatarSession::new(
            options,
            provisioner,
            connector,
            config.renderer.render_mode(),
        );
        let expired = session.clone();
        let timer = Arc::new(SessionTimer::with_poll_interval(
            Arc::new(move || {
                println!("\n{}", "Session time is over".yellow());
                let session = expired.clone();
                tokio::spawn(async move {
                    if let Err(e) = session.leave().await {
                        tracing::debug!("Leave on expiry skipped: {}", e);
                    }
                });
            }),
            Duration::from_millis(config.timer.poll_interval_ms),
        ));
        session.set_callbacks(chat_callbacks(Arc::clone(&timer)));

        print_welcome_banner(&config, loopback);
        if let Err(e) = join_session(&session, &timer, &config).await {
            eprintln!("{} {}\n", "Failed to join:".red(), e);
        }

        let mut rl = DefaultEditor::new()?;
        loop {
            match rl.readline(&format_prompt(&session, &timer)) {
                Ok(line) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    rl.add_history_entry(trimmed).ok();

                    let command = match parse_special_command(trimmed) {
                        Ok(command) => command,
                        Err(e) => {
                            eprintln!("{}\n", e);
                            continue;
                        }
                    };

                    let outcome = match command {
                        SpecialCommand::Exit => break,
                        SpecialCommand::Help => {
                            print_help();
                            Ok(())
                        }
                        SpecialCommand::Join => join_session(&session, &timer, &config).await,
                        SpecialCommand::Leave => {
                            timer.cancel();
                            session.leave().await
                        }
                        SpecialCommand::Stop => session.stop_speaking().await,
                        SpecialCommand::Mute => session.mute_user_audio().await.map(|_| {
                            println!("{}", "Microphone muted".dimmed());
                        }),
                        SpecialCommand::Unmute => session.unmute_user_audio().await.map(|_| {
                            println!("{}", "Microphone unmuted".dimmed());
                        }),
                        SpecialCommand::ShowStatus => {
                            print_status(&session, &timer);
                            Ok(())
                        }
                        SpecialCommand::Transcript => {
                            print_transcript(&session);
                            Ok(())
                        }
                        SpecialCommand::Stream(text) => {
                            let fragments = futures::stream::iter(word_fragments(&text)).boxed();
                            speak_and_follow(&session, SpeakRequest::stream(fragments)).await
                        }
                        SpecialCommand::Say(text) => {
                            let request = SpeakRequest::text(text).with_disable_interrupt(true);
                            speak_and_follow(&session, request).await
                        }
                        SpecialCommand::None => {
                            speak_and_follow(&session, SpeakRequest::text(trimmed)).await
                        }
                    };

                    if let Err(e) = outcome {
                        report_error(&e);
                    }
                }
                Err(ReadlineError::Interrupted) => {
                    println!("CTRL-C");
                    break;
                }
                Err(ReadlineError::Eof) => {
                    println!("CTRL-D");
                    break;
                }
                Err(err) => {
                    tracing::error!("Readline error: {:?}", err);
                    break;
                }
            }
        }

        timer.cancel();
        if session.state() == SessionState::Joined {
            session.leave().await.ok();
        }
        println!("Goodbye!");
        Ok(())
    }

    async fn join_session(
        session: &AvatarSession,
        timer: &SessionTimer,
        config: &Config,
    ) -> Result<()> {
        println!("{}", "Connecting to avatar...".dimmed());
        session.join().await?;
        timer.set_timer(u64::from(config.avatar.max_duration_secs));
        println!(
            "{} {}\n",
            "Joined session".green(),
            session.session_id().unwrap_or_default().dimmed()
        );

        if let Some(welcome) = config
            .avatar
            .welcome_message
            .as_deref()
            .filter(|text| !text.trim().is_empty())
        {
            let request = SpeakRequest::text(welcome).with_disable_interrupt(true);
            speak_and_follow(session, request).await?;
        }
        Ok(())
    }

    async fn speak_and_follow(session: &AvatarSession, request: SpeakRequest) -> Result<()> {
        let index = session.avatar_messages().len();
        session.speak(request).await?;
        print!("{} ", "Avatar:".cyan().bold());
        std::io::stdout().flush().ok();
        if follow_reply(session.renderer(), index, REPLY_IDLE_TIMEOUT)
            .await
            .is_none()
        {
            tracing::debug!("Avatar reply did not complete");
        }
        println!();
        Ok(())
    }

    fn chat_callbacks(timer: Arc<SessionTimer>) -> SessionCallbacks {
        SessionCallbacks {
            on_left: Some(Arc::new(move || {
                timer.cancel();
                println!("\n{}", "Session ended. Type /join to start again.".yellow());
            })),
            on_user_transcript: Some(Arc::new(|text: &str| {
                println!("\n{} {}", "You (voice):".green().bold(), text);
            })),
            on_error: Some(Arc::new(|error: &RoomError| {
                let text = error
                    .alert_text()
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("Room error {}", error.code));
                eprintln!("\n{}", text.red());
            })),
            ..SessionCallbacks::default()
        }
    }

    fn report_error(error: &anyhow::Error) {
        match error.downcast_ref::<AvatalkError>() {
            Some(AvatalkError::NotInitialized) => {
                eprintln!("{}\n", "Not connected. Type /join to start a session.".yellow());
            }
            Some(AvatalkError::AlreadyActive(state)) => {
                eprintln!("{} ({})\n", "A session is already active".yellow(), state);
            }
            _ => eprintln!("{} {:#}\n", "Error:".red(), error),
        }
    }

    fn format_prompt(session: &AvatarSession, timer: &SessionTimer) -> String {
        match (session.state(), timer.remaining()) {
            (SessionState::Joined, Some(remaining)) => {
                format!("[{}] >> ", format_remaining(remaining).green())
            }
            (SessionState::Joined, None) => format!("[{}] >> ", "LIVE".green()),
            (state, _) => format!("[{}] >> ", state.to_string().to_uppercase().yellow()),
        }
    }

    /// Format seconds as `m:ss`
    pub fn format_remaining(secs: u64) -> String {
        format!("{}:{:02}", secs / 60, secs % 60)
    }

    fn print_welcome_banner(config: &Config, loopback: bool) {
        println!(
            "\n{}",
            "╔══════════════════════════════════════╗".cyan()
        );
        println!("{}", "║        Avatalk - Avatar Chat         ║".cyan());
        println!(
            "{}\n",
            "╚══════════════════════════════════════╝".cyan()
        );
        println!(
            "Avatar:   {}",
            if config.avatar.avatar_id.is_empty() {
                "(loopback)"
            } else {
                config.avatar.avatar_id.as_str()
            }
        );
        println!("Language: {}", config.avatar.language);
        println!(
            "Session:  {} ({})",
            format_remaining(u64::from(config.avatar.max_duration_secs)),
            if loopback { "loopback" } else { "proxy" }
        );
        println!("\nType '/help' for available commands, '/exit' to quit.\n");
    }

    fn print_status(session: &AvatarSession, timer: &SessionTimer) {
        println!("\nState:        {}", session.state());
        println!(
            "Session id:   {}",
            session.session_id().unwrap_or_else(|| "-".to_string())
        );
        println!(
            "Remaining:    {}",
            timer
                .remaining()
                .map(format_remaining)
                .unwrap_or_else(|| "-".to_string())
        );
        println!(
            "User voice:   {}",
            if session.is_user_speaking() {
                "speaking"
            } else {
                "silent"
            }
        );
        println!(
            "Avatar:       {}",
            if session.is_avatar_speaking() {
                "speaking"
            } else {
                "listening"
            }
        );
        println!(
            "Microphone:   {}",
            if session.is_user_audio_muted() {
                "muted"
            } else {
                "live"
            }
        );
        println!("Messages:     {}\n", session.transcript().len());
    }

    fn print_transcript(session: &AvatarSession) {
        let transcript = session.transcript();
        if transcript.is_empty() {
            println!("{}\n", "No messages yet".dimmed());
            return;
        }
        println!();
        for message in transcript {
            let label = format!("[{}]", message.role);
            let label = match message.role {
                crate::message::MessageRole::Ai => label.cyan(),
                crate::message::MessageRole::Human => label.green(),
            };
            println!("{} {}", label, message.content);
        }
        println!();
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[tokio::test]
        async fn test_left_callback_cancels_timer() {
            let timer = Arc::new(SessionTimer::new(Arc::new(|| {})));
            timer.set_timer(300);
            assert!(timer.is_running());

            let callbacks = chat_callbacks(Arc::clone(&timer));
            let on_left = callbacks.on_left.expect("left hook");
            on_left();
            assert!(!timer.is_running());
        }

        #[test]
        fn test_format_remaining() {
            assert_eq!(format_remaining(0), "0:00");
            assert_eq!(format_remaining(59), "0:59");
            assert_eq!(format_remaining(300), "5:00");
            assert_eq!(format_remaining(3599), "59:59");
        }
    }
}

// Provision command handler
pub mod provision {
    //! Requests a session descriptor and prints it as JSON.

    use super::*;
    use crate::config::{MAX_SESSION_DURATION_SECS, MIN_SESSION_DURATION_SECS};
    use crate::provisioning::{Provisioner, SessionRequest, StreamProvisioningClient};

    /// Provision a stream through the proxy and print the descriptor
    ///
    /// # Errors
    ///
    /// Returns a config error for a missing avatar id or an out-of-range
    /// duration, and the provisioning error otherwise.
    pub async fn run_provision(config: &Config, duration: Option<u32>) -> Result<()> {
        let avatar_id = config.require_avatar()?;
        let duration = duration.unwrap_or(config.avatar.max_duration_secs);
        if !(MIN_SESSION_DURATION_SECS..=MAX_SESSION_DURATION_SECS).contains(&duration) {
            return Err(AvatalkError::Config(format!(
                "duration must be between {} and {} seconds",
                MIN_SESSION_DURATION_SECS, MAX_SESSION_DURATION_SECS
            ))
            .into());
        }

        let client = StreamProvisioningClient::with_timeout(
            &config.api.proxy_url,
            Duration::from_secs(config.api.request_timeout_secs),
        )?;
        let request =
            SessionRequest::new(avatar_id, &config.avatar.language).with_max_duration(duration);
        let descriptor = client.request_session(&request).await?;

        println!("{}", serde_json::to_string_pretty(&descriptor)?);
        Ok(())
    }
}

// Proxy command handler
pub mod proxy {
    //! Runs the stream proxy until Ctrl-C.

    use super::*;

    /// Serve the stream proxy, optionally overriding the bind address
    pub async fn run_proxy(mut config: Config, bind: Option<String>) -> Result<()> {
        if let Some(bind) = bind {
            config.proxy.bind_address = bind;
        }
        crate::proxy::serve(&config.proxy).await
    }
}

// Type command handler
pub mod r#type {
    //! Feeds text through the renderer as word fragments and prints the
    //! typing effect.

    use super::*;
    use std::path::Path;

    /// Delay between fed fragments, emulating network delivery
    const FRAGMENT_DELAY: Duration = Duration::from_millis(60);

    /// Render `file` (or stdin) through the configured typing effect
    pub async fn run_type(config: &Config, file: Option<&Path>) -> Result<()> {
        let text = match file {
            Some(path) => tokio::fs::read_to_string(path).await?,
            None => tokio::task::spawn_blocking(|| std::io::read_to_string(std::io::stdin()))
                .await
                .map_err(|e| AvatalkError::Config(format!("stdin reader failed: {}", e)))??,
        };

        let renderer = Renderer::new(config.renderer.render_mode());
        let feeder = tokio::spawn(feed(renderer.clone(), text, FRAGMENT_DELAY));
        follow_reply(&renderer, 0, REPLY_IDLE_TIMEOUT).await;
        feeder
            .await
            .map_err(|e| AvatalkError::Config(format!("renderer feed failed: {}", e)))?;
        Ok(())
    }

    /// Append `text` word by word, then finalize once the reveal settles
    pub async fn feed(renderer: Renderer, text: String, delay: Duration) -> ChatMessage {
        for fragment in word_fragments(&text) {
            renderer.append_fragment(&fragment);
            tokio::time::sleep(delay).await;
        }
        while renderer.is_revealing() {
            tokio::time::sleep(delay).await;
        }
        renderer.finalize();
        renderer.current_message().unwrap_or_else(|| {
            ChatMessage::ai_open(String::new(), crate::message::now_timestamp())
        })
    }

}
