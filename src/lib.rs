//! Avatalk - real-time AI avatar session client library
//!
//! This library provides the client side of a live AI-avatar conversation:
//! provisioning a stream, joining the avatar room, typing the avatar's
//! streamed replies out with a paced effect, and ending the session when its
//! time runs out.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - `session`: Avatar session controller (join, speak, leave, event dispatch)
//! - `renderer`: Incremental message renderer (character and sentence pacing)
//! - `timer`: Countdown that fires once when the session time is up
//! - `provisioning`: HTTP client for the stream proxy
//! - `proxy`: Stream proxy server that injects the API key
//! - `room`: Seam to the avatar streaming SDK, plus an in-process loopback room
//! - `message`: Chat message model and transcript merging
//! - `config`: Configuration management and validation
//! - `error`: Error types and result aliases
//! - `cli`: Command-line interface definition
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use avatalk::room::loopback::{LoopbackConnector, LoopbackProvisioner};
//! use avatalk::room::SpeakRequest;
//! use avatalk::{AvatarSession, Config, SessionOptions};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.yaml", &Default::default())?;
//!     config.validate()?;
//!
//!     let session = AvatarSession::new(
//!         SessionOptions::from_config(&config),
//!         Arc::new(LoopbackProvisioner),
//!         Arc::new(LoopbackConnector::default()),
//!         config.renderer.render_mode(),
//!     );
//!     session.join().await?;
//!     session.speak(SpeakRequest::text("Hello!")).await?;
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod message;
pub mod provisioning;
pub mod proxy;
pub mod renderer;
pub mod room;
pub mod session;
pub mod timer;

// Re-export commonly used types
pub use config::Config;
pub use error::{AvatalkError, Result};
pub use message::{ChatMessage, MessageRole};
pub use provisioning::{SessionDescriptor, StreamProvisioningClient};
pub use renderer::{RenderMode, Renderer};
pub use session::{AvatarSession, SessionCallbacks, SessionOptions, SessionState};
pub use timer::SessionTimer;
