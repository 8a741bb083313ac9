//! Command-line interface definition for Avatalk
//!
//! This module defines the CLI structure using clap's derive API,
//! providing commands for provisioning, proxying, and chatting with an avatar.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::RenderStyle;

/// Avatalk - real-time AI avatar session client
///
/// Provision avatar streams, run the API-key proxy, and hold typed
/// conversations with an avatar.
#[derive(Parser, Debug, Clone)]
#[command(name = "avatalk")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/config.yaml")]
    pub config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub json_logs: bool,

    /// Override the avatar id from config
    #[arg(long, env = "AVATALK_AVATAR_ID")]
    pub avatar_id: Option<String>,

    /// Override the session language from config
    #[arg(short, long)]
    pub language: Option<String>,

    /// Override the typing style (character, sentence)
    #[arg(long)]
    pub render_style: Option<RenderStyle>,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for Avatalk
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Request a session descriptor from the stream proxy and print it
    Provision {
        /// Session duration in seconds (1-3600)
        #[arg(short, long)]
        duration: Option<u32>,
    },

    /// Run the stream proxy that injects the API key
    Proxy {
        /// Address to bind, overriding config
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Start an interactive session with the avatar
    Chat {
        /// Provision locally instead of calling the stream proxy
        #[arg(long)]
        loopback: bool,
    },

    /// Render text through the typing effect
    Type {
        /// File to read; stdin when omitted
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}

impl Cli {
    /// Parse command line arguments
    ///
    /// # Returns
    ///
    /// Returns the parsed CLI structure
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

impl Default for Cli {
    fn default() -> Self {
        Self {
            config: Some("config/config.yaml".to_string()),
            verbose: false,
            json_logs: false,
            avatar_id: None,
            language: None,
            render_style: None,
            command: Commands::Chat { loopback: true },
        }
    }
}
