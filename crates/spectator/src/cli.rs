//! CLI argument parsing.

use clap::{Args, Parser, Subcommand};
use tokio::time::Duration;

use crate::connection::ConnectionOptions;

#[derive(Parser)]
#[command(name = "spectator")]
#[command(about = "Live board spectator: watch, vote and like")]
pub struct Cli {
    /// Hub HTTP root
    #[arg(long, env = "HUB_URL", default_value = "http://localhost:8080")]
    pub hub_url: String,

    /// Where the session token lives (defaults to the platform data dir)
    #[arg(long, env = "SPECTATOR_SESSION_FILE")]
    pub session_file: Option<String>,

    #[command(flatten)]
    pub connection: ConnectionArgs,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Args, Debug, Clone)]
pub struct ConnectionArgs {
    /// Consecutive failed connects before giving up
    #[arg(long, default_value_t = 5)]
    pub max_reconnect_attempts: u32,

    #[arg(long, default_value_t = 1000)]
    pub base_delay_ms: u64,

    #[arg(long, default_value_t = 30_000)]
    pub max_delay_ms: u64,

    #[arg(long, default_value_t = 25_000)]
    pub heartbeat_ms: u64,

    #[arg(long, default_value_t = 10_000)]
    pub pong_timeout_ms: u64,
}

impl ConnectionArgs {
    pub fn options(&self) -> ConnectionOptions {
        ConnectionOptions {
            max_reconnect_attempts: self.max_reconnect_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            heartbeat_interval: Duration::from_millis(self.heartbeat_ms),
            pong_timeout: Duration::from_millis(self.pong_timeout_ms),
            ..ConnectionOptions::default()
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Follow the live board in the terminal [default]
    Watch {
        /// Channel to follow: live, cards, logs or chat
        #[arg(long, default_value = "live")]
        channel: String,
    },

    /// Vote in the open round
    Vote {
        #[arg(value_name = "OPTION_ID")]
        option_id: String,
    },

    /// Like a finished project
    Like {
        #[arg(value_name = "PROJECT_ID")]
        project_id: String,
    },

    /// Submit a mini-game score
    Score {
        #[arg(value_name = "PLAYER")]
        player_name: String,

        #[arg(value_name = "SCORE")]
        score: i64,

        #[arg(long, default_value = shared::DEFAULT_GAME_TYPE)]
        game: String,
    },

    /// Show a mini-game leaderboard
    Ranking {
        #[arg(long, default_value = shared::DEFAULT_GAME_TYPE)]
        game: String,

        #[arg(long, default_value_t = shared::LEADERBOARD_SIZE)]
        limit: u32,
    },

    /// List finished projects, most liked first
    Gallery {
        #[arg(long, default_value_t = 20)]
        limit: u32,

        #[arg(long, default_value_t = 0)]
        offset: u32,
    },
}
