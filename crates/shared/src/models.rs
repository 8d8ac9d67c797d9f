//! Shared request/response and domain models.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Kanban columns in board order.
pub const KANBAN_COLUMNS: [&str; 6] = ["backlog", "plan", "implement", "test", "review", "done"];

/// Card as seen by spectators (read-only, limited fields).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveCard {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub column_id: String,
    pub created_at: String,
}

/// What happened to a card.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CardAction {
    Created,
    Moved,
    Updated,
}

/// Current work status of the board operator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkStatus {
    pub is_working: bool,
    #[serde(default)]
    pub current_stage: Option<String>,
    #[serde(default)]
    pub current_card: Option<LiveCard>,
    #[serde(default)]
    pub progress: Option<f64>,
}

/// Status response (initial load).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveStatusResponse {
    #[serde(flatten)]
    pub status: WorkStatus,
    pub spectator_count: u64,
}

/// Kanban snapshot response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KanbanResponse {
    pub columns: BTreeMap<String, Vec<LiveCard>>,
    pub total_cards: usize,
}

// --- Voting DTOs ---

/// Option as announced when a round opens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VotingOptionRef {
    pub id: String,
    pub label: String,
}

/// Option with its tally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VotingResult {
    pub id: String,
    pub label: String,
    pub vote_count: u64,
}

/// Current voting state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VotingStateResponse {
    pub is_active: bool,
    #[serde(default)]
    pub round_id: Option<String>,
    #[serde(default)]
    pub options: Vec<VotingResult>,
    #[serde(default)]
    pub ends_at: Option<String>,
    #[serde(default)]
    pub time_remaining_seconds: Option<u64>,
}

/// Cast vote request (REST or socket).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteRequest {
    pub option_id: String,
    pub session_id: String,
}

/// Cast vote response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteResponse {
    pub success: bool,
    pub message: String,
    #[serde(default)]
    pub new_vote_count: Option<u64>,
}

// --- Gallery DTOs ---

/// Completed project shown in the gallery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedProject {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub screenshot_url: Option<String>,
    #[serde(default)]
    pub preview_url: Option<String>,
    pub like_count: u64,
    pub completed_at: String,
}

/// Gallery page.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GalleryResponse {
    pub projects: Vec<CompletedProject>,
    pub total: u64,
}

/// Like request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LikeRequest {
    pub session_id: String,
}

/// Like response. `success` is false when the session already liked the project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LikeResponse {
    pub success: bool,
    pub message: String,
    pub new_like_count: u64,
}

// --- Admin / collaborator DTOs ---

/// Start voting request. Missing fields fall back to server defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartVotingRequest {
    #[serde(default)]
    pub duration_seconds: Option<u64>,
    #[serde(default)]
    pub options: Option<Vec<String>>,
}

/// Start voting response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartVotingResponse {
    pub round_id: String,
    pub ends_at: String,
    pub duration_seconds: u64,
    pub options: Vec<VotingOptionRef>,
}

/// End voting response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndVotingResponse {
    pub winner: Option<VotingResult>,
    pub results: Vec<VotingResult>,
}

/// Add a completed project to the gallery.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddProjectRequest {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub screenshot_url: Option<String>,
    #[serde(default)]
    pub preview_url: Option<String>,
}

/// Add project response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddProjectResponse {
    pub project_id: String,
}

/// Log line pushed by a collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogRequest {
    pub content: String,
    #[serde(default)]
    pub log_type: Option<String>,
}

// --- Mini-game leaderboard ---

/// Game played when a score or ranking request names none.
pub const DEFAULT_GAME_TYPE: &str = "snake";

/// Entries in a leaderboard and the rank up to which a score is announced.
pub const LEADERBOARD_SIZE: u32 = 10;

/// One leaderboard row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameScoreEntry {
    pub id: String,
    pub player_name: String,
    pub score: i64,
    pub game_type: String,
    pub created_at: String,
}

/// Leaderboard of one game, best score first.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameRankingResponse {
    pub ranking: Vec<GameScoreEntry>,
    pub total: u64,
}

/// Score submitted at the end of a game. Snake-case keys are accepted too.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameScoreRequest {
    #[serde(default, alias = "player_name")]
    pub player_name: String,
    #[serde(default)]
    pub score: i64,
    #[serde(default, alias = "game_type")]
    pub game_type: Option<String>,
    #[serde(default, alias = "session_id")]
    pub session_id: Option<String>,
}

/// Submitted score response. `rank` is 1-based within the game.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameScoreResponse {
    pub success: bool,
    pub score_id: String,
    pub rank: u64,
}
