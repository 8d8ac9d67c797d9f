//! Shared types for the live hub and the spectator client.

mod events;
mod models;

// Explicit re-exports (avoids rust-analyzer issues with `pub use models::*`)
pub use events::{channels, wire_timestamp, ws_types};
pub use events::{
    CardUpdatePayload, ChatMessagePayload, ChatPayload, ClientMessage, Envelope,
    GameRankingPayload, LiveEvent, LogEntryPayload, PresencePayload, ProjectLikedPayload,
    ProtocolError, VotingEndedPayload, VotingStartedPayload, VotingUpdatePayload,
    ENVELOPE_VERSION,
};
pub use models::{
    AddProjectRequest, AddProjectResponse, CardAction, CompletedProject, EndVotingResponse,
    GalleryResponse, GameRankingResponse, GameScoreEntry, GameScoreRequest, GameScoreResponse,
    KanbanResponse, LikeRequest, LikeResponse, LiveCard, LiveStatusResponse, LogRequest,
    StartVotingRequest, StartVotingResponse, VoteRequest, VoteResponse, VotingOptionRef,
    VotingResult, VotingStateResponse, WorkStatus, DEFAULT_GAME_TYPE, KANBAN_COLUMNS,
    LEADERBOARD_SIZE,
};
