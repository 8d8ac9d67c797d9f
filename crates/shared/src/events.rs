//! WebSocket envelope and live event payloads.
//!
//! Every frame on a live channel is a JSON [`Envelope`] whose `type` selects
//! the payload shape. Server frames decode into [`LiveEvent`], client frames
//! into [`ClientMessage`].

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::models::{
    CardAction, GameScoreEntry, LiveCard, VoteRequest, VoteResponse, VotingOptionRef,
    VotingResult, WorkStatus,
};

/// Current envelope version.
pub const ENVELOPE_VERSION: u8 = 1;

/// WebSocket message envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(default)]
    pub version: u8,
    pub r#type: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emitted_at: Option<String>,
}

impl Envelope {
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(ProtocolError::Malformed)
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    fn payload_as<T: DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        serde_json::from_value(self.payload.clone()).map_err(|source| {
            ProtocolError::InvalidPayload {
                message_type: self.r#type.clone(),
                source,
            }
        })
    }
}

/// Format a timestamp the way it travels on the wire.
pub fn wire_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Message types.
pub mod ws_types {
    // server -> client
    pub const PRESENCE_UPDATE: &str = "presence_update";
    pub const STATUS_UPDATE: &str = "status_update";
    pub const CARD_UPDATE: &str = "card_update";
    pub const LOG_ENTRY: &str = "log_entry";
    pub const VOTING_STARTED: &str = "voting_started";
    pub const VOTING_UPDATE: &str = "voting_update";
    pub const VOTING_ENDED: &str = "voting_ended";
    pub const PROJECT_LIKED: &str = "project_liked";
    pub const CHAT_MESSAGE: &str = "chat_message";
    pub const VOTE_RESULT: &str = "vote_result";
    pub const GAME_RANKING_UPDATE: &str = "game_ranking_update";
    pub const PONG: &str = "pong";
    // client -> server
    pub const PING: &str = "ping";
    pub const VOTE: &str = "vote";
    pub const CHAT: &str = "chat";
}

/// Broadcast channel names. One socket subscribes to exactly one channel.
pub mod channels {
    pub const LIVE: &str = "live";
    pub const CARDS: &str = "cards";
    pub const LOGS: &str = "logs";
    pub const CHAT: &str = "chat";

    pub const ALL: [&str; 4] = [LIVE, CARDS, LOGS, CHAT];

    pub fn is_known(channel: &str) -> bool {
        ALL.contains(&channel)
    }
}

/// Protocol fault while decoding a frame. The frame is discarded; the
/// connection stays up.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Malformed(#[source] serde_json::Error),
    #[error("unknown message type: {0}")]
    UnknownType(String),
    #[error("invalid {message_type} payload: {source}")]
    InvalidPayload {
        message_type: String,
        #[source]
        source: serde_json::Error,
    },
}

/// presence_update payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresencePayload {
    pub count: u64,
}

/// card_update payload. Always carries the complete card.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardUpdatePayload {
    pub action: CardAction,
    pub card: LiveCard,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_column: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_column: Option<String>,
}

/// log_entry payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntryPayload {
    pub log_type: String,
    pub content: String,
    pub timestamp: String,
}

/// voting_started payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VotingStartedPayload {
    pub round_id: String,
    pub options: Vec<VotingOptionRef>,
    pub ends_at: String,
    pub duration_seconds: u64,
}

/// voting_update payload: tallies of the options that changed, not the full state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VotingUpdatePayload {
    pub votes: BTreeMap<String, u64>,
}

/// voting_ended payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VotingEndedPayload {
    #[serde(default)]
    pub round_id: Option<String>,
    pub winner: Option<VotingResult>,
    pub results: Vec<VotingResult>,
}

/// project_liked payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectLikedPayload {
    pub project_id: String,
    pub like_count: u64,
}

/// game_ranking_update payload: a new score that made the leaderboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameRankingPayload {
    pub entry: GameScoreEntry,
    pub rank: u64,
}

/// chat payload sent by a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatPayload {
    pub session_id: String,
    pub text: String,
}

/// chat_message payload re-broadcast to the chat channel. `author` is a short
/// pseudonym derived from the session token, never the token itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessagePayload {
    pub author: String,
    pub text: String,
    pub sent_at: String,
}

/// Server-to-client event.
#[derive(Debug, Clone, PartialEq)]
pub enum LiveEvent {
    Presence(PresencePayload),
    Status(WorkStatus),
    Card(CardUpdatePayload),
    Log(LogEntryPayload),
    VotingStarted(VotingStartedPayload),
    VotingUpdate(VotingUpdatePayload),
    VotingEnded(VotingEndedPayload),
    ProjectLiked(ProjectLikedPayload),
    Chat(ChatMessagePayload),
    VoteResult(VoteResponse),
    GameRanking(GameRankingPayload),
    Pong,
}

impl LiveEvent {
    pub fn message_type(&self) -> &'static str {
        match self {
            Self::Presence(_) => ws_types::PRESENCE_UPDATE,
            Self::Status(_) => ws_types::STATUS_UPDATE,
            Self::Card(_) => ws_types::CARD_UPDATE,
            Self::Log(_) => ws_types::LOG_ENTRY,
            Self::VotingStarted(_) => ws_types::VOTING_STARTED,
            Self::VotingUpdate(_) => ws_types::VOTING_UPDATE,
            Self::VotingEnded(_) => ws_types::VOTING_ENDED,
            Self::ProjectLiked(_) => ws_types::PROJECT_LIKED,
            Self::Chat(_) => ws_types::CHAT_MESSAGE,
            Self::VoteResult(_) => ws_types::VOTE_RESULT,
            Self::GameRanking(_) => ws_types::GAME_RANKING_UPDATE,
            Self::Pong => ws_types::PONG,
        }
    }

    pub fn to_envelope(&self, emitted_at: DateTime<Utc>) -> Result<Envelope, serde_json::Error> {
        let payload = match self {
            Self::Presence(p) => serde_json::to_value(p)?,
            Self::Status(p) => serde_json::to_value(p)?,
            Self::Card(p) => serde_json::to_value(p)?,
            Self::Log(p) => serde_json::to_value(p)?,
            Self::VotingStarted(p) => serde_json::to_value(p)?,
            Self::VotingUpdate(p) => serde_json::to_value(p)?,
            Self::VotingEnded(p) => serde_json::to_value(p)?,
            Self::ProjectLiked(p) => serde_json::to_value(p)?,
            Self::Chat(p) => serde_json::to_value(p)?,
            Self::VoteResult(p) => serde_json::to_value(p)?,
            Self::GameRanking(p) => serde_json::to_value(p)?,
            Self::Pong => serde_json::Value::Object(Default::default()),
        };
        Ok(Envelope {
            version: ENVELOPE_VERSION,
            r#type: self.message_type().to_string(),
            payload,
            emitted_at: Some(wire_timestamp(emitted_at)),
        })
    }

    pub fn from_envelope(envelope: &Envelope) -> Result<Self, ProtocolError> {
        let event = match envelope.r#type.as_str() {
            ws_types::PRESENCE_UPDATE => Self::Presence(envelope.payload_as()?),
            ws_types::STATUS_UPDATE => Self::Status(envelope.payload_as()?),
            ws_types::CARD_UPDATE => Self::Card(envelope.payload_as()?),
            ws_types::LOG_ENTRY => Self::Log(envelope.payload_as()?),
            ws_types::VOTING_STARTED => Self::VotingStarted(envelope.payload_as()?),
            ws_types::VOTING_UPDATE => Self::VotingUpdate(envelope.payload_as()?),
            ws_types::VOTING_ENDED => Self::VotingEnded(envelope.payload_as()?),
            ws_types::PROJECT_LIKED => Self::ProjectLiked(envelope.payload_as()?),
            ws_types::CHAT_MESSAGE => Self::Chat(envelope.payload_as()?),
            ws_types::VOTE_RESULT => Self::VoteResult(envelope.payload_as()?),
            ws_types::GAME_RANKING_UPDATE => Self::GameRanking(envelope.payload_as()?),
            ws_types::PONG => Self::Pong,
            other => return Err(ProtocolError::UnknownType(other.to_string())),
        };
        Ok(event)
    }
}

/// Client-to-server message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    Ping,
    Vote(VoteRequest),
    Chat(ChatPayload),
}

impl ClientMessage {
    pub fn message_type(&self) -> &'static str {
        match self {
            Self::Ping => ws_types::PING,
            Self::Vote(_) => ws_types::VOTE,
            Self::Chat(_) => ws_types::CHAT,
        }
    }

    pub fn to_envelope(&self) -> Result<Envelope, serde_json::Error> {
        let payload = match self {
            Self::Ping => serde_json::Value::Null,
            Self::Vote(p) => serde_json::to_value(p)?,
            Self::Chat(p) => serde_json::to_value(p)?,
        };
        Ok(Envelope {
            version: ENVELOPE_VERSION,
            r#type: self.message_type().to_string(),
            payload,
            emitted_at: None,
        })
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        self.to_envelope()?.encode()
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let envelope = Envelope::decode(text)?;
        match envelope.r#type.as_str() {
            ws_types::PING => Ok(Self::Ping),
            ws_types::VOTE => Ok(Self::Vote(envelope.payload_as()?)),
            ws_types::CHAT => Ok(Self::Chat(envelope.payload_as()?)),
            other => Err(ProtocolError::UnknownType(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn presence_envelope_shape() {
        let env = LiveEvent::Presence(PresencePayload { count: 4 })
            .to_envelope(fixed_time())
            .unwrap();
        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(json["type"], "presence_update");
        assert_eq!(json["payload"]["count"], 4);
        assert_eq!(json["emittedAt"], "2025-01-01T12:00:00.000Z");
        assert_eq!(json["version"], 1);
    }

    #[test]
    fn card_update_omits_absent_columns() {
        let card = LiveCard {
            id: "c1".to_string(),
            title: "Write docs".to_string(),
            description: None,
            column_id: "backlog".to_string(),
            created_at: "2025-01-01T00:00:00Z".to_string(),
        };
        let env = LiveEvent::Card(CardUpdatePayload {
            action: CardAction::Created,
            card,
            from_column: None,
            to_column: None,
        })
        .to_envelope(fixed_time())
        .unwrap();
        assert_eq!(env.payload["action"], "created");
        assert!(env.payload.get("fromColumn").is_none());
        assert_eq!(env.payload["card"]["columnId"], "backlog");
    }

    #[test]
    fn voting_ended_decodes_null_winner() {
        let text = r#"{"type":"voting_ended","payload":{"winner":null,"results":[{"id":"a","label":"A","voteCount":0}]}}"#;
        let env = Envelope::decode(text).unwrap();
        let event = LiveEvent::from_envelope(&env).unwrap();
        match event {
            LiveEvent::VotingEnded(p) => {
                assert!(p.winner.is_none());
                assert!(p.round_id.is_none());
                assert_eq!(p.results[0].vote_count, 0);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn ranking_update_carries_entry_and_rank() {
        let text = r#"{"type":"game_ranking_update","payload":{"rank":2,"entry":{"id":"g1","playerName":"ana","score":40,"gameType":"snake","createdAt":"2025-01-01T12:00:00.000Z"}}}"#;
        let env = Envelope::decode(text).unwrap();
        match LiveEvent::from_envelope(&env).unwrap() {
            LiveEvent::GameRanking(p) => {
                assert_eq!(p.rank, 2);
                assert_eq!(p.entry.player_name, "ana");
                assert_eq!(p.entry.score, 40);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn unknown_type_is_protocol_fault() {
        let env = Envelope::decode(r#"{"type":"confetti","payload":{}}"#).unwrap();
        let err = LiveEvent::from_envelope(&env).unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownType(t) if t == "confetti"));
    }

    #[test]
    fn wrong_payload_shape_is_protocol_fault() {
        let env =
            Envelope::decode(r#"{"type":"presence_update","payload":{"count":"many"}}"#).unwrap();
        let err = LiveEvent::from_envelope(&env).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidPayload { .. }));
    }

    #[test]
    fn malformed_json_is_protocol_fault() {
        assert!(matches!(
            Envelope::decode("{not json"),
            Err(ProtocolError::Malformed(_))
        ));
    }

    #[test]
    fn bare_ping_decodes() {
        assert_eq!(
            ClientMessage::decode(r#"{"type":"ping"}"#).unwrap(),
            ClientMessage::Ping
        );
    }

    #[test]
    fn client_vote_encodes_session_token() {
        let text = ClientMessage::Vote(VoteRequest {
            option_id: "o1".to_string(),
            session_id: "s1".to_string(),
        })
        .encode()
        .unwrap();
        let json: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(json["type"], "vote");
        assert_eq!(json["payload"]["sessionId"], "s1");
        assert!(json.get("emittedAt").is_none());
    }

    #[test]
    fn known_channels() {
        assert!(channels::is_known("live"));
        assert!(channels::is_known("chat"));
        assert!(!channels::is_known("admin"));
    }
}
