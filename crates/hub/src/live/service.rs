//! The live service loop.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use chrono::Utc;
use rusqlite::Connection;
use tokio::sync::mpsc;
use tokio::time::{Duration, Instant, MissedTickBehavior};
use uuid::Uuid;

use shared::{
    channels, wire_timestamp, CardUpdatePayload, ChatMessagePayload, ChatPayload, ClientMessage,
    EndVotingResponse, GameRankingPayload, GameScoreEntry, GameScoreRequest, GameScoreResponse,
    KanbanResponse, LikeResponse, LiveCard, LiveEvent, LiveStatusResponse, LogEntryPayload,
    PresencePayload, ProjectLikedPayload, StartVotingRequest, StartVotingResponse, VoteRequest,
    VoteResponse, VotingEndedPayload, VotingUpdatePayload, WorkStatus, DEFAULT_GAME_TYPE,
    KANBAN_COLUMNS, LEADERBOARD_SIZE,
};

use super::{Command, LiveSnapshot};
use crate::broadcast::{BroadcastHub, ConnectionId, Delivery, Frame, PresenceChange};
use crate::config::Config;
use crate::db::{self, Db};
use crate::voting::{RoundClosed, VotingError, VotingMachine, DEFAULT_OPTIONS};

/// Log lines replayed to a newly connected spectator.
const INITIAL_LOG_LINES: usize = 20;
const MAX_CHAT_LEN: usize = 500;
/// Chat pseudonym length, taken from the session token.
const AUTHOR_LEN: usize = 8;

/// Owner of all live state. Runs on one task; see [`super::LiveHandle`].
pub struct LiveService {
    config: Arc<Config>,
    db: Arc<Db>,
    hub: BroadcastHub,
    voting: VotingMachine,
    status: WorkStatus,
    cards: BTreeMap<String, LiveCard>,
    recent_logs: VecDeque<LogEntryPayload>,
}

impl LiveService {
    pub fn new(config: Arc<Config>, db: Arc<Db>) -> Self {
        Self {
            config,
            db,
            hub: BroadcastHub::new(),
            voting: VotingMachine::new(),
            status: WorkStatus::default(),
            cards: BTreeMap::new(),
            recent_logs: VecDeque::new(),
        }
    }

    /// Pick up a round left open by a previous run. A round whose deadline
    /// passed while the process was down is closed from its stored ballots.
    pub fn restore(&mut self) -> anyhow::Result<()> {
        let stored = {
            let conn = self.db.conn()?;
            db::load_open_round(&conn)?
        };
        if let Some(stored) = stored {
            self.voting.resume(stored, Instant::now(), Utc::now());
            if self.voting.is_due(Instant::now()) {
                self.close_round();
            }
        }
        Ok(())
    }

    pub(super) async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        let timeout = self.config.heartbeat_timeout();
        let mut sweep = tokio::time::interval((timeout / 2).max(Duration::from_secs(1)));
        sweep.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            let deadline = self.voting.deadline();
            tokio::select! {
                biased;
                _ = deadline_reached(deadline) => {
                    self.close_round();
                }
                _ = sweep.tick() => {
                    let dropped = self.hub.sweep_stale(Instant::now(), timeout);
                    self.announce_presence(dropped);
                }
                command = commands.recv() => match command {
                    Some(command) => self.handle(command),
                    None => break,
                },
            }
        }
        tracing::info!("live service stopped");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Connect {
                channel,
                sender,
                reply,
            } => {
                let id = self.connect(&channel, sender);
                let _ = reply.send(id);
            }
            Command::Disconnect { id } => {
                if let Some(change) = self.hub.unsubscribe(id) {
                    self.announce_presence(vec![change]);
                }
            }
            Command::Heartbeat { id } => {
                self.hub.heartbeat(id, Instant::now());
            }
            Command::Inbound { id, message } => self.inbound(id, message),
            Command::CastVote { request, reply } => {
                let response = self.cast_vote(&request);
                let _ = reply.send(response);
            }
            Command::StartVoting { request, reply } => {
                let _ = reply.send(self.open_round(request));
            }
            Command::EndVoting { reply } => {
                let ended = self.close_round().map(|closed| EndVotingResponse {
                    winner: closed.winner,
                    results: closed.results,
                });
                let _ = reply.send(ended);
            }
            Command::SetStatus { status } => {
                self.status = status;
                self.broadcast(&[channels::LIVE], &LiveEvent::Status(self.status.clone()));
            }
            Command::Card { update } => self.apply_card(update),
            Command::Log { entry } => {
                let log_type = entry.log_type.unwrap_or_else(|| "info".to_string());
                self.push_log(log_type, entry.content);
            }
            Command::Like {
                project_id,
                session_id,
                reply,
            } => {
                let _ = reply.send(self.like(&project_id, &session_id));
            }
            Command::GameScore { request, reply } => {
                let _ = reply.send(self.submit_score(request));
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    fn connect(&mut self, channel: &str, sender: mpsc::Sender<Frame>) -> ConnectionId {
        let (id, change) = self.hub.subscribe(channel, sender, Instant::now());
        self.announce_presence(vec![change]);

        match channel {
            channels::LIVE => {
                self.send_to(id, &LiveEvent::Status(self.status.clone()));
                if let Some(started) = self.voting.started_payload(Instant::now()) {
                    self.send_to(id, &LiveEvent::VotingStarted(started));
                }
                self.send_recent_logs(id);
            }
            channels::LOGS => self.send_recent_logs(id),
            _ => {}
        }
        id
    }

    fn inbound(&mut self, id: ConnectionId, message: ClientMessage) {
        if !self.hub.heartbeat(id, Instant::now()) {
            return;
        }
        match message {
            ClientMessage::Ping => self.send_to(id, &LiveEvent::Pong),
            ClientMessage::Vote(request) => {
                let response = self.cast_vote(&request);
                self.send_to(id, &LiveEvent::VoteResult(response));
            }
            ClientMessage::Chat(chat) => self.chat(chat),
        }
    }

    fn chat(&mut self, chat: ChatPayload) {
        let text = chat.text.trim();
        if text.is_empty() || chat.session_id.is_empty() {
            return;
        }
        let message = ChatMessagePayload {
            author: chat.session_id.chars().take(AUTHOR_LEN).collect(),
            text: text.chars().take(MAX_CHAT_LEN).collect(),
            sent_at: wire_timestamp(Utc::now()),
        };
        self.broadcast(&[channels::CHAT], &LiveEvent::Chat(message));
    }

    fn cast_vote(&mut self, request: &VoteRequest) -> VoteResponse {
        if request.session_id.trim().is_empty() {
            return VoteResponse {
                success: false,
                message: "session id required".to_string(),
                new_vote_count: None,
            };
        }
        match self
            .voting
            .cast_vote(&request.session_id, &request.option_id, Instant::now())
        {
            Ok(outcome) => {
                if outcome.changed() {
                    self.persist("ballot", |conn| {
                        db::upsert_ballot(
                            conn,
                            &outcome.round_id,
                            &request.session_id,
                            &request.option_id,
                            Utc::now(),
                        )
                    });
                    let update = VotingUpdatePayload {
                        votes: outcome.delta.clone(),
                    };
                    self.broadcast(&[channels::LIVE], &LiveEvent::VotingUpdate(update));
                }
                VoteResponse {
                    success: true,
                    message: "Vote recorded".to_string(),
                    new_vote_count: Some(outcome.option_count),
                }
            }
            Err(e) => {
                tracing::debug!(session = %request.session_id, error = %e, "ballot rejected");
                if e == VotingError::Expired {
                    self.close_round();
                }
                VoteResponse {
                    success: false,
                    message: e.to_string(),
                    new_vote_count: None,
                }
            }
        }
    }

    fn open_round(
        &mut self,
        request: StartVotingRequest,
    ) -> Result<StartVotingResponse, VotingError> {
        let labels: Vec<String> = request
            .options
            .map(|options| {
                options
                    .into_iter()
                    .map(|label| label.trim().to_string())
                    .filter(|label| !label.is_empty())
                    .collect::<Vec<_>>()
            })
            .filter(|options| !options.is_empty())
            .unwrap_or_else(|| DEFAULT_OPTIONS.iter().map(|s| s.to_string()).collect());
        let secs = request
            .duration_seconds
            .unwrap_or(self.config.voting_duration_secs)
            .max(1);

        let opened = self.voting.open(
            &labels,
            Duration::from_secs(secs),
            Instant::now(),
            Utc::now(),
        )?;
        self.persist("voting round", |conn| db::insert_round(conn, &opened));
        self.broadcast(
            &[channels::LIVE],
            &LiveEvent::VotingStarted(opened.started_payload()),
        );
        self.push_log(
            "vote".to_string(),
            format!("Voting started: {} ({}s)", labels.join(", "), secs),
        );

        Ok(StartVotingResponse {
            round_id: opened.round_id,
            ends_at: wire_timestamp(opened.ends_at),
            duration_seconds: opened.duration_seconds,
            options: opened.options,
        })
    }

    /// Close the open round, if any. Both the deadline and an admin end up
    /// here; only the first one finds a round.
    fn close_round(&mut self) -> Option<RoundClosed> {
        let closed = self.voting.close()?;
        self.persist("round close", |conn| {
            db::close_round(conn, &closed, Utc::now())
        });
        self.broadcast(
            &[channels::LIVE],
            &LiveEvent::VotingEnded(VotingEndedPayload {
                round_id: Some(closed.round_id.clone()),
                winner: closed.winner.clone(),
                results: closed.results.clone(),
            }),
        );
        let line = match &closed.winner {
            Some(winner) => format!(
                "Voting ended: {} wins with {} votes",
                winner.label, winner.vote_count
            ),
            None => "Voting ended with no votes".to_string(),
        };
        self.push_log("vote".to_string(), line);
        Some(closed)
    }

    fn apply_card(&mut self, update: CardUpdatePayload) {
        self.cards.insert(update.card.id.clone(), update.card.clone());
        self.broadcast(&[channels::CARDS, channels::LIVE], &LiveEvent::Card(update));
    }

    fn push_log(&mut self, log_type: String, content: String) {
        let entry = LogEntryPayload {
            log_type,
            content,
            timestamp: wire_timestamp(Utc::now()),
        };
        let capacity = self.config.recent_log_capacity;
        if capacity > 0 {
            while self.recent_logs.len() >= capacity {
                self.recent_logs.pop_front();
            }
            self.recent_logs.push_back(entry.clone());
        }
        self.broadcast(&[channels::LOGS, channels::LIVE], &LiveEvent::Log(entry));
    }

    fn like(&mut self, project_id: &str, session_id: &str) -> anyhow::Result<Option<LikeResponse>> {
        let (inserted, count) = {
            let conn = self.db.conn()?;
            if !db::project_exists(&conn, project_id)? {
                return Ok(None);
            }
            db::like_project(&conn, project_id, session_id)?
        };
        if inserted {
            self.broadcast(
                &[channels::LIVE],
                &LiveEvent::ProjectLiked(ProjectLikedPayload {
                    project_id: project_id.to_string(),
                    like_count: count,
                }),
            );
        }
        Ok(Some(LikeResponse {
            success: inserted,
            message: if inserted {
                "Project liked".to_string()
            } else {
                "Already liked".to_string()
            },
            new_like_count: count,
        }))
    }

    /// Store a score. A score that makes the leaderboard is announced to
    /// live spectators and in the log stream.
    fn submit_score(&mut self, request: GameScoreRequest) -> anyhow::Result<GameScoreResponse> {
        let game_type = request
            .game_type
            .map(|g| g.trim().to_string())
            .filter(|g| !g.is_empty())
            .unwrap_or_else(|| DEFAULT_GAME_TYPE.to_string());
        let session_id = request
            .session_id
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let entry = GameScoreEntry {
            id: Uuid::new_v4().to_string(),
            player_name: request.player_name,
            score: request.score,
            game_type,
            created_at: wire_timestamp(Utc::now()),
        };
        let rank = {
            let conn = self.db.conn()?;
            db::insert_score(&conn, &entry, &session_id)?;
            db::score_rank(&conn, &entry.game_type, entry.score)?
        };
        tracing::info!(game = %entry.game_type, score = entry.score, rank, "game score recorded");

        if rank <= u64::from(LEADERBOARD_SIZE) {
            let (log_type, line) = if rank == 1 {
                (
                    "success",
                    format!(
                        "New record! {} scored {} pts in {}!",
                        entry.player_name, entry.score, entry.game_type
                    ),
                )
            } else {
                (
                    "info",
                    format!(
                        "{} entered the top {} with {} pts!",
                        entry.player_name, rank, entry.score
                    ),
                )
            };
            self.broadcast(
                &[channels::LIVE],
                &LiveEvent::GameRanking(GameRankingPayload {
                    entry: entry.clone(),
                    rank,
                }),
            );
            self.push_log(log_type.to_string(), line);
        }

        Ok(GameScoreResponse {
            success: true,
            score_id: entry.id,
            rank,
        })
    }

    fn snapshot(&self) -> LiveSnapshot {
        let mut columns: BTreeMap<String, Vec<LiveCard>> = KANBAN_COLUMNS
            .iter()
            .map(|column| (column.to_string(), Vec::new()))
            .collect();
        for card in self.cards.values() {
            if let Some(cards) = columns.get_mut(&card.column_id) {
                cards.push(card.clone());
            }
        }
        for cards in columns.values_mut() {
            cards.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        }
        let total_cards = columns.values().map(Vec::len).sum();

        LiveSnapshot {
            status: LiveStatusResponse {
                status: self.status.clone(),
                spectator_count: self.hub.presence(channels::LIVE),
            },
            kanban: KanbanResponse {
                columns,
                total_cards,
            },
            voting: self.voting.state(Instant::now()),
        }
    }

    fn send_recent_logs(&mut self, id: ConnectionId) {
        let skip = self.recent_logs.len().saturating_sub(INITIAL_LOG_LINES);
        let lines: Vec<LogEntryPayload> = self.recent_logs.iter().skip(skip).cloned().collect();
        for line in lines {
            self.send_to(id, &LiveEvent::Log(line));
        }
    }

    fn send_to(&mut self, id: ConnectionId, event: &LiveEvent) {
        let Some(frame) = encode(event) else {
            return;
        };
        if let Delivery::Dropped(change) = self.hub.send_to(id, frame) {
            self.announce_presence(vec![change]);
        }
    }

    fn broadcast(&mut self, targets: &[&str], event: &LiveEvent) {
        let Some(frame) = encode(event) else {
            return;
        };
        let mut dropped = Vec::new();
        for channel in targets {
            dropped.extend(self.hub.publish(channel, &frame));
        }
        self.announce_presence(dropped);
    }

    /// Publish presence for every change. Publishing can drop more
    /// connections, whose changes are published in turn.
    fn announce_presence(&mut self, changes: Vec<PresenceChange>) {
        let mut pending: VecDeque<PresenceChange> = changes.into();
        while let Some(change) = pending.pop_front() {
            let event = LiveEvent::Presence(PresencePayload {
                count: change.count,
            });
            let Some(frame) = encode(&event) else {
                continue;
            };
            pending.extend(self.hub.publish(&change.channel, &frame));
        }
    }

    /// Storage failures are logged; in-memory state stays authoritative.
    fn persist(&self, what: &str, op: impl FnOnce(&Connection) -> anyhow::Result<()>) {
        let result = self.db.conn().and_then(|conn| op(&*conn));
        if let Err(e) = result {
            tracing::error!(error = %e, "failed to persist {}", what);
        }
    }
}

fn encode(event: &LiveEvent) -> Option<Frame> {
    match event.to_envelope(Utc::now()).and_then(|env| env.encode()) {
        Ok(text) => Some(Frame::from(text)),
        Err(e) => {
            tracing::error!(error = %e, message_type = event.message_type(), "failed to encode event");
            None
        }
    }
}

async fn deadline_reached(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
