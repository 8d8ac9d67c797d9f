//! Live state service.
//!
//! All live state (broadcast hub, presence, voting round, work status, board
//! snapshot and recent log lines) is owned by a single task, [`LiveService`],
//! which handles one [`Command`] at a time. Everything else talks to it
//! through a cloneable [`LiveHandle`].

mod service;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use shared::{
    CardUpdatePayload, ClientMessage, EndVotingResponse, GameScoreRequest, GameScoreResponse,
    KanbanResponse, LikeResponse, LiveStatusResponse, LogRequest, StartVotingRequest, StartVotingResponse, VoteRequest,
    VoteResponse, VotingStateResponse, WorkStatus,
};

use crate::broadcast::{ConnectionId, Frame};
use crate::voting::VotingError;

pub use service::LiveService;

const COMMAND_BUFFER: usize = 1024;

#[derive(Debug, thiserror::Error)]
pub enum LiveError {
    #[error("live service stopped")]
    Stopped,
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// Read-only view of the live state for REST readers.
#[derive(Debug, Clone)]
pub struct LiveSnapshot {
    pub status: LiveStatusResponse,
    pub kanban: KanbanResponse,
    pub voting: VotingStateResponse,
}

/// Requests processed by the service loop, in arrival order.
pub enum Command {
    Connect {
        channel: String,
        sender: mpsc::Sender<Frame>,
        reply: oneshot::Sender<ConnectionId>,
    },
    Disconnect {
        id: ConnectionId,
    },
    Heartbeat {
        id: ConnectionId,
    },
    Inbound {
        id: ConnectionId,
        message: ClientMessage,
    },
    CastVote {
        request: VoteRequest,
        reply: oneshot::Sender<VoteResponse>,
    },
    StartVoting {
        request: StartVotingRequest,
        reply: oneshot::Sender<Result<StartVotingResponse, VotingError>>,
    },
    EndVoting {
        reply: oneshot::Sender<Option<EndVotingResponse>>,
    },
    SetStatus {
        status: WorkStatus,
    },
    Card {
        update: CardUpdatePayload,
    },
    Log {
        entry: LogRequest,
    },
    Like {
        project_id: String,
        session_id: String,
        reply: oneshot::Sender<anyhow::Result<Option<LikeResponse>>>,
    },
    GameScore {
        request: GameScoreRequest,
        reply: oneshot::Sender<anyhow::Result<GameScoreResponse>>,
    },
    Snapshot {
        reply: oneshot::Sender<LiveSnapshot>,
    },
}

/// Cheap handle to the live service.
#[derive(Clone)]
pub struct LiveHandle {
    tx: mpsc::Sender<Command>,
}

impl LiveHandle {
    /// Start `service` on its own task.
    pub fn spawn(service: LiveService) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let task = tokio::spawn(service.run(rx));
        (Self { tx }, task)
    }

    async fn send(&self, command: Command) -> Result<(), LiveError> {
        self.tx.send(command).await.map_err(|_| LiveError::Stopped)
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, LiveError> {
        let (reply, rx) = oneshot::channel();
        self.send(make(reply)).await?;
        rx.await.map_err(|_| LiveError::Stopped)
    }

    /// Subscribe a socket's outbound queue to `channel`.
    pub async fn connect(
        &self,
        channel: &str,
        sender: mpsc::Sender<Frame>,
    ) -> Result<ConnectionId, LiveError> {
        self.request(|reply| Command::Connect {
            channel: channel.to_string(),
            sender,
            reply,
        })
        .await
    }

    pub async fn disconnect(&self, id: ConnectionId) -> Result<(), LiveError> {
        self.send(Command::Disconnect { id }).await
    }

    pub async fn heartbeat(&self, id: ConnectionId) -> Result<(), LiveError> {
        self.send(Command::Heartbeat { id }).await
    }

    pub async fn inbound(&self, id: ConnectionId, message: ClientMessage) -> Result<(), LiveError> {
        self.send(Command::Inbound { id, message }).await
    }

    pub async fn cast_vote(&self, request: VoteRequest) -> Result<VoteResponse, LiveError> {
        self.request(|reply| Command::CastVote { request, reply })
            .await
    }

    pub async fn start_voting(
        &self,
        request: StartVotingRequest,
    ) -> Result<Result<StartVotingResponse, VotingError>, LiveError> {
        self.request(|reply| Command::StartVoting { request, reply })
            .await
    }

    pub async fn end_voting(&self) -> Result<Option<EndVotingResponse>, LiveError> {
        self.request(|reply| Command::EndVoting { reply }).await
    }

    pub async fn set_status(&self, status: WorkStatus) -> Result<(), LiveError> {
        self.send(Command::SetStatus { status }).await
    }

    pub async fn card(&self, update: CardUpdatePayload) -> Result<(), LiveError> {
        self.send(Command::Card { update }).await
    }

    pub async fn log(&self, entry: LogRequest) -> Result<(), LiveError> {
        self.send(Command::Log { entry }).await
    }

    /// Like a gallery project. `None` when the project does not exist.
    pub async fn like(
        &self,
        project_id: &str,
        session_id: &str,
    ) -> Result<Option<LikeResponse>, LiveError> {
        let outcome = self
            .request(|reply| Command::Like {
                project_id: project_id.to_string(),
                session_id: session_id.to_string(),
                reply,
            })
            .await?;
        Ok(outcome?)
    }

    /// Record a mini-game score. The player name must already be trimmed
    /// and the score positive.
    pub async fn submit_score(
        &self,
        request: GameScoreRequest,
    ) -> Result<GameScoreResponse, LiveError> {
        let outcome = self
            .request(|reply| Command::GameScore { request, reply })
            .await?;
        Ok(outcome?)
    }

    pub async fn snapshot(&self) -> Result<LiveSnapshot, LiveError> {
        self.request(|reply| Command::Snapshot { reply }).await
    }
}
