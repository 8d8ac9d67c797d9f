//! Drives a [`LiveView`] from the socket, a one-second countdown and REST.

use std::ops::ControlFlow;

use tokio::sync::mpsc;
use tokio::time::{Duration, MissedTickBehavior};

use shared::{
    ChatPayload, ClientMessage, Envelope, GameScoreResponse, LikeResponse, LiveEvent, VoteRequest,
    VoteResponse, DEFAULT_GAME_TYPE, LEADERBOARD_SIZE,
};

use crate::api::{ApiError, LiveApi};
use crate::connection::{ConnectionManager, ConnectionState, SendError, SendStatus};
use crate::session::SessionToken;
use crate::view::LiveView;

pub struct LiveController {
    api: LiveApi,
    session: SessionToken,
    connection: ConnectionManager,
    inbound: mpsc::Receiver<Envelope>,
    view: LiveView,
}

impl LiveController {
    pub fn new(
        api: LiveApi,
        session: SessionToken,
        connection: ConnectionManager,
        inbound: mpsc::Receiver<Envelope>,
    ) -> Self {
        Self {
            api,
            session,
            connection,
            inbound,
            view: LiveView::default(),
        }
    }

    pub fn view(&self) -> &LiveView {
        &self.view
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    /// Replace status, board, round and leaderboard with the REST snapshot.
    /// Run on first load and after every reconnect, since events missed
    /// while offline are not replayed.
    pub async fn reconcile(&mut self) -> Result<(), ApiError> {
        let (status, board, voting, ranking) = tokio::try_join!(
            self.api.status(),
            self.api.kanban(),
            self.api.voting(),
            self.api.ranking(DEFAULT_GAME_TYPE, LEADERBOARD_SIZE)
        )?;
        self.view.apply_status(status);
        self.view.apply_kanban(board);
        self.view.apply_voting(voting);
        self.view.apply_ranking(ranking);
        Ok(())
    }

    /// Fold events until `render` breaks or the connection gives up.
    /// `render` sees the view after every change.
    pub async fn run<F>(&mut self, mut render: F) -> anyhow::Result<()>
    where
        F: FnMut(&LiveView, ConnectionState) -> ControlFlow<()>,
    {
        let mut state_rx = self.connection.watch_state();
        let mut countdown = tokio::time::interval(Duration::from_secs(1));
        countdown.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // interval fires immediately; the countdown starts one second in
        countdown.tick().await;

        if let Err(e) = self.reconcile().await {
            tracing::warn!(error = %e, "initial snapshot failed");
        }
        if render(&self.view, self.connection.state()).is_break() {
            return Ok(());
        }

        loop {
            tokio::select! {
                envelope = self.inbound.recv() => {
                    let Some(envelope) = envelope else { return Ok(()) };
                    match LiveEvent::from_envelope(&envelope) {
                        Ok(event) => self.view.apply(event),
                        Err(e) => {
                            tracing::warn!(error = %e, "ignoring server event");
                            continue;
                        }
                    }
                }
                _ = countdown.tick() => {
                    if self.view.voting.is_none() {
                        continue;
                    }
                    self.view.tick();
                }
                changed = state_rx.changed() => {
                    if changed.is_err() {
                        return Ok(());
                    }
                    let state = *state_rx.borrow_and_update();
                    match state {
                        ConnectionState::Connected => {
                            if let Err(e) = self.reconcile().await {
                                tracing::warn!(error = %e, "snapshot after reconnect failed");
                            }
                        }
                        ConnectionState::Error => {
                            let _ = render(&self.view, state);
                            anyhow::bail!("gave up reconnecting to {}", self.api.base_url());
                        }
                        _ => {}
                    }
                }
            }
            if render(&self.view, self.connection.state()).is_break() {
                return Ok(());
            }
        }
    }

    pub async fn vote(&self, option_id: &str) -> Result<VoteResponse, ApiError> {
        self.api.vote(option_id, self.session.as_str()).await
    }

    /// Vote over the socket; the answer arrives as a `vote_result` event.
    pub fn vote_over_socket(&self, option_id: &str) -> Result<SendStatus, SendError> {
        self.connection.send(&ClientMessage::Vote(VoteRequest {
            option_id: option_id.to_string(),
            session_id: self.session.as_str().to_string(),
        }))
    }

    pub fn chat(&self, text: &str) -> Result<SendStatus, SendError> {
        self.connection.send(&ClientMessage::Chat(ChatPayload {
            session_id: self.session.as_str().to_string(),
            text: text.to_string(),
        }))
    }

    pub async fn load_gallery(&mut self, limit: u32, offset: u32) -> Result<(), ApiError> {
        let gallery = self.api.projects(limit, offset).await?;
        self.view.apply_gallery(gallery);
        Ok(())
    }

    /// Submit a score for the live page's game. The leaderboard itself
    /// changes through the `game_ranking_update` event.
    pub async fn submit_score(
        &self,
        player_name: &str,
        score: i64,
    ) -> Result<GameScoreResponse, ApiError> {
        self.api
            .submit_score(player_name, score, DEFAULT_GAME_TYPE, self.session.as_str())
            .await
    }

    pub async fn like(&mut self, project_id: &str) -> Result<LikeResponse, ApiError> {
        let res = self.api.like(project_id, self.session.as_str()).await?;
        if let Some(project) = self.view.gallery.iter_mut().find(|p| p.id == project_id) {
            project.like_count = res.new_like_count;
        }
        Ok(res)
    }
}
