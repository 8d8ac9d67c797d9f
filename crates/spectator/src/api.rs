//! REST client for the hub's spectator endpoints.

use serde::de::DeserializeOwned;

use shared::{
    GalleryResponse, GameRankingResponse, GameScoreRequest, GameScoreResponse, KanbanResponse,
    LikeRequest, LikeResponse, LiveStatusResponse, VoteRequest, VoteResponse,
    VotingStateResponse,
};

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("hub returned {status}: {body}")]
    Status { status: u16, body: String },
}

#[derive(Clone)]
pub struct LiveApi {
    client: reqwest::Client,
    base_url: String,
}

impl LiveApi {
    /// `base_url` is the hub's HTTP root, e.g. `http://localhost:8080`.
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// WebSocket URL for a hub channel.
    pub fn ws_url(&self, channel: &str) -> String {
        let ws_base = if let Some(rest) = self.base_url.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = self.base_url.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            self.base_url.clone()
        };
        format!("{}/ws/{}", ws_base, channel)
    }

    pub async fn status(&self) -> Result<LiveStatusResponse, ApiError> {
        self.get("/api/live/status").await
    }

    pub async fn kanban(&self) -> Result<KanbanResponse, ApiError> {
        self.get("/api/live/kanban").await
    }

    pub async fn voting(&self) -> Result<VotingStateResponse, ApiError> {
        self.get("/api/live/voting").await
    }

    pub async fn projects(&self, limit: u32, offset: u32) -> Result<GalleryResponse, ApiError> {
        self.get(&format!("/api/live/projects?limit={}&offset={}", limit, offset))
            .await
    }

    pub async fn vote(&self, option_id: &str, session_id: &str) -> Result<VoteResponse, ApiError> {
        let res = self
            .client
            .post(format!("{}/api/live/vote", self.base_url))
            .json(&VoteRequest {
                option_id: option_id.to_string(),
                session_id: session_id.to_string(),
            })
            .send()
            .await?;
        read_json(res).await
    }

    pub async fn like(&self, project_id: &str, session_id: &str) -> Result<LikeResponse, ApiError> {
        let res = self
            .client
            .post(format!(
                "{}/api/live/projects/{}/like",
                self.base_url, project_id
            ))
            .json(&LikeRequest {
                session_id: session_id.to_string(),
            })
            .send()
            .await?;
        read_json(res).await
    }

    pub async fn ranking(&self, game_type: &str, limit: u32) -> Result<GameRankingResponse, ApiError> {
        let res = self
            .client
            .get(format!("{}/api/live/game/ranking", self.base_url))
            .query(&[("gameType", game_type.to_string()), ("limit", limit.to_string())])
            .send()
            .await?;
        read_json(res).await
    }

    pub async fn submit_score(
        &self,
        player_name: &str,
        score: i64,
        game_type: &str,
        session_id: &str,
    ) -> Result<GameScoreResponse, ApiError> {
        let res = self
            .client
            .post(format!("{}/api/live/game/score", self.base_url))
            .json(&GameScoreRequest {
                player_name: player_name.to_string(),
                score,
                game_type: Some(game_type.to_string()),
                session_id: Some(session_id.to_string()),
            })
            .send()
            .await?;
        read_json(res).await
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let res = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .send()
            .await?;
        read_json(res).await
    }
}

async fn read_json<T: DeserializeOwned>(res: reqwest::Response) -> Result<T, ApiError> {
    let status = res.status();
    if !status.is_success() {
        let body = res.text().await.unwrap_or_default();
        return Err(ApiError::Status {
            status: status.as_u16(),
            body,
        });
    }
    Ok(res.json().await?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ws_url_follows_scheme() {
        assert_eq!(
            LiveApi::new("http://localhost:8080/").ws_url("live"),
            "ws://localhost:8080/ws/live"
        );
        assert_eq!(
            LiveApi::new("https://board.example.org").ws_url("chat"),
            "wss://board.example.org/ws/chat"
        );
    }
}
