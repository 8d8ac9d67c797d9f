//! Live page view model.
//!
//! [`LiveView`] is a pure fold of server events plus REST snapshots. It owns
//! no I/O; the controller feeds it and renders it.

use std::collections::{BTreeMap, VecDeque};

use shared::{
    CardAction, ChatMessagePayload, CompletedProject, GalleryResponse, GameRankingResponse,
    GameScoreEntry, KanbanResponse, LiveCard, LiveEvent, LiveStatusResponse, LogEntryPayload,
    VoteResponse, VotingEndedPayload, VotingResult, VotingStateResponse, WorkStatus,
    DEFAULT_GAME_TYPE, KANBAN_COLUMNS, LEADERBOARD_SIZE,
};

pub const DEFAULT_LOG_CAPACITY: usize = 50;
const CHAT_CAPACITY: usize = 50;

/// An open round as the spectator sees it.
#[derive(Debug, Clone, PartialEq)]
pub struct VotingView {
    pub round_id: String,
    pub options: Vec<VotingResult>,
    pub ends_at: String,
    /// Local countdown; display only.
    pub remaining_seconds: u64,
}

impl VotingView {
    pub fn total_votes(&self) -> u64 {
        self.options.iter().map(|o| o.vote_count).sum()
    }
}

#[derive(Debug, Clone)]
pub struct LiveView {
    pub status: WorkStatus,
    pub spectators: u64,
    cards: BTreeMap<String, LiveCard>,
    logs: VecDeque<LogEntryPayload>,
    log_capacity: usize,
    chat: VecDeque<ChatMessagePayload>,
    pub voting: Option<VotingView>,
    pub last_result: Option<VotingEndedPayload>,
    /// Answer to this spectator's last socket vote.
    pub last_vote: Option<VoteResponse>,
    pub gallery: Vec<CompletedProject>,
    pub gallery_total: u64,
    /// Mini-game leaderboard, best first.
    ranking: Vec<GameScoreEntry>,
}

impl Default for LiveView {
    fn default() -> Self {
        Self::with_log_capacity(DEFAULT_LOG_CAPACITY)
    }
}

impl LiveView {
    pub fn with_log_capacity(log_capacity: usize) -> Self {
        Self {
            status: WorkStatus::default(),
            spectators: 0,
            cards: BTreeMap::new(),
            logs: VecDeque::new(),
            log_capacity: log_capacity.max(1),
            chat: VecDeque::new(),
            voting: None,
            last_result: None,
            last_vote: None,
            gallery: Vec::new(),
            gallery_total: 0,
            ranking: Vec::new(),
        }
    }

    /// Fold one server event into the view.
    pub fn apply(&mut self, event: LiveEvent) {
        match event {
            LiveEvent::Presence(p) => self.spectators = p.count,
            LiveEvent::Status(status) => self.status = status,
            LiveEvent::Card(update) => {
                // full card every time, so replaying an event is harmless
                if update.action == CardAction::Moved {
                    tracing::debug!(
                        card_id = %update.card.id,
                        from = update.from_column.as_deref().unwrap_or("?"),
                        to = update.to_column.as_deref().unwrap_or("?"),
                        "card moved"
                    );
                }
                self.cards.insert(update.card.id.clone(), update.card);
            }
            LiveEvent::Log(line) => push_bounded(&mut self.logs, line, self.log_capacity),
            LiveEvent::VotingStarted(p) => {
                self.last_vote = None;
                self.voting = Some(VotingView {
                    round_id: p.round_id,
                    options: p
                        .options
                        .into_iter()
                        .map(|o| VotingResult {
                            id: o.id,
                            label: o.label,
                            vote_count: 0,
                        })
                        .collect(),
                    ends_at: p.ends_at,
                    remaining_seconds: p.duration_seconds,
                });
                self.last_result = None;
            }
            LiveEvent::VotingUpdate(p) => {
                if let Some(voting) = self.voting.as_mut() {
                    for option in voting.options.iter_mut() {
                        if let Some(count) = p.votes.get(&option.id) {
                            option.vote_count = *count;
                        }
                    }
                }
            }
            LiveEvent::VotingEnded(p) => {
                self.voting = None;
                self.last_result = Some(p);
            }
            LiveEvent::ProjectLiked(p) => {
                if let Some(project) = self.gallery.iter_mut().find(|g| g.id == p.project_id) {
                    project.like_count = p.like_count;
                }
            }
            LiveEvent::Chat(message) => push_bounded(&mut self.chat, message, CHAT_CAPACITY),
            LiveEvent::VoteResult(response) => self.last_vote = Some(response),
            LiveEvent::GameRanking(update) => {
                if update.entry.game_type == DEFAULT_GAME_TYPE {
                    self.insert_score(update.entry);
                }
            }
            LiveEvent::Pong => {}
        }
    }

    /// One second of local countdown. Never closes the round.
    pub fn tick(&mut self) {
        if let Some(voting) = self.voting.as_mut() {
            voting.remaining_seconds = voting.remaining_seconds.saturating_sub(1);
        }
    }

    pub fn apply_status(&mut self, snapshot: LiveStatusResponse) {
        self.status = snapshot.status;
        self.spectators = snapshot.spectator_count;
    }

    /// Replace the board with a REST snapshot.
    pub fn apply_kanban(&mut self, board: KanbanResponse) {
        self.cards = board
            .columns
            .into_values()
            .flatten()
            .map(|card| (card.id.clone(), card))
            .collect();
    }

    pub fn apply_voting(&mut self, state: VotingStateResponse) {
        self.voting = match (state.is_active, state.round_id) {
            (true, Some(round_id)) => Some(VotingView {
                round_id,
                options: state.options,
                ends_at: state.ends_at.unwrap_or_default(),
                remaining_seconds: state.time_remaining_seconds.unwrap_or(0),
            }),
            _ => None,
        };
    }

    pub fn apply_ranking(&mut self, board: GameRankingResponse) {
        self.ranking = board.ranking;
        self.ranking.truncate(LEADERBOARD_SIZE as usize);
    }

    /// Place a new score after every score at least as good, as the hub
    /// orders its board.
    fn insert_score(&mut self, entry: GameScoreEntry) {
        self.ranking.retain(|e| e.id != entry.id);
        let at = self
            .ranking
            .iter()
            .position(|e| e.score < entry.score)
            .unwrap_or(self.ranking.len());
        self.ranking.insert(at, entry);
        self.ranking.truncate(LEADERBOARD_SIZE as usize);
    }

    pub fn ranking(&self) -> &[GameScoreEntry] {
        &self.ranking
    }

    pub fn apply_gallery(&mut self, gallery: GalleryResponse) {
        self.gallery = gallery.projects;
        self.gallery_total = gallery.total;
    }

    pub fn card(&self, id: &str) -> Option<&LiveCard> {
        self.cards.get(id)
    }

    pub fn card_count(&self) -> usize {
        self.cards.len()
    }

    /// Cards grouped by board column, in board order, oldest first.
    pub fn columns(&self) -> Vec<(&'static str, Vec<&LiveCard>)> {
        KANBAN_COLUMNS
            .iter()
            .map(|column| {
                let mut cards: Vec<&LiveCard> =
                    self.cards.values().filter(|c| c.column_id == *column).collect();
                cards.sort_by(|a, b| a.created_at.cmp(&b.created_at));
                (*column, cards)
            })
            .collect()
    }

    pub fn logs(&self) -> impl Iterator<Item = &LogEntryPayload> {
        self.logs.iter()
    }

    pub fn chat(&self) -> impl Iterator<Item = &ChatMessagePayload> {
        self.chat.iter()
    }
}

fn push_bounded<T>(ring: &mut VecDeque<T>, item: T, capacity: usize) {
    if ring.len() == capacity {
        ring.pop_front();
    }
    ring.push_back(item);
}

/// Plain-text rendering for the terminal.
pub fn render(view: &LiveView) -> String {
    let mut out = String::new();
    let stage = view.status.current_stage.as_deref().unwrap_or("idle");
    out.push_str(&format!(
        "spectators: {}  working: {}  stage: {}\n",
        view.spectators, view.status.is_working, stage
    ));
    if let Some(progress) = view.status.progress {
        out.push_str(&format!("progress: {:.0}%\n", progress));
    }

    for (column, cards) in view.columns() {
        let titles: Vec<&str> = cards.iter().map(|c| c.title.as_str()).collect();
        out.push_str(&format!("[{}] {}\n", column, titles.join(", ")));
    }

    match (&view.voting, &view.last_result) {
        (Some(voting), _) => {
            out.push_str(&format!("vote ({}s left):", voting.remaining_seconds));
            for option in &voting.options {
                out.push_str(&format!(" {}={}", option.label, option.vote_count));
            }
            out.push('\n');
        }
        (None, Some(result)) => match &result.winner {
            Some(winner) => out.push_str(&format!(
                "last vote: {} won with {}\n",
                winner.label, winner.vote_count
            )),
            None => out.push_str("last vote: no votes\n"),
        },
        (None, None) => {}
    }

    if !view.ranking.is_empty() {
        let top: Vec<String> = view
            .ranking
            .iter()
            .take(3)
            .map(|e| format!("{} {}", e.player_name, e.score))
            .collect();
        out.push_str(&format!("top scores: {}\n", top.join(", ")));
    }

    for line in view.logs.iter().rev().take(5).collect::<Vec<_>>().into_iter().rev() {
        out.push_str(&format!("> {}\n", line.content));
    }
    out
}
