//! Timed voting rounds.
//!
//! `idle → open → closed → idle`. At most one round is open. Tallies are
//! never stored: they are counted from the ballot set, which holds one ballot
//! per session, so a revote moves a vote instead of adding one.
//!
//! The machine is driven by the live service loop, which owns the deadline
//! timer. Time is always passed in, never read, so the loop decides the
//! order of a deadline and a racing ballot.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use tokio::time::{Duration, Instant};
use uuid::Uuid;

use shared::{wire_timestamp, VotingOptionRef, VotingResult, VotingStartedPayload, VotingStateResponse};

/// Options used when a round is opened without an explicit list.
pub const DEFAULT_OPTIONS: [&str; 4] = ["Game", "App", "Site", "Tool"];

/// Longest round an admin may open.
pub const MAX_VOTING_DURATION_SECS: u64 = 24 * 60 * 60;

/// Rejections at the state machine boundary. None of these alter state.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VotingError {
    #[error("voting is already active")]
    AlreadyOpen,
    #[error("voting is not active")]
    NotOpen,
    #[error("voting has ended")]
    Expired,
    #[error("invalid option")]
    UnknownOption,
    #[error("a round needs at least one option")]
    NoOptions,
    #[error("round duration must be between 1 and {} seconds", MAX_VOTING_DURATION_SECS)]
    InvalidDuration,
}

#[derive(Debug, Clone)]
struct Ballot {
    option_id: String,
    /// Order of the cast within the round; earlier wins ties.
    seq: u64,
}

#[derive(Debug)]
struct OpenRound {
    id: String,
    options: Vec<VotingOptionRef>,
    ends_at: DateTime<Utc>,
    deadline: Instant,
    duration: Duration,
    ballots: HashMap<String, Ballot>,
    next_seq: u64,
}

impl OpenRound {
    fn has_option(&self, option_id: &str) -> bool {
        self.options.iter().any(|o| o.id == option_id)
    }

    fn tally_of(&self, option_id: &str) -> u64 {
        self.ballots
            .values()
            .filter(|b| b.option_id == option_id)
            .count() as u64
    }

    fn results(&self) -> Vec<VotingResult> {
        self.options
            .iter()
            .map(|o| VotingResult {
                id: o.id.clone(),
                label: o.label.clone(),
                vote_count: self.tally_of(&o.id),
            })
            .collect()
    }

    fn first_cast(&self, option_id: &str) -> Option<u64> {
        self.ballots
            .values()
            .filter(|b| b.option_id == option_id)
            .map(|b| b.seq)
            .min()
    }

    /// Highest tally wins; among tied options the one holding the earliest
    /// ballot wins. No ballots at all means no winner.
    fn winner(&self, results: &[VotingResult]) -> Option<VotingResult> {
        let top = results.iter().map(|r| r.vote_count).max()?;
        if top == 0 {
            return None;
        }
        results
            .iter()
            .filter(|r| r.vote_count == top)
            .min_by_key(|r| self.first_cast(&r.id).unwrap_or(u64::MAX))
            .cloned()
    }
}

/// A freshly opened round.
#[derive(Debug, Clone)]
pub struct RoundOpened {
    pub round_id: String,
    pub options: Vec<VotingOptionRef>,
    pub started_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub duration_seconds: u64,
}

impl RoundOpened {
    pub fn started_payload(&self) -> VotingStartedPayload {
        VotingStartedPayload {
            round_id: self.round_id.clone(),
            options: self.options.clone(),
            ends_at: wire_timestamp(self.ends_at),
            duration_seconds: self.duration_seconds,
        }
    }
}

/// Effect of an accepted ballot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BallotOutcome {
    pub round_id: String,
    /// New tallies of the options this ballot touched. Empty when the
    /// session re-cast the same vote.
    pub delta: BTreeMap<String, u64>,
    /// Tally of the chosen option after the cast.
    pub option_count: u64,
}

impl BallotOutcome {
    pub fn changed(&self) -> bool {
        !self.delta.is_empty()
    }
}

/// Final result of a closed round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundClosed {
    pub round_id: String,
    pub winner: Option<VotingResult>,
    pub results: Vec<VotingResult>,
}

/// Round loaded from storage after a restart.
#[derive(Debug, Clone)]
pub struct StoredRound {
    pub id: String,
    pub options: Vec<VotingOptionRef>,
    pub started_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    /// (session, option) in cast order.
    pub ballots: Vec<(String, String)>,
}

/// The single voting state machine of the process.
#[derive(Debug, Default)]
pub struct VotingMachine {
    round: Option<OpenRound>,
}

impl VotingMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_open(&self) -> bool {
        self.round.is_some()
    }

    /// When the open round must close.
    pub fn deadline(&self) -> Option<Instant> {
        self.round.as_ref().map(|r| r.deadline)
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.deadline().is_some_and(|d| now >= d)
    }

    /// `idle → open`. Rejected, not queued, while a round is open.
    pub fn open(
        &mut self,
        labels: &[String],
        duration: Duration,
        now: Instant,
        wall: DateTime<Utc>,
    ) -> Result<RoundOpened, VotingError> {
        if self.round.is_some() {
            return Err(VotingError::AlreadyOpen);
        }
        if labels.is_empty() {
            return Err(VotingError::NoOptions);
        }
        if duration.is_zero() || duration > Duration::from_secs(MAX_VOTING_DURATION_SECS) {
            return Err(VotingError::InvalidDuration);
        }
        let deadline = now
            .checked_add(duration)
            .ok_or(VotingError::InvalidDuration)?;
        let ends_at = i64::try_from(duration.as_millis())
            .ok()
            .and_then(chrono::Duration::try_milliseconds)
            .and_then(|span| wall.checked_add_signed(span))
            .ok_or(VotingError::InvalidDuration)?;
        let options: Vec<VotingOptionRef> = labels
            .iter()
            .map(|label| VotingOptionRef {
                id: Uuid::new_v4().to_string(),
                label: label.clone(),
            })
            .collect();
        let round = OpenRound {
            id: Uuid::new_v4().to_string(),
            options: options.clone(),
            ends_at,
            deadline,
            duration,
            ballots: HashMap::new(),
            next_seq: 0,
        };
        let opened = RoundOpened {
            round_id: round.id.clone(),
            options,
            started_at: wall,
            ends_at,
            duration_seconds: duration.as_secs(),
        };
        tracing::info!(round_id = %round.id, ends_at = %ends_at, "voting round opened");
        self.round = Some(round);
        Ok(opened)
    }

    /// Reinstate a round that was open when the process stopped. The
    /// deadline keeps its wall-clock position; a round already past it is
    /// due immediately. The remaining time never exceeds the round's length,
    /// even if the wall clock went back across the restart.
    pub fn resume(&mut self, stored: StoredRound, now: Instant, wall: DateTime<Utc>) {
        let total = (stored.ends_at - stored.started_at)
            .to_std()
            .unwrap_or(Duration::ZERO);
        let remaining = (stored.ends_at - wall)
            .to_std()
            .unwrap_or(Duration::ZERO)
            .min(total);
        let mut round = OpenRound {
            id: stored.id,
            options: stored.options,
            ends_at: stored.ends_at,
            deadline: now.checked_add(remaining).unwrap_or(now),
            duration: total,
            ballots: HashMap::new(),
            next_seq: 0,
        };
        for (session, option_id) in stored.ballots {
            if round.has_option(&option_id) {
                let seq = round.next_seq;
                round.next_seq += 1;
                round.ballots.insert(session, Ballot { option_id, seq });
            }
        }
        tracing::info!(round_id = %round.id, ballots = round.ballots.len(), "voting round resumed");
        self.round = Some(round);
    }

    /// `open → open`: upsert the session's ballot.
    pub fn cast_vote(
        &mut self,
        session_id: &str,
        option_id: &str,
        now: Instant,
    ) -> Result<BallotOutcome, VotingError> {
        let round = self.round.as_mut().ok_or(VotingError::NotOpen)?;
        if now >= round.deadline {
            return Err(VotingError::Expired);
        }
        if !round.has_option(option_id) {
            return Err(VotingError::UnknownOption);
        }

        let previous = round.ballots.get(session_id).map(|b| b.option_id.clone());
        if previous.as_deref() == Some(option_id) {
            return Ok(BallotOutcome {
                round_id: round.id.clone(),
                delta: BTreeMap::new(),
                option_count: round.tally_of(option_id),
            });
        }

        let seq = round.next_seq;
        round.next_seq += 1;
        round.ballots.insert(
            session_id.to_string(),
            Ballot {
                option_id: option_id.to_string(),
                seq,
            },
        );

        let mut delta = BTreeMap::new();
        if let Some(prev) = previous {
            delta.insert(prev.clone(), round.tally_of(&prev));
        }
        let option_count = round.tally_of(option_id);
        delta.insert(option_id.to_string(), option_count);
        Ok(BallotOutcome {
            round_id: round.id.clone(),
            delta,
            option_count,
        })
    }

    /// `open → closed → idle`. Returns `None` when idle, so a round closes
    /// exactly once whether the deadline or an admin gets there first.
    pub fn close(&mut self) -> Option<RoundClosed> {
        let round = self.round.take()?;
        let results = round.results();
        let winner = round.winner(&results);
        tracing::info!(
            round_id = %round.id,
            winner = winner.as_ref().map(|w| w.label.as_str()).unwrap_or("none"),
            "voting round closed"
        );
        Some(RoundClosed {
            round_id: round.id,
            winner,
            results,
        })
    }

    /// Snapshot for REST readers.
    pub fn state(&self, now: Instant) -> VotingStateResponse {
        match &self.round {
            None => VotingStateResponse::default(),
            Some(round) => VotingStateResponse {
                is_active: now < round.deadline,
                round_id: Some(round.id.clone()),
                options: round.results(),
                ends_at: Some(wire_timestamp(round.ends_at)),
                time_remaining_seconds: Some(
                    round.deadline.saturating_duration_since(now).as_secs(),
                ),
            },
        }
    }

    /// `voting_started` for a connection joining mid-round; the duration is
    /// what is left, not what was configured.
    pub fn started_payload(&self, now: Instant) -> Option<VotingStartedPayload> {
        let round = self.round.as_ref()?;
        let remaining = round
            .deadline
            .saturating_duration_since(now)
            .min(round.duration);
        Some(VotingStartedPayload {
            round_id: round.id.clone(),
            options: round.options.clone(),
            ends_at: wire_timestamp(round.ends_at),
            duration_seconds: remaining.as_secs(),
        })
    }

    /// Current tallies of every option.
    pub fn tallies(&self) -> BTreeMap<String, u64> {
        self.round
            .as_ref()
            .map(|r| {
                r.options
                    .iter()
                    .map(|o| (o.id.clone(), r.tally_of(&o.id)))
                    .collect()
            })
            .unwrap_or_default()
    }
}
