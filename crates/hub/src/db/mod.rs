//! Database access.

mod migrations;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use shared::{
    wire_timestamp, AddProjectRequest, CompletedProject, GameScoreEntry, VotingOptionRef,
};

use crate::voting::{RoundClosed, RoundOpened, StoredRound};

pub use migrations::run_migrations;

/// Database connection wrapper.
pub struct Db(pub Mutex<Connection>);

impl Db {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(Self(Mutex::new(conn)))
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(Self(Mutex::new(conn)))
    }

    pub fn run_migrations(&self, dir: impl AsRef<Path>) -> Result<()> {
        run_migrations(&*self.conn()?, dir.as_ref())
    }

    pub fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.0.lock().map_err(|_| anyhow!("database lock poisoned"))
    }
}

fn parse_time(value: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(value)?.with_timezone(&Utc))
}

// --- Voting ---

/// Store a freshly opened round with its options.
pub fn insert_round(conn: &Connection, round: &RoundOpened) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO voting_rounds (id, status, started_at, ends_at) VALUES (?1, 'open', ?2, ?3)",
        params![
            round.round_id,
            wire_timestamp(round.started_at),
            wire_timestamp(round.ends_at)
        ],
    )?;
    for (position, option) in round.options.iter().enumerate() {
        tx.execute(
            "INSERT INTO voting_options (id, round_id, label, position) VALUES (?1, ?2, ?3, ?4)",
            params![option.id, round.round_id, option.label, position as i64],
        )?;
    }
    tx.commit()?;
    Ok(())
}

/// Insert or replace the session's ballot for a round.
pub fn upsert_ballot(
    conn: &Connection,
    round_id: &str,
    session_id: &str,
    option_id: &str,
    cast_at: DateTime<Utc>,
) -> Result<()> {
    conn.execute(
        "INSERT INTO ballots (round_id, session_id, option_id, cast_at) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(round_id, session_id) DO UPDATE SET option_id = excluded.option_id, cast_at = excluded.cast_at",
        params![round_id, session_id, option_id, wire_timestamp(cast_at)],
    )?;
    Ok(())
}

/// Mark a round closed. A round already closed is left untouched.
pub fn close_round(conn: &Connection, closed: &RoundClosed, closed_at: DateTime<Utc>) -> Result<()> {
    conn.execute(
        "UPDATE voting_rounds SET status = 'closed', closed_at = ?2, winner_option_id = ?3
         WHERE id = ?1 AND status = 'open'",
        params![
            closed.round_id,
            wire_timestamp(closed_at),
            closed.winner.as_ref().map(|w| w.id.as_str())
        ],
    )?;
    Ok(())
}

/// The round left open by a previous run, if any, with ballots in cast order.
pub fn load_open_round(conn: &Connection) -> Result<Option<StoredRound>> {
    let row: Option<(String, String, String)> = conn
        .query_row(
            "SELECT id, started_at, ends_at FROM voting_rounds WHERE status = 'open'
             ORDER BY started_at DESC LIMIT 1",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()?;
    let Some((id, started_at, ends_at)) = row else {
        return Ok(None);
    };

    let mut stmt = conn
        .prepare("SELECT id, label FROM voting_options WHERE round_id = ?1 ORDER BY position")?;
    let options = stmt
        .query_map([&id], |row| {
            Ok(VotingOptionRef {
                id: row.get(0)?,
                label: row.get(1)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut stmt = conn.prepare(
        "SELECT session_id, option_id FROM ballots WHERE round_id = ?1 ORDER BY cast_at, rowid",
    )?;
    let ballots = stmt
        .query_map([&id], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(Some(StoredRound {
        id,
        options,
        started_at: parse_time(&started_at)?,
        ends_at: parse_time(&ends_at)?,
        ballots,
    }))
}

// --- Gallery ---

/// Add a completed project; returns its id.
pub fn insert_project(conn: &Connection, req: &AddProjectRequest) -> Result<String> {
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO completed_projects (id, title, description, category, screenshot_url, preview_url, completed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            id,
            req.title,
            req.description,
            req.category,
            req.screenshot_url,
            req.preview_url,
            wire_timestamp(Utc::now())
        ],
    )?;
    Ok(id)
}

/// Gallery page ordered by likes, then most recently completed. Returns the
/// page and the total number of projects.
pub fn list_projects(
    conn: &Connection,
    limit: u32,
    offset: u32,
) -> Result<(Vec<CompletedProject>, u64)> {
    let total: i64 = conn.query_row("SELECT COUNT(*) FROM completed_projects", [], |row| {
        row.get(0)
    })?;
    let mut stmt = conn.prepare(
        "SELECT p.id, p.title, p.description, p.category, p.screenshot_url, p.preview_url,
                p.completed_at, (SELECT COUNT(*) FROM project_likes l WHERE l.project_id = p.id) AS likes
         FROM completed_projects p
         ORDER BY likes DESC, p.completed_at DESC
         LIMIT ?1 OFFSET ?2",
    )?;
    let projects = stmt
        .query_map(params![limit, offset], |row| {
            Ok(CompletedProject {
                id: row.get(0)?,
                title: row.get(1)?,
                description: row.get(2)?,
                category: row.get(3)?,
                screenshot_url: row.get(4)?,
                preview_url: row.get(5)?,
                completed_at: row.get(6)?,
                like_count: row.get::<_, i64>(7)? as u64,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok((projects, total as u64))
}

pub fn project_exists(conn: &Connection, project_id: &str) -> Result<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM completed_projects WHERE id = ?1",
            [project_id],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

pub fn like_count(conn: &Connection, project_id: &str) -> Result<u64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM project_likes WHERE project_id = ?1",
        [project_id],
        |row| row.get(0),
    )?;
    Ok(count as u64)
}

/// Record a like. Returns whether it was new and the resulting count; a
/// repeat like from the same session changes nothing.
pub fn like_project(conn: &Connection, project_id: &str, session_id: &str) -> Result<(bool, u64)> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO project_likes (project_id, session_id, liked_at) VALUES (?1, ?2, ?3)",
        params![project_id, session_id, wire_timestamp(Utc::now())],
    )?;
    Ok((inserted > 0, like_count(conn, project_id)?))
}

// --- Mini-game ---

pub fn insert_score(conn: &Connection, entry: &GameScoreEntry, session_id: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO game_scores (id, player_name, session_id, game_type, score, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            entry.id,
            entry.player_name,
            session_id,
            entry.game_type,
            entry.score,
            entry.created_at
        ],
    )?;
    Ok(())
}

/// 1-based rank of `score` in `game_type`: one more than the number of
/// strictly better scores, so ties share a rank.
pub fn score_rank(conn: &Connection, game_type: &str, score: i64) -> Result<u64> {
    let better: i64 = conn.query_row(
        "SELECT COUNT(*) FROM game_scores WHERE game_type = ?1 AND score > ?2",
        params![game_type, score],
        |row| row.get(0),
    )?;
    Ok(better as u64 + 1)
}

/// Best scores of a game; among equal scores the earliest comes first.
pub fn top_scores(conn: &Connection, game_type: &str, limit: u32) -> Result<Vec<GameScoreEntry>> {
    let mut stmt = conn.prepare(
        "SELECT id, player_name, score, game_type, created_at FROM game_scores
         WHERE game_type = ?1
         ORDER BY score DESC, created_at ASC, rowid ASC
         LIMIT ?2",
    )?;
    let entries = stmt
        .query_map(params![game_type, limit], |row| {
            Ok(GameScoreEntry {
                id: row.get(0)?,
                player_name: row.get(1)?,
                score: row.get(2)?,
                game_type: row.get(3)?,
                created_at: row.get(4)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(entries)
}
