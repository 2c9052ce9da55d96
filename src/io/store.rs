//! Relational persistence for windows, matches, players and combat events
//!
//! `MatchStore` is the seam the pipelines write through. `SqliteStore` keeps
//! everything in one SQLite file; each match load is a single transaction.

use crate::domain::combat::{CombatEvent, CombatKind};
use crate::domain::error::{EtlError, EtlResult};
use crate::domain::types::{MatchId, WindowId};
use crate::domain::window::{EventWindow, MatchRecord, WindowStatus};
use crate::io::roster::Roster;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use tracing::{debug, info};

const SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS event_window (
    id TEXT PRIMARY KEY,
    discovered_at TEXT NOT NULL,
    start_time TEXT,
    end_time TEXT,
    total_matches INTEGER NOT NULL DEFAULT 0,
    processed_matches INTEGER NOT NULL DEFAULT 0,
    status TEXT NOT NULL DEFAULT 'not_started',
    last_processing_start TEXT,
    last_processed TEXT,
    last_failed TEXT
);

CREATE TABLE IF NOT EXISTS matches (
    id TEXT PRIMARY KEY,
    event_window_id TEXT NOT NULL,
    start_time TEXT NOT NULL,
    end_time TEXT,
    mode TEXT,
    duration_secs INTEGER,
    player_count INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS match_player (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    match_id TEXT NOT NULL REFERENCES matches(id) ON DELETE CASCADE,
    epic_id TEXT NOT NULL,
    username TEXT NOT NULL,
    team INTEGER,
    UNIQUE (epic_id, match_id)
);

CREATE TABLE IF NOT EXISTS damage_event (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    match_id TEXT NOT NULL REFERENCES matches(id) ON DELETE CASCADE,
    timestamp INTEGER NOT NULL,
    game_time_seconds REAL NOT NULL,
    shooter_id TEXT NOT NULL,
    victim_id TEXT NOT NULL,
    weapon_id TEXT NOT NULL,
    weapon_type TEXT,
    damage REAL,
    inferred INTEGER NOT NULL,
    shooter_x REAL NOT NULL,
    shooter_y REAL NOT NULL,
    shooter_z REAL NOT NULL,
    victim_x REAL NOT NULL,
    victim_y REAL NOT NULL,
    victim_z REAL NOT NULL,
    distance REAL NOT NULL,
    zone INTEGER NOT NULL,
    FOREIGN KEY (shooter_id, match_id) REFERENCES match_player(epic_id, match_id),
    FOREIGN KEY (victim_id, match_id) REFERENCES match_player(epic_id, match_id)
);

CREATE TABLE IF NOT EXISTS elimination_event (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    match_id TEXT NOT NULL REFERENCES matches(id) ON DELETE CASCADE,
    timestamp INTEGER NOT NULL,
    game_time_seconds REAL NOT NULL,
    eliminator_id TEXT NOT NULL,
    eliminated_id TEXT NOT NULL,
    weapon_id TEXT NOT NULL,
    weapon_type TEXT,
    eliminator_x REAL NOT NULL,
    eliminator_y REAL NOT NULL,
    eliminator_z REAL NOT NULL,
    eliminated_x REAL NOT NULL,
    eliminated_y REAL NOT NULL,
    eliminated_z REAL NOT NULL,
    distance REAL NOT NULL,
    zone INTEGER NOT NULL,
    FOREIGN KEY (eliminator_id, match_id) REFERENCES match_player(epic_id, match_id),
    FOREIGN KEY (eliminated_id, match_id) REFERENCES match_player(epic_id, match_id)
);

CREATE INDEX IF NOT EXISTS idx_damage_event_match ON damage_event(match_id, timestamp);
CREATE INDEX IF NOT EXISTS idx_elimination_event_match ON elimination_event(match_id, timestamp);
CREATE INDEX IF NOT EXISTS idx_event_window_status ON event_window(status);
"#;

/// Row counts written by one match load
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadCounts {
    pub players: usize,
    pub damage_events: usize,
    pub elimination_events: usize,
}

pub trait MatchStore {
    fn match_exists(&self, id: &MatchId) -> EtlResult<bool>;

    /// Write the match row, its included players and combat events atomically.
    fn load_match(
        &mut self,
        record: &MatchRecord,
        roster: &Roster,
        events: &[CombatEvent],
    ) -> EtlResult<LoadCounts>;

    /// Insert a newly discovered window. Returns false if the id is already known.
    fn insert_window_if_absent(&self, window: &EventWindow) -> EtlResult<bool>;

    fn update_window_metadata(
        &self,
        id: &WindowId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        total_matches: u32,
    ) -> EtlResult<()>;

    /// Compare-and-set claim on `processing`.
    ///
    /// Succeeds when the window is not already processing, or when the existing
    /// claim started before `stale_before`. Processed windows are never claimed.
    fn try_begin_window(
        &self,
        id: &WindowId,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> EtlResult<bool>;

    /// Move a claimed window to `Processed` or `Failed`.
    fn finish_window(
        &self,
        id: &WindowId,
        status: WindowStatus,
        processed_matches: u32,
        now: DateTime<Utc>,
    ) -> EtlResult<()>;

    fn window(&self, id: &WindowId) -> EtlResult<Option<EventWindow>>;

    /// NotStarted or Failed windows, oldest discovery first
    fn pending_windows(&self) -> EtlResult<Vec<WindowId>>;
}

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(path: &Path) -> EtlResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        info!(path = %path.display(), "store_opened");
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> EtlResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> EtlResult<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Rows in `table` belonging to `match_id`
    pub fn count_for_match(&self, table: EventTable, match_id: &MatchId) -> EtlResult<usize> {
        let sql = format!("SELECT COUNT(*) FROM {} WHERE match_id = ?1", table.as_str());
        let n: i64 = self.conn.query_row(&sql, params![match_id.as_str()], |r| r.get(0))?;
        Ok(n as usize)
    }
}

/// Per-match child tables
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventTable {
    Players,
    Damage,
    Elimination,
}

impl EventTable {
    fn as_str(&self) -> &'static str {
        match self {
            EventTable::Players => "match_player",
            EventTable::Damage => "damage_event",
            EventTable::Elimination => "elimination_event",
        }
    }
}

impl MatchStore for SqliteStore {
    fn match_exists(&self, id: &MatchId) -> EtlResult<bool> {
        let found = self
            .conn
            .query_row("SELECT 1 FROM matches WHERE id = ?1", params![id.as_str()], |_| Ok(()))
            .optional()?;
        Ok(found.is_some())
    }

    fn load_match(
        &mut self,
        record: &MatchRecord,
        roster: &Roster,
        events: &[CombatEvent],
    ) -> EtlResult<LoadCounts> {
        let match_start = record.start_time.timestamp_micros();
        let mut counts = LoadCounts::default();

        // dropped without commit on any error, which rolls back
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO matches (id, event_window_id, start_time, end_time, mode, duration_secs, player_count)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                record.id.as_str(),
                record.event_window_id.as_str(),
                record.start_time,
                record.end_time,
                record.mode,
                record.duration_secs,
                record.player_count,
            ],
        )?;

        {
            let mut insert_player = tx.prepare(
                "INSERT INTO match_player (match_id, epic_id, username, team) VALUES (?1, ?2, ?3, ?4)",
            )?;
            for entry in roster.included() {
                insert_player.execute(params![
                    record.id.as_str(),
                    entry.id.as_str(),
                    entry.name,
                    entry.team,
                ])?;
                counts.players += 1;
            }

            let mut insert_damage = tx.prepare(
                "INSERT INTO damage_event (
                    match_id, timestamp, game_time_seconds, shooter_id, victim_id, weapon_id,
                    weapon_type, damage, inferred, shooter_x, shooter_y, shooter_z,
                    victim_x, victim_y, victim_z, distance, zone
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
            )?;
            let mut insert_elimination = tx.prepare(
                "INSERT INTO elimination_event (
                    match_id, timestamp, game_time_seconds, eliminator_id, eliminated_id, weapon_id,
                    weapon_type, eliminator_x, eliminator_y, eliminator_z,
                    eliminated_x, eliminated_y, eliminated_z, distance, zone
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            )?;

            for e in events {
                let (a, r) = (e.actor_position, e.recipient_position);
                match e.kind {
                    CombatKind::Damage | CombatKind::HitAttempt => {
                        insert_damage.execute(params![
                            record.id.as_str(),
                            e.timestamp,
                            e.game_time_seconds(match_start),
                            e.actor_id.as_str(),
                            e.recipient_id.as_str(),
                            e.weapon_id,
                            e.weapon_type,
                            e.damage,
                            e.kind == CombatKind::HitAttempt,
                            a.x,
                            a.y,
                            a.z,
                            r.x,
                            r.y,
                            r.z,
                            e.distance,
                            e.zone,
                        ])?;
                        counts.damage_events += 1;
                    }
                    CombatKind::Elimination => {
                        insert_elimination.execute(params![
                            record.id.as_str(),
                            e.timestamp,
                            e.game_time_seconds(match_start),
                            e.actor_id.as_str(),
                            e.recipient_id.as_str(),
                            e.weapon_id,
                            e.weapon_type,
                            a.x,
                            a.y,
                            a.z,
                            r.x,
                            r.y,
                            r.z,
                            e.distance,
                            e.zone,
                        ])?;
                        counts.elimination_events += 1;
                    }
                }
            }
        }

        tx.commit()?;
        debug!(
            match_id = %record.id,
            players = %counts.players,
            damage_events = %counts.damage_events,
            elimination_events = %counts.elimination_events,
            "match_rows_committed"
        );
        Ok(counts)
    }

    fn insert_window_if_absent(&self, window: &EventWindow) -> EtlResult<bool> {
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO event_window (id, discovered_at, total_matches, processed_matches, status)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                window.id.as_str(),
                window.discovered_at,
                window.total_matches,
                window.processed_matches,
                window.status.as_str(),
            ],
        )?;
        Ok(inserted == 1)
    }

    fn update_window_metadata(
        &self,
        id: &WindowId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        total_matches: u32,
    ) -> EtlResult<()> {
        let updated = self.conn.execute(
            "UPDATE event_window SET start_time = ?2, end_time = ?3, total_matches = ?4 WHERE id = ?1",
            params![id.as_str(), start, end, total_matches],
        )?;
        if updated == 0 {
            return Err(EtlError::NotFound(format!("event window {id}")));
        }
        Ok(())
    }

    fn try_begin_window(
        &self,
        id: &WindowId,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> EtlResult<bool> {
        let claimed = self.conn.execute(
            "UPDATE event_window
             SET status = 'processing', last_processing_start = ?2
             WHERE id = ?1
               AND status <> 'processed'
               AND (status <> 'processing'
                    OR last_processing_start IS NULL
                    OR last_processing_start < ?3)",
            params![id.as_str(), now, stale_before],
        )?;
        Ok(claimed == 1)
    }

    fn finish_window(
        &self,
        id: &WindowId,
        status: WindowStatus,
        processed_matches: u32,
        now: DateTime<Utc>,
    ) -> EtlResult<()> {
        let status = WindowStatus::Processing.transition(status)?;
        let sql = match status {
            WindowStatus::Processed => {
                "UPDATE event_window SET status = ?2, processed_matches = ?3, last_processed = ?4
                 WHERE id = ?1 AND status = 'processing'"
            }
            _ => {
                "UPDATE event_window SET status = ?2, processed_matches = ?3, last_failed = ?4
                 WHERE id = ?1 AND status = 'processing'"
            }
        };
        let updated =
            self.conn.execute(sql, params![id.as_str(), status.as_str(), processed_matches, now])?;
        if updated == 0 {
            return Err(EtlError::NotFound(format!("processing event window {id}")));
        }
        Ok(())
    }

    fn window(&self, id: &WindowId) -> EtlResult<Option<EventWindow>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, discovered_at, start_time, end_time, total_matches, processed_matches,
                        status, last_processing_start, last_processed, last_failed
                 FROM event_window WHERE id = ?1",
                params![id.as_str()],
                |r| {
                    Ok((
                        EventWindow {
                            id: WindowId(r.get(0)?),
                            discovered_at: r.get(1)?,
                            start_time: r.get(2)?,
                            end_time: r.get(3)?,
                            total_matches: r.get(4)?,
                            processed_matches: r.get(5)?,
                            status: WindowStatus::NotStarted,
                            last_processing_start: r.get(7)?,
                            last_processed: r.get(8)?,
                            last_failed: r.get(9)?,
                        },
                        r.get::<_, String>(6)?,
                    ))
                },
            )
            .optional()?;

        row.map(|(mut window, status)| {
            window.status = WindowStatus::parse(&status)?;
            Ok(window)
        })
        .transpose()
    }

    fn pending_windows(&self) -> EtlResult<Vec<WindowId>> {
        let mut stmt = self.conn.prepare(
            "SELECT id FROM event_window
             WHERE status IN ('not_started', 'failed')
             ORDER BY discovered_at, id",
        )?;
        let ids = stmt
            .query_map([], |r| r.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids.into_iter().map(WindowId).collect())
    }
}
