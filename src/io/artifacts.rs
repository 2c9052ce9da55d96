//! On-disk storage of fetched API payloads
//!
//! Layout under the raw data root:
//! - `match_<id>/<kind>.json` for per-match artifacts
//! - `event_window_<id>/<kind>.json` for per-window artifacts

use crate::domain::error::{EtlError, EtlResult};
use serde_json::Value;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactScope {
    Match,
    Window,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    MatchInfo,
    Players,
    Movement,
    Shots,
    /// Zone, elimination, knock, health, shield, revive and reboot logs
    Events,
    /// Weapon catalog, provided alongside the match when available
    Weapons,
    WindowInfo,
    WindowMatches,
}

impl ArtifactKind {
    /// Artifacts a match cannot be parsed without
    pub const REQUIRED_FOR_MATCH: [ArtifactKind; 5] = [
        ArtifactKind::MatchInfo,
        ArtifactKind::Players,
        ArtifactKind::Movement,
        ArtifactKind::Shots,
        ArtifactKind::Events,
    ];

    pub const REQUIRED_FOR_WINDOW: [ArtifactKind; 2] =
        [ArtifactKind::WindowInfo, ArtifactKind::WindowMatches];

    pub fn scope(&self) -> ArtifactScope {
        match self {
            ArtifactKind::WindowInfo | ArtifactKind::WindowMatches => ArtifactScope::Window,
            _ => ArtifactScope::Match,
        }
    }

    pub fn file_stem(&self) -> &'static str {
        match self {
            ArtifactKind::MatchInfo | ArtifactKind::WindowInfo => "info",
            ArtifactKind::Players => "players",
            ArtifactKind::Movement => "movement_events",
            ArtifactKind::Shots => "shot_events",
            ArtifactKind::Events => "match_events",
            ArtifactKind::Weapons => "weapons",
            ArtifactKind::WindowMatches => "matches",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::MatchInfo => "match_info",
            ArtifactKind::Players => "players",
            ArtifactKind::Movement => "movement",
            ArtifactKind::Shots => "shots",
            ArtifactKind::Events => "events",
            ArtifactKind::Weapons => "weapons",
            ArtifactKind::WindowInfo => "window_info",
            ArtifactKind::WindowMatches => "window_matches",
        }
    }
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Storage for raw artifacts keyed by kind and owning match/window id
pub trait ArtifactStore: Send + Sync {
    fn exists(&self, kind: ArtifactKind, owner: &str) -> bool;

    /// Fails with `MissingData` when the artifact has not been stored.
    fn read(&self, kind: ArtifactKind, owner: &str) -> EtlResult<Value>;

    fn write(&self, kind: ArtifactKind, owner: &str, payload: &Value) -> EtlResult<()>;

    /// Required or optional kinds from `kinds` that are not yet stored
    fn missing(&self, kinds: &[ArtifactKind], owner: &str) -> Vec<ArtifactKind> {
        kinds.iter().copied().filter(|k| !self.exists(*k, owner)).collect()
    }
}

/// Filesystem-backed artifact store
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path_for(&self, kind: ArtifactKind, owner: &str) -> PathBuf {
        let dir = match kind.scope() {
            ArtifactScope::Match => format!("match_{owner}"),
            ArtifactScope::Window => format!("event_window_{owner}"),
        };
        self.root.join(dir).join(format!("{}.json", kind.file_stem()))
    }
}

impl ArtifactStore for FsArtifactStore {
    fn exists(&self, kind: ArtifactKind, owner: &str) -> bool {
        self.path_for(kind, owner).is_file()
    }

    fn read(&self, kind: ArtifactKind, owner: &str) -> EtlResult<Value> {
        let path = self.path_for(kind, owner);
        let content = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(EtlError::MissingData(format!("{kind} for {owner}")));
            }
            Err(e) => return Err(e.into()),
        };
        serde_json::from_str(&content).map_err(|e| {
            EtlError::MalformedData(format!("{kind} for {owner} is not valid JSON: {e}"))
        })
    }

    /// Written to a temp file and renamed so a crash never leaves a partial artifact.
    fn write(&self, kind: ArtifactKind, owner: &str, payload: &Value) -> EtlResult<()> {
        let path = self.path_for(kind, owner);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            serde_json::to_writer(&mut file, payload)?;
            file.flush()?;
        }
        fs::rename(&tmp, &path)?;
        debug!(kind = %kind, owner = %owner, path = %path.display(), "artifact_written");
        Ok(())
    }
}
