//! Frame egress - writes replay frames to chunked JSONL files
//!
//! Frames are written one JSON object per line to
//! `<processed_dir>/match_<id>/frames_chunk_NNNN.jsonl`, a fixed number of
//! frames per chunk. A `players.json` file alongside maps frame slots to ids.

use crate::domain::combat::Frame;
use crate::domain::error::EtlResult;
use crate::domain::types::{MatchId, PlayerId};
use crate::io::roster::Roster;
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Serialize)]
struct PlayerSlot<'a> {
    slot: usize,
    id: &'a str,
    name: Option<&'a str>,
}

#[derive(Serialize)]
struct PlayersIndex<'a> {
    match_id: &'a str,
    sample_hz: u32,
    players: Vec<PlayerSlot<'a>>,
}

/// Summary of one egress run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EgressStats {
    pub frames: u64,
    pub chunks: u32,
}

/// Egress writer for one match's replay frames
pub struct FrameEgress {
    dir: PathBuf,
    frames_per_chunk: usize,
}

impl FrameEgress {
    pub fn new(processed_dir: &Path, match_id: &MatchId, frames_per_chunk: usize) -> Self {
        let dir = processed_dir.join(format!("match_{match_id}"));
        info!(dir = %dir.display(), frames_per_chunk = %frames_per_chunk, "egress_initialized");
        Self { dir, frames_per_chunk: frames_per_chunk.max(1) }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn chunk_path(&self, chunk: u32) -> PathBuf {
        self.dir.join(format!("frames_chunk_{chunk:04}.jsonl"))
    }

    pub fn players_path(&self) -> PathBuf {
        self.dir.join("players.json")
    }

    /// Write the slot index for `players` (the order of `Frame::states`)
    pub fn write_players(
        &self,
        match_id: &MatchId,
        players: &[PlayerId],
        roster: &Roster,
        sample_hz: u32,
    ) -> EtlResult<()> {
        let index = PlayersIndex {
            match_id: match_id.as_str(),
            sample_hz,
            players: players
                .iter()
                .enumerate()
                .map(|(slot, id)| PlayerSlot { slot, id: id.as_str(), name: roster.name(id) })
                .collect(),
        };
        std::fs::create_dir_all(&self.dir)?;
        std::fs::write(self.players_path(), serde_json::to_vec_pretty(&index)?)?;
        Ok(())
    }

    /// Write every frame, starting a new chunk file each `frames_per_chunk` frames.
    ///
    /// Existing chunk files for this match are replaced.
    pub fn write_frames(&self, frames: impl Iterator<Item = Frame>) -> EtlResult<EgressStats> {
        self.clear_chunks()?;
        std::fs::create_dir_all(&self.dir)?;

        let mut stats = EgressStats::default();
        let mut writer: Option<ChunkWriter> = None;
        for frame in frames {
            let chunk = (stats.frames / self.frames_per_chunk as u64) as u32;
            if writer.as_ref().map_or(true, |w| w.chunk != chunk) {
                if let Some(done) = writer.take() {
                    done.finish()?;
                }
                writer = Some(ChunkWriter::create(self.chunk_path(chunk), chunk)?);
                stats.chunks = chunk + 1;
            }
            if let Some(w) = writer.as_mut() {
                w.write_frame(&frame)?;
            }
            stats.frames += 1;
        }
        if let Some(done) = writer {
            done.finish()?;
        }

        info!(
            dir = %self.dir.display(),
            frames = %stats.frames,
            chunks = %stats.chunks,
            "frames_egressed"
        );
        Ok(stats)
    }

    fn clear_chunks(&self) -> std::io::Result<()> {
        if !self.dir.exists() {
            return Ok(());
        }
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let is_chunk = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("frames_chunk_") && n.ends_with(".jsonl"));
            if is_chunk {
                std::fs::remove_file(path)?;
            }
        }
        Ok(())
    }
}

/// Open chunk file, one JSON frame per line
struct ChunkWriter {
    chunk: u32,
    path: PathBuf,
    out: BufWriter<File>,
    lines: usize,
}

impl ChunkWriter {
    fn create(path: PathBuf, chunk: u32) -> std::io::Result<Self> {
        let out = BufWriter::new(File::create(&path)?);
        Ok(Self { chunk, path, out, lines: 0 })
    }

    fn write_frame(&mut self, frame: &Frame) -> EtlResult<()> {
        serde_json::to_writer(&mut self.out, frame)?;
        self.out.write_all(b"\n")?;
        self.lines += 1;
        Ok(())
    }

    fn finish(mut self) -> std::io::Result<()> {
        self.out.flush()?;
        debug!(file = %self.path.display(), frames = %self.lines, "chunk_written");
        Ok(())
    }
}
