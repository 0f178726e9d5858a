//! Conversation transcripts
//!
//! A [`Transcript`] is an append-only list of rows `(speaker, regenerated,
//! content)`. Prompts are spoken by `user` and answers by the session tag,
//! both in per-session and in swarm transcripts.
//!
//! The file extension picks the export format: `.csv`, `.json` (one array)
//! or `.jsonl` (one object per line).

use chrono::Local;
use sdk::{Role, SwarmError, Turn};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// One transcript line
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TranscriptRow {
    pub speaker: String,
    pub regenerated: bool,
    pub content: String,
}

impl TranscriptRow {
    /// Row for `turn`, with answers attributed to `agent`
    pub fn from_turn(agent: &str, turn: &Turn) -> Self {
        let speaker = match turn.role {
            Role::User => turn.role.to_string(),
            Role::Agent => agent.to_string(),
        };
        Self {
            speaker,
            regenerated: turn.regenerated,
            content: turn.content.clone(),
        }
    }
}

/// Export format, chosen by file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscriptFormat {
    Csv,
    Json,
    Jsonl,
}

impl TranscriptFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "csv" => Some(Self::Csv),
            "json" => Some(Self::Json),
            "jsonl" => Some(Self::Jsonl),
            _ => None,
        }
    }
}

/// Timestamped default file name, `{prefix}_%Y_%m_%d_%H_%M_%S.csv`
///
/// Without a prefix the name starts with the timestamp.
pub fn default_file_name(prefix: Option<&str>) -> PathBuf {
    let stamp = Local::now().format("%Y_%m_%d_%H_%M_%S");
    match prefix {
        Some(prefix) => PathBuf::from(format!("{}_{}.csv", prefix, stamp)),
        None => PathBuf::from(format!("{}.csv", stamp)),
    }
}

/// `path` with `_{tag}` appended to the file stem
///
/// `logs/swarm.csv` becomes `logs/swarm_ChatGPT.csv`.
pub fn tagged_path(path: &Path, tag: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{}_{}.{}", stem, tag, ext.to_string_lossy()),
        None => format!("{}_{}", stem, tag),
    };
    path.with_file_name(name)
}

/// Append-only transcript
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    rows: Vec<TranscriptRow>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Session history as rows, answers spoken by `agent`
    pub fn from_turns(agent: &str, turns: &[Turn]) -> Self {
        Self {
            rows: turns.iter().map(|t| TranscriptRow::from_turn(agent, t)).collect(),
        }
    }

    pub fn push(&mut self, speaker: impl Into<String>, regenerated: bool, content: impl Into<String>) {
        self.rows.push(TranscriptRow {
            speaker: speaker.into(),
            regenerated,
            content: content.into(),
        });
    }

    pub fn rows(&self) -> &[TranscriptRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Write the transcript to `path`
    ///
    /// Returns `Ok(false)` without touching the file system when the
    /// extension is not a supported format.
    pub fn save(&self, path: &Path) -> Result<bool, SwarmError> {
        let Some(format) = TranscriptFormat::from_path(path) else {
            tracing::error!("Unsupported transcript file type: {}", path.display());
            return Ok(false);
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        match format {
            TranscriptFormat::Csv => self.write_csv(path)?,
            TranscriptFormat::Json => {
                let file = BufWriter::new(File::create(path)?);
                serde_json::to_writer_pretty(file, &self.rows)
                    .map_err(|e| SwarmError::Transcript(e.to_string()))?;
            }
            TranscriptFormat::Jsonl => {
                let mut file = BufWriter::new(File::create(path)?);
                for row in &self.rows {
                    let line = serde_json::to_string(row)
                        .map_err(|e| SwarmError::Transcript(e.to_string()))?;
                    writeln!(file, "{}", line)?;
                }
                file.flush()?;
            }
        }

        tracing::info!("Transcript saved to {}", path.display());
        Ok(true)
    }

    fn write_csv(&self, path: &Path) -> Result<(), SwarmError> {
        let mut writer =
            csv::Writer::from_path(path).map_err(|e| SwarmError::Transcript(e.to_string()))?;
        for row in &self.rows {
            writer
                .serialize(row)
                .map_err(|e| SwarmError::Transcript(e.to_string()))?;
        }
        writer.flush()?;
        Ok(())
    }
}
