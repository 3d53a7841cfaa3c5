//! Persisted leaderboard table.
//!
//! The leaderboard is a markdown file holding one table with exactly one row
//! per submitter. Text outside the table is carried through a rewrite
//! untouched, so re-rendering an unchanged board is byte-identical.

use std::cmp::Ordering;
use std::path::Path;

use chrono::{DateTime, NaiveDateTime, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{LeaderboardError, Result};
use crate::evaluator::EvaluationResult;
use crate::submission::SubmissionIdentity;

const TITLE: &str = "# Leaderboard\n\n";
const HEADER: &str = "| Rank | Submitter | Model Size | Latency | Accuracy | Total Score | Submitted |";
const SEPARATOR: &str =
    "|-----:|-----------|-----------:|--------:|---------:|------------:|-----------|";
const COLUMNS: usize = 7;
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Decimal places kept for every score.
pub const PRECISION: usize = 4;

/// One submitter's current standing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub identity: SubmissionIdentity,
    pub result: EvaluationResult,
    pub submitted_at: DateTime<Utc>,
}

impl LeaderboardEntry {
    /// Normalize to what the table can represent: scores at [`PRECISION`]
    /// and the timestamp at whole seconds.
    pub fn new(
        identity: SubmissionIdentity,
        result: EvaluationResult,
        submitted_at: DateTime<Utc>,
    ) -> Self {
        Self {
            identity,
            result: EvaluationResult {
                model_size: round(result.model_size),
                latency: round(result.latency),
                accuracy: round(result.accuracy),
                total_score: round(result.total_score),
            },
            submitted_at: submitted_at.with_nanosecond(0).unwrap_or(submitted_at),
        }
    }

    fn render(&self, rank: usize) -> String {
        format!(
            "| {} | {} | {:.p$} | {:.p$} | {:.p$} | {:.p$} | {} UTC |",
            rank,
            self.identity,
            self.result.model_size,
            self.result.latency,
            self.result.accuracy,
            self.result.total_score,
            self.submitted_at.format(TIMESTAMP_FORMAT),
            p = PRECISION,
        )
    }
}

fn round(value: f64) -> f64 {
    let scale = 10f64.powi(PRECISION as i32);
    (value * scale).round() / scale
}

/// Ranking order: total score descending, then earlier submission, then
/// identity ascending.
fn rank_order(a: &LeaderboardEntry, b: &LeaderboardEntry) -> Ordering {
    b.result
        .total_score
        .total_cmp(&a.result.total_score)
        .then_with(|| a.submitted_at.cmp(&b.submitted_at))
        .then_with(|| a.identity.cmp(&b.identity))
}

/// What an upsert did to the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertOutcome {
    Inserted,
    Replaced,

    /// Stored result already identical; board untouched.
    Unchanged,
}

/// Parsed leaderboard, entries kept in rank order.
#[derive(Debug, Clone, PartialEq)]
pub struct Leaderboard {
    preamble: String,
    entries: Vec<LeaderboardEntry>,
    postamble: String,
}

impl Default for Leaderboard {
    fn default() -> Self {
        Self {
            preamble: TITLE.to_string(),
            entries: Vec::new(),
            postamble: String::new(),
        }
    }
}

impl Leaderboard {
    /// Parse a leaderboard document. Blank content is an empty board.
    pub fn parse(content: &str) -> std::result::Result<Self, LeaderboardError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        let lines: Vec<&str> = content.split_inclusive('\n').collect();
        let header_idx = lines
            .iter()
            .position(|l| is_header(l))
            .ok_or(LeaderboardError::MissingHeader)?;
        let separator_idx = header_idx + 1;
        if !lines
            .get(separator_idx)
            .map(|l| is_separator(l))
            .unwrap_or(false)
        {
            return Err(LeaderboardError::MalformedRow {
                line: separator_idx + 1,
                reason: "missing table separator".to_string(),
            });
        }

        let mut entries: Vec<LeaderboardEntry> = Vec::new();
        let mut end = separator_idx + 1;
        while let Some(line) = lines.get(end) {
            if !line.trim_start().starts_with('|') {
                break;
            }
            let entry = parse_row(line, end + 1)?;
            if entries.iter().any(|e| e.identity == entry.identity) {
                return Err(LeaderboardError::MalformedRow {
                    line: end + 1,
                    reason: format!("duplicate submitter '{}'", entry.identity),
                });
            }
            entries.push(entry);
            end += 1;
        }
        entries.sort_by(rank_order);

        Ok(Self {
            preamble: lines[..header_idx].concat(),
            entries,
            postamble: lines[end..].concat(),
        })
    }

    /// Load from disk; a missing file is an empty board.
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(content) => Ok(Self::parse(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn entries(&self) -> &[LeaderboardEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, identity: &SubmissionIdentity) -> Option<&LeaderboardEntry> {
        self.entries.iter().find(|e| &e.identity == identity)
    }

    /// 1-based rank of a submitter.
    pub fn rank_of(&self, identity: &SubmissionIdentity) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| &e.identity == identity)
            .map(|i| i + 1)
    }

    /// Insert or replace the row for `entry.identity`.
    ///
    /// An identical stored result keeps its original timestamp, so the
    /// rendered document does not change.
    pub fn upsert(&mut self, entry: LeaderboardEntry) -> UpsertOutcome {
        let entry = LeaderboardEntry::new(entry.identity, entry.result, entry.submitted_at);
        let outcome = match self.entries.iter().position(|e| e.identity == entry.identity) {
            Some(i) if self.entries[i].result == entry.result => return UpsertOutcome::Unchanged,
            Some(i) => {
                self.entries[i] = entry;
                UpsertOutcome::Replaced
            }
            None => {
                self.entries.push(entry);
                UpsertOutcome::Inserted
            }
        };
        self.entries.sort_by(rank_order);
        outcome
    }

    pub fn render(&self) -> String {
        let mut out = self.preamble.clone();
        out.push_str(HEADER);
        out.push('\n');
        out.push_str(SEPARATOR);
        out.push('\n');
        for (i, entry) in self.entries.iter().enumerate() {
            out.push_str(&entry.render(i + 1));
            out.push('\n');
        }
        out.push_str(&self.postamble);
        out
    }

    /// Render and write to `path`. Returns whether the file content changed.
    pub fn save(&self, path: &Path) -> Result<bool> {
        let rendered = self.render();
        if let Ok(existing) = std::fs::read_to_string(path) {
            if existing == rendered {
                return Ok(false);
            }
        }
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, rendered)?;
        Ok(true)
    }
}

/// Hex SHA-256 of a rendered document.
pub fn content_digest(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

fn cells(line: &str) -> Vec<&str> {
    let trimmed = line.trim();
    let inner = trimmed.strip_prefix('|').unwrap_or(trimmed);
    let inner = inner.strip_suffix('|').unwrap_or(inner);
    inner.split('|').map(str::trim).collect()
}

fn is_header(line: &str) -> bool {
    let cells = cells(line);
    cells.len() == COLUMNS && cells[0] == "Rank" && cells[1] == "Submitter"
}

fn is_separator(line: &str) -> bool {
    let cells = cells(line);
    cells.len() == COLUMNS
        && cells
            .iter()
            .all(|c| !c.is_empty() && c.chars().all(|ch| ch == '-' || ch == ':'))
}

fn parse_row(line: &str, line_no: usize) -> std::result::Result<LeaderboardEntry, LeaderboardError> {
    let malformed = |reason: String| LeaderboardError::MalformedRow {
        line: line_no,
        reason,
    };

    let cells = cells(line);
    if cells.len() != COLUMNS {
        return Err(malformed(format!(
            "expected {COLUMNS} columns, found {}",
            cells.len()
        )));
    }

    let identity = SubmissionIdentity::new(cells[1])
        .map_err(|_| malformed(format!("invalid submitter '{}'", cells[1])))?;
    let number = |idx: usize, name: &str| -> std::result::Result<f64, LeaderboardError> {
        cells[idx]
            .parse::<f64>()
            .map_err(|_| malformed(format!("{name} '{}' is not a number", cells[idx])))
    };
    let result = EvaluationResult {
        model_size: number(2, "model size")?,
        latency: number(3, "latency")?,
        accuracy: number(4, "accuracy")?,
        total_score: number(5, "total score")?,
    };

    let stamp = cells[6].strip_suffix("UTC").unwrap_or(cells[6]).trim();
    let naive = NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT)
        .map_err(|e| malformed(format!("timestamp '{}': {e}", cells[6])))?;

    Ok(LeaderboardEntry::new(
        identity,
        result,
        Utc.from_utc_datetime(&naive),
    ))
}
