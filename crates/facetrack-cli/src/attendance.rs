//! Attendance recording for recognised faces.
//!
//! Recognition yields a gallery label; recording needs the roster's user id
//! for that label. Labels without a roster entry are never recorded.

use chrono::{DateTime, Utc};
use facetrack_core::{Label, MatchResult};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AttendanceError {
    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid roster: {0}")]
    Roster(#[from] toml::de::Error),
    #[error("failed to serialize record: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Outcome of looking up the user behind a gallery label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Resolved(String),
    Unresolved,
}

pub trait IdentityResolver {
    fn resolve(&self, label: &Label) -> Resolution;
}

/// Label → user id table, loaded from TOML:
///
/// ```toml
/// [students]
/// "202244400" = "5c1f0e2a-..."
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Roster {
    #[serde(default)]
    students: HashMap<String, String>,
}

impl Roster {
    pub fn load(path: &Path) -> Result<Self, AttendanceError> {
        let text = std::fs::read_to_string(path).map_err(|source| AttendanceError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, AttendanceError> {
        Ok(toml::from_str(text)?)
    }

    pub fn len(&self) -> usize {
        self.students.len()
    }
}

impl IdentityResolver for Roster {
    fn resolve(&self, label: &Label) -> Resolution {
        match self.students.get(label.as_str()) {
            Some(user_id) if !user_id.trim().is_empty() => Resolution::Resolved(user_id.clone()),
            _ => Resolution::Unresolved,
        }
    }
}

/// One attendance entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub session_id: String,
    pub student_identifier: Label,
    pub student_user_id: String,
    pub confidence: f32,
    pub recorded_at: DateTime<Utc>,
}

/// Destination for attendance records.
pub trait AttendanceSink {
    fn record(&mut self, record: &AttendanceRecord) -> Result<(), AttendanceError>;
}

/// Appends one JSON object per line to a file.
///
/// Each record is serialised in full and handed to the writer in a single
/// unbuffered `write_all`, so a failed write leaves nothing queued behind it.
pub struct JsonLinesSink<W = File> {
    path: PathBuf,
    writer: W,
}

impl JsonLinesSink<File> {
    pub fn open(path: &Path) -> Result<Self, AttendanceError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|source| AttendanceError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(Self::new(path, file))
    }
}

impl<W: Write> JsonLinesSink<W> {
    /// `path` names the destination in errors.
    pub fn new(path: &Path, writer: W) -> Self {
        Self {
            path: path.to_path_buf(),
            writer,
        }
    }
}

impl<W: Write> AttendanceSink for JsonLinesSink<W> {
    fn record(&mut self, record: &AttendanceRecord) -> Result<(), AttendanceError> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        self.writer
            .write_all(&line)
            .and_then(|_| self.writer.flush())
            .map_err(|source| AttendanceError::Io {
                path: self.path.clone(),
                source,
            })
    }
}

/// What happened to one match result.
#[derive(Debug, Clone, PartialEq)]
pub enum Observation {
    Recorded(AttendanceRecord),
    AlreadyRecorded,
    Unresolved,
    NotRecognised,
}

/// Records each recognised identity at most once per session.
pub struct AttendanceSession<R, S> {
    session_id: String,
    resolver: R,
    sink: S,
    seen: HashSet<Label>,
}

impl<R: IdentityResolver, S: AttendanceSink> AttendanceSession<R, S> {
    pub fn new(session_id: impl Into<String>, resolver: R, sink: S) -> Self {
        Self {
            session_id: session_id.into(),
            resolver,
            sink,
            seen: HashSet::new(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn recorded(&self) -> usize {
        self.seen.len()
    }

    /// Record `result` if it is a new, resolvable match.
    ///
    /// The identity only counts as seen once the sink accepted it, so a
    /// failed write is retried on the next sighting.
    pub fn observe(&mut self, result: &MatchResult) -> Result<Observation, AttendanceError> {
        let Some(label) = result.label.as_ref().filter(|_| result.is_known()) else {
            return Ok(Observation::NotRecognised);
        };
        if self.seen.contains(label) {
            return Ok(Observation::AlreadyRecorded);
        }

        let Resolution::Resolved(user_id) = self.resolver.resolve(label) else {
            tracing::warn!(%label, session = %self.session_id, "recognised label has no roster entry; not recording");
            return Ok(Observation::Unresolved);
        };

        let record = AttendanceRecord {
            session_id: self.session_id.clone(),
            student_identifier: label.clone(),
            student_user_id: user_id,
            confidence: result.similarity,
            recorded_at: Utc::now(),
        };
        self.sink.record(&record)?;
        self.seen.insert(label.clone());

        tracing::info!(
            %label,
            user = %record.student_user_id,
            confidence = record.confidence,
            session = %self.session_id,
            "attendance recorded"
        );
        Ok(Observation::Recorded(record))
    }
}
