//! Pipeline stage models.
//!
//! This module defines the fixed eight-stage pipeline every account passes
//! through, and the immutable event record written at each stage transition.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// One of the eight fixed pipeline stages.
///
/// Stages are numbered 0-7 and serialized as their integer id so that the
/// status file stays readable by workers written in other languages.
///
/// Stage 0 doubles as the "waiting for work" state between accounts.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(try_from = "u8", into = "u8")]
pub enum Stage {
    /// Waiting for account information.
    #[default]
    Initialization,
    /// Scraping account data from the platform.
    DataScraping,
    /// Retrieving scraped data from storage.
    DataRetrieval,
    /// Indexing posts into the vector database.
    VectorDatabase,
    /// Analysing engagement time series.
    TimeSeriesAnalysis,
    /// Generating content recommendations.
    ContentGeneration,
    /// Exporting the content plan.
    Exportation,
    /// The account has been fully processed.
    Complete,
}

impl Stage {
    /// All stages in pipeline order.
    pub const ALL: [Stage; 8] = [
        Stage::Initialization,
        Stage::DataScraping,
        Stage::DataRetrieval,
        Stage::VectorDatabase,
        Stage::TimeSeriesAnalysis,
        Stage::ContentGeneration,
        Stage::Exportation,
        Stage::Complete,
    ];

    /// Look up a stage by its numeric id.
    ///
    /// Returns `None` for ids outside `0..=7`.
    pub fn from_id(id: u8) -> Option<Stage> {
        Self::ALL.get(usize::from(id)).copied()
    }

    /// Numeric id of this stage (0-7).
    pub fn id(self) -> u8 {
        self as u8
    }

    /// Fixed display name of this stage.
    pub fn name(self) -> &'static str {
        match self {
            Stage::Initialization => "Initialization",
            Stage::DataScraping => "Data Scraping",
            Stage::DataRetrieval => "Data Retrieval",
            Stage::VectorDatabase => "Vector Database",
            Stage::TimeSeriesAnalysis => "Time Series Analysis",
            Stage::ContentGeneration => "Content Generation",
            Stage::Exportation => "Exportation",
            Stage::Complete => "Complete",
        }
    }

    /// Human description of the work done in this stage.
    pub fn description(self) -> &'static str {
        match self {
            Stage::Initialization => "Waiting for account information",
            Stage::DataScraping => "Scraping account data from the platform",
            Stage::DataRetrieval => "Retrieving scraped data from storage",
            Stage::VectorDatabase => "Indexing posts into the vector database",
            Stage::TimeSeriesAnalysis => "Analysing engagement time series",
            Stage::ContentGeneration => "Generating content recommendations",
            Stage::Exportation => "Exporting the content plan",
            Stage::Complete => "Processing complete",
        }
    }

    /// True for the stages that begin a new unit of work (0 and 1).
    pub fn begins_unit_of_work(self) -> bool {
        matches!(self, Stage::Initialization | Stage::DataScraping)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl From<Stage> for u8 {
    fn from(stage: Stage) -> Self {
        stage.id()
    }
}

impl TryFrom<u8> for Stage {
    type Error = String;

    fn try_from(id: u8) -> Result<Self, Self::Error> {
        Stage::from_id(id).ok_or_else(|| format!("stage id {id} is outside 0..=7"))
    }
}

/// Which edge of a stage an event records.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventPhase {
    /// The stage has begun.
    Started,
    /// The stage finished successfully.
    Completed,
    /// The stage failed.
    Failed,
}

impl EventPhase {
    /// True for `Completed` and `Failed`.
    pub fn is_terminal(self) -> bool {
        !matches!(self, EventPhase::Started)
    }
}

impl fmt::Display for EventPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            EventPhase::Started => "started",
            EventPhase::Completed => "completed",
            EventPhase::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// A scalar value attached to a stage event for structured context.
///
/// JSON has no representation for NaN or infinity. Constructors turn
/// non-finite floats into `Text`, and a non-finite `Float` built directly is
/// written as a string, so the snapshot always reads back.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum DetailValue {
    Bool(bool),
    Integer(i64),
    #[serde(serialize_with = "serialize_float")]
    Float(f64),
    Text(String),
}

impl DetailValue {
    /// Parse a command-line value, preferring bool, then integer, then float.
    pub fn parse(raw: &str) -> DetailValue {
        if let Ok(b) = raw.parse::<bool>() {
            DetailValue::Bool(b)
        } else if let Ok(i) = raw.parse::<i64>() {
            DetailValue::Integer(i)
        } else {
            match raw.parse::<f64>() {
                Ok(f) if f.is_finite() => DetailValue::Float(f),
                _ => DetailValue::Text(raw.to_string()),
            }
        }
    }

    /// A float detail, or `Text` for NaN and infinities.
    pub fn float(value: f64) -> DetailValue {
        if value.is_finite() {
            DetailValue::Float(value)
        } else {
            DetailValue::Text(value.to_string())
        }
    }
}

fn serialize_float<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    if value.is_finite() {
        serializer.serialize_f64(*value)
    } else {
        serializer.collect_str(value)
    }
}

impl fmt::Display for DetailValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DetailValue::Bool(b) => write!(f, "{b}"),
            DetailValue::Integer(i) => write!(f, "{i}"),
            DetailValue::Float(v) => write!(f, "{v}"),
            DetailValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for DetailValue {
    fn from(value: &str) -> Self {
        DetailValue::Text(value.to_string())
    }
}

impl From<String> for DetailValue {
    fn from(value: String) -> Self {
        DetailValue::Text(value)
    }
}

impl From<i64> for DetailValue {
    fn from(value: i64) -> Self {
        DetailValue::Integer(value)
    }
}

impl From<bool> for DetailValue {
    fn from(value: bool) -> Self {
        DetailValue::Bool(value)
    }
}

impl From<f64> for DetailValue {
    fn from(value: f64) -> Self {
        DetailValue::float(value)
    }
}

/// Structured context for a stage event, ordered by key.
pub type Details = BTreeMap<String, DetailValue>;

/// Immutable record of one stage transition.
///
/// Events are created by the stage tracker and never modified afterwards,
/// except that the tracker may flag a sequence anomaly before the event is
/// first persisted.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StageEvent {
    /// Unique id; replaying the same event is recognised by this id.
    pub id: Uuid,

    pub stage: Stage,

    pub phase: EventPhase,

    pub message: String,

    /// Account being processed, or empty for pipeline-global events.
    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub details: Details,

    pub timestamp: DateTime<Utc>,

    /// Set when a terminal event had no matching `Started` event.
    #[serde(default)]
    pub sequence_anomaly: bool,
}

impl StageEvent {
    /// Create a new event stamped with a fresh id and the current time.
    pub fn new(
        stage: Stage,
        phase: EventPhase,
        message: impl Into<String>,
        username: impl Into<String>,
        details: Details,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            stage,
            phase,
            message: message.into(),
            username: username.into(),
            details,
            timestamp: Utc::now(),
            sequence_anomaly: false,
        }
    }
}
