use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Reserved label for faces that matched no registered identity.
pub const UNKNOWN_LABEL: &str = "Unknown";

/// Whether `name` is the reserved unknown label, in any letter case.
pub fn is_unknown_label(name: &str) -> bool {
    name.eq_ignore_ascii_case(UNKNOWN_LABEL)
}

/// Bounding box for a detected face, in frame pixel coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    #[serde(default)]
    pub confidence: f32,
}

/// Recognition outcome for one face.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "Option<String>", into = "Option<String>")]
pub enum Label {
    Known(String),
    Unknown,
}

impl Label {
    /// Name of the matched identity, `None` for unknown faces.
    pub fn name(&self) -> Option<&str> {
        match self {
            Label::Known(name) => Some(name),
            Label::Unknown => None,
        }
    }
}

impl From<Option<String>> for Label {
    fn from(value: Option<String>) -> Self {
        match value {
            Some(name) if !name.is_empty() && !is_unknown_label(&name) => Label::Known(name),
            _ => Label::Unknown,
        }
    }
}

impl From<Label> for Option<String> {
    fn from(label: Label) -> Self {
        match label {
            Label::Known(name) => Some(name),
            Label::Unknown => None,
        }
    }
}

/// A recognized face: who it is and where it was in the frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub label: Label,
    #[serde(default)]
    pub bbox: Option<BoundingBox>,
}

/// A registered person.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub name: String,
    pub employee_id: String,
}

/// One identity's presence window for one calendar day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRecord {
    pub day: NaiveDate,
    pub name: String,
    pub employee_id: Option<String>,
    pub entry_time: Option<NaiveTime>,
    pub exit_time: Option<NaiveTime>,
}

/// Set of known identities visible in one sampling tick.
///
/// `Unknown` faces never make it into a snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot(BTreeSet<String>);

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Collapse detections into a snapshot, dropping unknown faces and duplicates.
    pub fn from_detections<'a>(detections: impl IntoIterator<Item = &'a Detection>) -> Self {
        detections
            .into_iter()
            .filter_map(|d| d.label.name())
            .map(str::to_owned)
            .collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// Names present in `self` but not in `other`.
    pub fn difference(&self, other: &Snapshot) -> BTreeSet<String> {
        self.0.difference(&other.0).cloned().collect()
    }
}

impl<S: Into<String>> FromIterator<S> for Snapshot {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let names = iter
            .into_iter()
            .map(Into::into)
            .filter(|n: &String| !is_unknown_label(n))
            .collect();
        Self(names)
    }
}

/// Why a name in a delta could not be persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum AnomalyKind {
    /// Exit observed for a name with no record today; the write is discarded.
    ExitWithoutEntry,
    /// Recognized name has no entry in the identity registry.
    Unregistered,
    /// Storage failed for this name; other names in the tick are unaffected.
    Storage(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Anomaly {
    pub name: String,
    #[serde(flatten)]
    pub kind: AnomalyKind,
}

/// Entered/exited sets produced by one engine tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PresenceDelta {
    pub at: NaiveDateTime,
    pub entered: BTreeSet<String>,
    pub exited: BTreeSet<String>,
    pub anomalies: Vec<Anomaly>,
}

impl PresenceDelta {
    pub fn is_empty(&self) -> bool {
        self.entered.is_empty() && self.exited.is_empty() && self.anomalies.is_empty()
    }
}
