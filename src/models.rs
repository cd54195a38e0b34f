//! Core data models for the chunk trust lifecycle.
//!
//! A [`Chunk`] is one atomic, independently cacheable fact about a specific
//! vehicle, identified by the triple (`vehicle_key`, `content_id`,
//! `chunk_type`). At most one live chunk exists per triple; the store's
//! uniqueness constraint enforces this.
//!
//! Visibility is never stored. It is recomputed from `qa_status` and
//! `verified_status` by [`Visibility::derive`] at every read site, so a
//! drifting materialized column can never leak unverified content.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Enumerated category of knowledge a chunk carries.
///
/// The set mirrors the content schema: specs, locations, procedures, and
/// bulletin-derived summaries. Stored as its snake_case string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkType {
    FluidCapacity,
    TorqueSpec,
    PartLocation,
    KnownIssues,
    RemovalSteps,
    WiringDiagram,
    DiagFlow,
    LaborTime,
    Tsb,
    PartInfo,
}

impl ChunkType {
    pub const ALL: [ChunkType; 10] = [
        ChunkType::FluidCapacity,
        ChunkType::TorqueSpec,
        ChunkType::PartLocation,
        ChunkType::KnownIssues,
        ChunkType::RemovalSteps,
        ChunkType::WiringDiagram,
        ChunkType::DiagFlow,
        ChunkType::LaborTime,
        ChunkType::Tsb,
        ChunkType::PartInfo,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkType::FluidCapacity => "fluid_capacity",
            ChunkType::TorqueSpec => "torque_spec",
            ChunkType::PartLocation => "part_location",
            ChunkType::KnownIssues => "known_issues",
            ChunkType::RemovalSteps => "removal_steps",
            ChunkType::WiringDiagram => "wiring_diagram",
            ChunkType::DiagFlow => "diag_flow",
            ChunkType::LaborTime => "labor_time",
            ChunkType::Tsb => "tsb",
            ChunkType::PartInfo => "part_info",
        }
    }

    pub fn parse(s: &str) -> Option<ChunkType> {
        ChunkType::ALL.iter().copied().find(|t| t.as_str() == s)
    }

    /// Wrong values here can damage a vehicle or injure someone. These types
    /// are never passed on rules alone; the model-assisted check must run.
    pub fn is_safety_critical(&self) -> bool {
        matches!(
            self,
            ChunkType::TorqueSpec | ChunkType::WiringDiagram | ChunkType::DiagFlow
        )
    }

    /// Human-readable label for stub titles and CLI output.
    pub fn label(&self) -> &'static str {
        match self {
            ChunkType::FluidCapacity => "Fluid Capacity",
            ChunkType::TorqueSpec => "Torque Spec",
            ChunkType::PartLocation => "Part Location",
            ChunkType::KnownIssues => "Known Issues",
            ChunkType::RemovalSteps => "Removal Steps",
            ChunkType::WiringDiagram => "Wiring Diagram",
            ChunkType::DiagFlow => "Diagnostic Flow",
            ChunkType::LaborTime => "Labor Time",
            ChunkType::Tsb => "Technical Service Bulletin",
            ChunkType::PartInfo => "Part Info",
        }
    }
}

impl fmt::Display for ChunkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of the most recent QA evaluation of a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QaStatus {
    Pending,
    Pass,
    Fail,
}

impl QaStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QaStatus::Pending => "pending",
            QaStatus::Pass => "pass",
            QaStatus::Fail => "fail",
        }
    }

    pub fn parse(s: &str) -> Option<QaStatus> {
        match s {
            "pending" => Some(QaStatus::Pending),
            "pass" => Some(QaStatus::Pass),
            "fail" => Some(QaStatus::Fail),
            _ => None,
        }
    }
}

/// Trust level accumulated across QA evaluations.
///
/// Advances `unverified → candidate → verified` on passing verdicts and can
/// drop from any non-banned state directly to `banned`. It never regresses
/// from `verified` to `candidate` or from `candidate` to `unverified`;
/// `banned` is terminal short of an operator override.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustStatus {
    Unverified,
    Candidate,
    Verified,
    Banned,
}

impl TrustStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrustStatus::Unverified => "unverified",
            TrustStatus::Candidate => "candidate",
            TrustStatus::Verified => "verified",
            TrustStatus::Banned => "banned",
        }
    }

    pub fn parse(s: &str) -> Option<TrustStatus> {
        match s {
            "unverified" => Some(TrustStatus::Unverified),
            "candidate" => Some(TrustStatus::Candidate),
            "verified" => Some(TrustStatus::Verified),
            "banned" => Some(TrustStatus::Banned),
            _ => None,
        }
    }
}

/// What a downstream consumer may do with a chunk.
///
/// Derived, never stored: any consumer reading the chunks table directly
/// must apply [`Visibility::derive`] itself rather than trusting a
/// materialized column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    Quarantined,
    Safe,
    Banned,
}

impl Visibility {
    /// The derived-value invariant: `safe` iff the latest evaluation passed
    /// and trust has reached at least `candidate` without being banned.
    ///
    /// A failing evaluation on a `verified` chunk derives `banned` even
    /// before the promoter records the demotion: a regression in trusted
    /// content must read as rejected in any intermediate state.
    pub fn derive(qa_status: QaStatus, verified_status: TrustStatus) -> Visibility {
        match verified_status {
            TrustStatus::Banned => Visibility::Banned,
            TrustStatus::Verified => match qa_status {
                QaStatus::Pass => Visibility::Safe,
                QaStatus::Fail => Visibility::Banned,
                QaStatus::Pending => Visibility::Quarantined,
            },
            TrustStatus::Candidate => match qa_status {
                QaStatus::Pass => Visibility::Safe,
                _ => Visibility::Quarantined,
            },
            TrustStatus::Unverified => Visibility::Quarantined,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Quarantined => "quarantined",
            Visibility::Safe => "safe",
            Visibility::Banned => "banned",
        }
    }
}

/// Immutable identity of a chunk: the fact-per-vehicle triple.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChunkKey {
    /// Normalized `{year}_{make}_{model}_{engine}` key (see [`crate::vehicle`]).
    pub vehicle_key: String,
    /// Semantic `{chunk_type}:{component}` identifier.
    pub content_id: String,
    pub chunk_type: ChunkType,
}

impl ChunkKey {
    pub fn new(
        vehicle_key: impl Into<String>,
        content_id: impl Into<String>,
        chunk_type: ChunkType,
    ) -> Self {
        Self {
            vehicle_key: vehicle_key.into(),
            content_id: content_id.into(),
            chunk_type,
        }
    }
}

impl fmt::Display for ChunkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.vehicle_key, self.content_id, self.chunk_type
        )
    }
}

/// One atomic unit of vehicle knowledge with its full trust state.
///
/// Created as a quarantined stub on cache miss, mutated only through the QA
/// engine and trust promoter, never hard-deleted.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: String,
    pub vehicle_key: String,
    pub content_id: String,
    pub chunk_type: ChunkType,

    pub title: String,
    pub content_text: String,
    /// Structured payload whose shape depends on `chunk_type`.
    pub data: serde_json::Value,

    /// Ordered citation strings for the facts in `data`.
    pub sources: Vec<String>,
    /// Source confidence in [0, 1] as reported by the generator.
    pub source_confidence: f64,

    pub qa_status: QaStatus,
    pub qa_notes: Option<String>,
    /// Monotonic count of distinct passing evaluations.
    pub qa_pass_count: i64,
    pub last_qa_reviewed_at: Option<i64>,

    pub verified_status: TrustStatus,
    pub verified_at: Option<i64>,
    pub failed_at: Option<i64>,
    pub promotion_count: i64,

    /// Capped counter; exceeding the cap bans the chunk instead of retrying.
    pub regeneration_attempts: i64,
    pub regenerated_at: Option<i64>,

    pub created_at: i64,
    pub updated_at: i64,
}

impl Chunk {
    pub fn key(&self) -> ChunkKey {
        ChunkKey {
            vehicle_key: self.vehicle_key.clone(),
            content_id: self.content_id.clone(),
            chunk_type: self.chunk_type,
        }
    }

    pub fn visibility(&self) -> Visibility {
        Visibility::derive(self.qa_status, self.verified_status)
    }

    /// A stub is a row awaiting its first successful generation: no
    /// structured payload has ever been written.
    pub fn is_stub(&self) -> bool {
        self.qa_status == QaStatus::Pending && self.data.is_null()
    }
}
