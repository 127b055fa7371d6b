//! Pipeline stage state machine.

use serde::{Deserialize, Serialize};

use crate::Error;

/// Archive a recording originates from.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Source {
    House,
    Senate,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::House => "house",
            Self::Senate => "senate",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "house" => Some(Self::House),
            "senate" => Some(Self::Senate),
            _ => None,
        }
    }
}

/// Position of a video in the processing pipeline.
///
/// Ready states (`Discovered`, `Resolved`, `Downloaded`) are claimable by a
/// worker of the next stage; in-progress states (`Resolving`, `Downloading`,
/// `Transcribing`) are leased and actively worked; `Transcribed` and `Failed`
/// are terminal.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    Discovered,
    Resolving,
    Resolved,
    Downloading,
    Downloaded,
    Transcribing,
    Transcribed,
    Failed,
}

/// In-progress stages, in pipeline order. The recovery sweeper scans these.
pub const IN_PROGRESS_STAGES: [Stage; 3] = [Stage::Resolving, Stage::Downloading, Stage::Transcribing];

impl Stage {
    /// Convert to database string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Discovered => "DISCOVERED",
            Self::Resolving => "RESOLVING",
            Self::Resolved => "RESOLVED",
            Self::Downloading => "DOWNLOADING",
            Self::Downloaded => "DOWNLOADED",
            Self::Transcribing => "TRANSCRIBING",
            Self::Transcribed => "TRANSCRIBED",
            Self::Failed => "FAILED",
        }
    }

    /// Parse from database string representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "DISCOVERED" => Some(Self::Discovered),
            "RESOLVING" => Some(Self::Resolving),
            "RESOLVED" => Some(Self::Resolved),
            "DOWNLOADING" => Some(Self::Downloading),
            "DOWNLOADED" => Some(Self::Downloaded),
            "TRANSCRIBING" => Some(Self::Transcribing),
            "TRANSCRIBED" => Some(Self::Transcribed),
            "FAILED" => Some(Self::Failed),
            _ => None,
        }
    }

    /// A ready state a worker of the next stage may claim.
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Discovered | Self::Resolved | Self::Downloaded)
    }

    /// A leased, actively worked state.
    pub fn is_in_progress(&self) -> bool {
        matches!(self, Self::Resolving | Self::Downloading | Self::Transcribing)
    }

    /// A state with no further automated transition.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Transcribed | Self::Failed)
    }

    /// The in-progress stage a claim moves this ready stage into.
    pub fn claim_target(&self) -> Option<Stage> {
        match self {
            Self::Discovered => Some(Self::Resolving),
            Self::Resolved => Some(Self::Downloading),
            Self::Downloaded => Some(Self::Transcribing),
            _ => None,
        }
    }

    /// The stage a successful action advances this in-progress stage into.
    pub fn advance_target(&self) -> Option<Stage> {
        match self {
            Self::Resolving => Some(Self::Resolved),
            Self::Downloading => Some(Self::Downloaded),
            Self::Transcribing => Some(Self::Transcribed),
            _ => None,
        }
    }

    /// The ready stage a failed or stuck in-progress record is requeued to.
    pub fn prior_ready(&self) -> Option<Stage> {
        match self {
            Self::Resolving => Some(Self::Discovered),
            Self::Downloading => Some(Self::Resolved),
            Self::Transcribing => Some(Self::Downloaded),
            _ => None,
        }
    }

    /// Validate a transition. Any pair not in this table is rejected; the
    /// registry refuses to commit it.
    pub fn can_transition_to(&self, target: Stage) -> bool {
        use Stage::*;

        match (self, target) {
            // Claims: ready -> its in-progress stage.
            (Discovered, Resolving) | (Resolved, Downloading) | (Downloaded, Transcribing) => true,

            // Advances: in-progress -> next ready / terminal success.
            (Resolving, Resolved) | (Downloading, Downloaded) | (Transcribing, Transcribed) => true,

            // Requeues: in-progress back to its prior ready stage (worker
            // failure with attempts remaining, or sweeper recovery).
            (Resolving, Discovered) | (Downloading, Resolved) | (Transcribing, Downloaded) => true,

            // Budget exhausted or permanent error: any in-progress -> FAILED.
            (Resolving | Downloading | Transcribing, Failed) => true,

            // Terminal states are absorbing.
            _ => false,
        }
    }

    /// Attempt to transition to a new stage.
    pub fn transition_to(&self, target: Stage) -> Result<Stage, Error> {
        if self.can_transition_to(target) {
            Ok(target)
        } else {
            Err(Error::InvalidStateTransition {
                from: self.as_str().to_string(),
                to: target.as_str().to_string(),
            })
        }
    }
}
