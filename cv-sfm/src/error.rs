use core::fmt;
use std::io;
use thiserror::Error;

/// The entity tables of a [`Map`](crate::Map), used to report which lookup failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Camera,
    RigCamera,
    RigInstance,
    Shot,
    Landmark,
    Observation,
    Bias,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Camera => "camera",
            Self::RigCamera => "rig camera",
            Self::RigInstance => "rig instance",
            Self::Shot => "shot",
            Self::Landmark => "landmark",
            Self::Observation => "observation",
            Self::Bias => "bias",
        })
    }
}

/// Failures of reconstruction graph operations.
///
/// Every operation returning this error leaves the map untouched.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MapError {
    #[error("{kind} `{id}` already exists")]
    DuplicateId { kind: EntityKind, id: String },
    #[error("{kind} `{id}` not found")]
    NotFound { kind: EntityKind, id: String },
    #[error("invalid state: {0}")]
    InvalidState(String),
}

impl MapError {
    pub(crate) fn duplicate(kind: EntityKind, id: impl Into<String>) -> Self {
        Self::DuplicateId {
            kind,
            id: id.into(),
        }
    }

    pub(crate) fn not_found(kind: EntityKind, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }
}

/// Failures reading or writing the textual track index.
#[derive(Debug, Error)]
pub enum TracksError {
    #[error("track file I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error("unsupported track file header `{0}`")]
    UnsupportedVersion(String),
    #[error("line {line}: {reason}")]
    Parse { line: usize, reason: String },
    #[error("identifier {0:?} contains a tab or newline and cannot be written")]
    InvalidId(String),
}
