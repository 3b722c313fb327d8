use std::fmt::Display;
use std::path::PathBuf;

use thiserror::Error;

use crate::election::{BallotStyleId, ContestId, PrecinctId};
use crate::metadata::BallotPageMetadata;

pub type Result<T> = std::result::Result<T, InterpretError>;

/// Which layout a contest count came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutKind {
    Template,
    Ballot,
}

impl Display for LayoutKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LayoutKind::Template => write!(f, "template"),
            LayoutKind::Ballot => write!(f, "ballot"),
        }
    }
}

/// Everything that can stop a single ballot page from being interpreted.
/// None of these are retried internally.
#[derive(Error, Debug)]
pub enum InterpretError {
    #[error("no barcode found in ballot image")]
    NoBarcodeFound,

    #[error("unable to decode ballot metadata: {reason}")]
    MetadataDecode { reason: String },

    #[error(
        "interpreter configured with test_mode={test_mode} cannot accept {kind} with is_test_ballot={is_test_ballot}"
    )]
    TestModeMismatch {
        kind: LayoutKind,
        test_mode: bool,
        is_test_ballot: bool,
    },

    #[error(
        "cannot interpret ballot because not all required templates have been added: {metadata:?}"
    )]
    TemplatesIncomplete { metadata: BallotPageMetadata },

    #[error(
        "{layout} has {found} contest(s) but {expected} were expected; maybe it is from an old version of the election definition?"
    )]
    ContestCountMismatch {
        layout: LayoutKind,
        found: usize,
        expected: usize,
    },

    #[error("contest {contest_id} is supposed to have two options (yes/no), but found {found}")]
    UnexpectedOptionCount { contest_id: ContestId, found: usize },

    #[error("contest {contest_id} is supposed to have {expected} option(s), but found {found}")]
    ContestOptionCountMismatch {
        contest_id: ContestId,
        expected: usize,
        found: usize,
    },

    #[error("unable to register ballot onto template: {reason}")]
    RegistrationFailed { reason: String },

    #[error("ballot style {0} is not in the election definition")]
    UnknownBallotStyle(BallotStyleId),

    #[error("precinct {0} is not in the election definition")]
    UnknownPrecinct(PrecinctId),

    #[error("failed to load image {path}: {source}")]
    ImageLoad {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

impl InterpretError {
    pub fn metadata_decode(reason: impl Into<String>) -> Self {
        InterpretError::MetadataDecode {
            reason: reason.into(),
        }
    }
}
