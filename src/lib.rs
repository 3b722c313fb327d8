//! Turns scans of paper ballots into cast vote records.
//!
//! Summary ballots carry their votes in a barcode. Hand-marked ballots are
//! registered against a blank template of the same page and each target is
//! scored by how much new ink it has.

mod types;

pub mod debug;
pub mod election;
pub mod error;
pub mod geometry;
pub mod image_utils;
pub mod interpret;
pub mod layout;
pub mod metadata;
pub mod registration;
pub mod scoring;
pub mod templates;
pub mod votes;

pub use error::{InterpretError, Result};
pub use interpret::{InterpretedBallot, Interpreter, InterpreterOptions};
pub use votes::{CastVoteRecord, ContestVote};
