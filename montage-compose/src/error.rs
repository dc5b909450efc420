use thiserror::Error;

use crate::object::ObjectId;

/// Errors surfaced by the composition engine.
#[derive(Error, Debug)]
pub enum Error {
    #[error("object {0} is not part of this composition")]
    ObjectNotFound(ObjectId),

    #[error("object {0} was already added to this composition")]
    DuplicateObject(ObjectId),

    #[error("failed to link pad {src} to {sink}")]
    LinkFailed { src: String, sink: String },

    #[error("object {object} exposes no output pad")]
    NoOutputPad { object: String },

    #[error("seek rejected by {object}")]
    SeekRejected { object: String },

    #[error("invalid seek rate {0}")]
    InvalidRate(f64),
}

pub type Result<T> = std::result::Result<T, Error>;
