use thiserror::Error;

use crate::pipeline::PipelineState;

/// Errors surfaced when driving a timeline.
#[derive(Error, Debug)]
pub enum Error {
    #[error("operation requires a prepared pipeline, state is {0:?}")]
    NotReady(PipelineState),

    #[error("pipeline has no tracks to play")]
    NoTracks,

    #[error(transparent)]
    Timeline(#[from] montage_timeline::Error),

    #[error(transparent)]
    Compose(#[from] montage_compose::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
