// SPDX-License-Identifier: MIT

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Stream(#[from] bp_stream::StreamError),
    #[error(transparent)]
    Store(#[from] bp_store::StoreError),
    #[error(transparent)]
    Codec(#[from] bp_codec::CodecError),
    #[error("decompression error: {0}")]
    Decompress(String),
    #[error("missing raw trace for sequence {0}")]
    MissingTrace(i64),
}
