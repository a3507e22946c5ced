// SPDX-License-Identifier: MIT

use bp_core::ValidationError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("compression error: {0}")]
    Compress(String),
    #[error("decompression error: {0}")]
    Decompress(String),
}
