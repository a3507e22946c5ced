// SPDX-License-Identifier: MIT

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("unknown platform partition: {0}")]
    UnknownPlatform(String),
    #[error("batch insert failed after {attempts} attempts: {source}")]
    BatchExhausted {
        attempts: u32,
        #[source]
        source: rusqlite::Error,
    },
}
