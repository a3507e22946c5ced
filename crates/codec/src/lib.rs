// SPDX-License-Identifier: MIT

//! bp-codec: event envelope wire form, validation, and payload compression (C1).
//!
//! The envelope's wire form on the stream is a flat `key -> string` mapping
//! (§6); complex fields (`payload`, `metadata`) are JSON-encoded strings.
//! This module hides that flattening from the rest of the pipeline.

#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod compress;
mod error;
mod wire;

pub use compress::{compress, decompress};
pub use error::CodecError;
pub use wire::{decode, encode, WireFields};
