// SPDX-License-Identifier: MIT

//! bp-core: canonical event envelope and shared primitives for the
//! Blueplane telemetry pipeline.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod clock;
pub mod error;
pub mod event;
pub mod event_type;
pub mod id;
pub mod platform;

pub use clock::{Clock, FakeClock, SystemClock};
pub use error::{CoreError, ValidationError};
pub use event::{Event, EventBuilder};
pub use event_type::EventType;
pub use id::{EventId, ShortId, WorkspaceHash};
pub use platform::Platform;
