//! # kcpraw-frame
//!
//! Wire types for the multiplexed stream protocol carried inside the tunnel.
//!
//! ## Frame Layout
//!
//! ```text
//! | ver (1B) | cmd (1B) | length (2B, LE) | stream id (4B, LE) | data ... |
//! ```
//!
//! The relay only ever looks at the first two bytes (version and command) to
//! decide where a connection goes. The rest of the header is decoded here so
//! tooling and tests can build and inspect whole frames.
//!
//! ## Commands
//!
//! - `SYN` (0): stream open
//! - `FIN` (1): stream close, a.k.a. EOF mark
//! - `PSH` (2): data push
//! - `NOP` (3): no operation
//! - `UPD` (4): window update, protocol version 2 only

mod error;
mod header;

pub use error::FrameError;
pub use header::*;
