//! OSC (Open Sound Control) remote control.
//!
//! Inbound datagrams are decoded by [`OscMessage::decode`] and routed by an
//! [`OscDispatcher`] to cue list operations. Addresses are relative to a
//! configurable prefix (default `/`):
//!
//! | address | argument | operation |
//! | --- | --- | --- |
//! | `cue/play`, `cue/pause`, `cue/stop` | cue id | act on one cue |
//! | `list/stopall` | | stop every cue |
//! | `list/go` | | play the cursor cue, advance |
//! | `list/next`, `list/previous` | | move the cursor |
//! | `list/goto` | cue id | move the cursor to a cue |
//!
//! Nothing is ever sent back.

mod codec;
mod dispatch;
mod server;

pub use codec::{OscArg, OscError, OscMessage};
pub use dispatch::{OscCommand, OscDispatcher};
pub use server::{OscClient, OscServer};
