//! Protocol module for cross-instance notifications
//!
//! Defines the notification type and the newline-delimited JSON framing
//! used on the rendezvous socket.

mod codec;
mod notification;

pub use codec::*;
pub use notification::*;
