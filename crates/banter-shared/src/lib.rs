//! # banter-shared
//!
//! Types shared between the session engine and its collaborators:
//! id newtypes, room-id computation, attachment classification, and the
//! tagged wire protocol exchanged with clients over the WebSocket.

pub mod attachments;
pub mod protocol;
pub mod room;
pub mod types;
