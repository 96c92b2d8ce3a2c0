//! # banter-store
//!
//! Collaborator interfaces consumed by the session engine, plus in-memory
//! implementations used by the dev server and the test suites.
//!
//! The engine never talks to a database, an object store, or a credential
//! service directly; it goes through the narrow traits defined here:
//!
//! - [`UserStore`] / [`GroupStore`] / [`MessageStore`]: the document-store
//!   collaborator (durable entities, querying)
//! - [`BlobStore`]: object storage for attachment payloads
//! - [`TokenVerifier`]: credential verification at handshake time

pub mod error;
pub mod memory;
pub mod models;
mod traits;

pub use error::{BlobError, Result, StoreError, TokenError};
pub use traits::{
    BlobHandle, BlobStore, BlobUploadOptions, Claims, GroupStore, MessageStore, TokenVerifier,
    UserStore,
};
