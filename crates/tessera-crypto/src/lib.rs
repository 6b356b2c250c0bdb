//! Hashing primitives for Tessera.
//!
//! Provides the git-framed SHA-1 object digest used to derive every
//! [`ObjectId`](tessera_types::ObjectId), and the raw SHA-1 used for pack
//! trailers and index checksums.
//!
//! All crypto operations wrap established libraries; there is no custom cryptography.

pub mod hasher;

pub use hasher::{ContentHasher, StreamChecksum};
