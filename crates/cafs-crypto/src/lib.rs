//! Content hashing for cafs.
//!
//! Keys are derived as `base58(multihash(SHA-256(content)))`. The envelope is
//! self-describing (hash function code, digest length, digest), so a token can
//! be decoded and checked without knowing which store produced it.
//!
//! All crypto operations wrap established libraries — no custom cryptography.

pub mod hasher;

pub use hasher::{ContentHasher, HasherError};
