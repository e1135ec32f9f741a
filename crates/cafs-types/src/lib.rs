//! Foundation types for cafs, the content-addressed file store.
//!
//! Every other cafs crate depends on `cafs-types`.
//!
//! # Key Types
//!
//! - [`Key`] — content-derived address of the form `/<prefix>/<token>`
//! - [`TypeError`] — key parsing failures

pub mod error;
pub mod key;

pub use error::TypeError;
pub use key::Key;
