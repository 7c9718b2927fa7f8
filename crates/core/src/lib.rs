//! Strata Core - Shared types for Strata incremental collections.
//!
//! This crate provides the foundational types used by every other Strata crate:
//!
//! - `ElementId`: Stable, generation-checked handle to one element
//! - `CollectionId`: Identity of a base or derived collection
//! - `Cause`: Identity of the mutation that produced a set of events
//! - `Error` / `Rejection`: Error types for write requests
//!
//! # Example
//!
//! ```rust
//! use strata_core::{msg, Error, Rejection};
//!
//! let err: Error = Rejection::illegal_element(msg::ELEMENT_EXISTS).into();
//! assert_eq!(err.rejection().map(|r| r.reason()), Some(msg::ELEMENT_EXISTS));
//! ```

#![no_std]

extern crate alloc;

mod error;
mod id;

pub use error::{msg, Error, OperationError, Rejection, Result};
pub use id::{Cause, CollectionId, ElementId};
