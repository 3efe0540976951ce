//! Collaborator implementations
//!
//! This module contains implementations of the `AttributeTransport` and
//! `ErrorQueue` traits. Real instrument links live with the command table
//! outside this crate; the mock here backs tests and offline development.

pub mod mock;

pub use mock::MockDevice;
