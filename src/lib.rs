//! Attribute engine for spectrum analyzer instrument drivers.
//!
//! This library holds the generic layer every feature-level driver call goes
//! through: typed attribute values, repeated-capability addressing (windows,
//! markers, traces, ...), descriptor-driven validation and coercion, and a
//! per-session value cache kept in step with the instrument over an external
//! command/transport link.
//!
//! The entry point is [`session::Session`], built with
//! [`session::SessionBuilder`] from a [`descriptor::DescriptorTable`] and a
//! device implementing [`transport::AttributeTransport`].

pub mod adapters;
pub mod capability;
pub mod catalog;
pub mod coercion;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod logging;
pub mod registry;
pub mod session;
pub mod store;
pub mod sync;
pub mod transport;
pub mod value;

pub use error::{AttributeError, AttributeResult};
pub use session::{Session, SessionBuilder, SetOutcome};
