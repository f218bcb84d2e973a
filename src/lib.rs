//! asciibus - Modbus ASCII master and slave stack over serial lines and TCP
//!
//! The public API lives under [`api`] and is re-exported at the crate root:
//! the [`ModbusCommands`] façade, the [`DiscoveryTransport`] that probes a
//! channel for the units answering on it, the [`ConnectionAcceptor`] that
//! keeps a pool of devices dialing in, and [`ModbusSlave`] serving one or
//! more units from a [`SlaveStore`].
//!
//! Framing, channels and process images are implementation details kept in
//! hidden modules; the types callers need from them are re-exported here.

pub mod api;
#[doc(hidden)]
pub mod cli;
#[doc(hidden)]
pub mod core;
#[doc(hidden)]
pub mod protocol;

pub use api::*;
