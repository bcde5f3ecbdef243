//! `nweb-core`: resolves a `(host, route)` pair published as signed
//! relay events into an inert, integrity-checked document bundle.
//!
//! The pipeline runs DNS bootstrap (C3) → relay fetch (C4/C5) → SHA-256
//! and publisher-key verification (C6) → bundle assembly (C7), all
//! driven through [`resolver::Resolver`] directly or via the
//! correlation-id'd RPC surface in [`rpc`] (C8). [`cache`] and
//! [`offline`] hold the bounded caches and persistent stores every
//! layer is built on; [`config::Config`] collects every tunable into
//! one value constructed once per execution context.

#![allow(async_fn_in_trait)]

pub mod assemble;
pub mod cache;
pub mod config;
pub mod doh;
pub mod error;
pub mod event;
pub mod keys;
pub mod offline;
pub mod relay;
pub mod resolver;
pub mod rpc;
pub mod verify;

pub use assemble::Bundle;
pub use config::Config;
pub use error::{Error, Result, Stage};
pub use resolver::Resolver;
