//! Core modules of the configuration root engine.
//!
//! Storage primitives (`store`, `memory`, `db`, `broker`) sit at the bottom;
//! the root catalogue, marker protocol, rename and backup handling build on
//! them; `locator`, `import` and `startup` are the entry points a host calls.

pub mod backup;
pub mod broker;
pub mod carryover;
pub mod cleanup;
pub mod collaborator;
pub mod config;
pub mod db;
pub mod error;
pub mod guard;
pub mod import;
pub mod locator;
pub mod memory;
pub mod payload;
pub mod rename;
pub mod roots;
pub mod schemas;
pub mod startup;
pub mod store;
pub mod time;
