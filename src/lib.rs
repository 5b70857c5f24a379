//! Holo: minimal configuration management for single hosts.
//!
//! A frontend process scans, selects and dispatches entities; plugin
//! processes reconcile them. The crate is organised in layers:
//!
//! - **[`runtime`]**, **[`platform`]**, **[`fs`]**, **[`exec`]**: directories,
//!   package-manager conventions, safe writes, and child processes
//! - **[`files`]**, **[`accounts`]**, **[`sshkeys`]**: the three plugins
//! - **[`plugin`]**: the text protocol between frontend and plugins
//! - **[`orchestrator`]**, **[`commands`]**: the frontend (`holo apply`, `diff`, `scan`)
#![deny(clippy::or_fun_call)]
#![deny(clippy::bool_to_int_with_if)]

pub mod accounts;
pub mod cli;
pub mod commands;
pub mod error;
pub mod exec;
pub mod files;
pub mod fs;
pub mod logging;
pub mod orchestrator;
pub mod platform;
pub mod plugin;
pub mod runtime;
pub mod sshkeys;
