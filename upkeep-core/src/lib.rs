//! Upkeep Core
//!
//! Core types shared by everything that writes or reads an upkeep audit log.
//!
//! This crate contains:
//! - Domain types: audit log lines, run outcome and state machine, host context
//! - History: reconstruction of past runs from an audit log

pub mod domain;
pub mod history;
