//! Core domain types
//!
//! These types describe one upgrade run: the host it targets, the lines it
//! appends to the audit log, and how it ends. The runner produces them and
//! `history` reads them back.

pub mod host;
pub mod log;
pub mod outcome;
