//! # vms-core
//!
//! Core types shared across the VMS sync workspace.
//!
//! This crate provides:
//! - Record kinds and the per-kind field table (`KindSpec`)
//! - External CRM identifiers and their format contract
//! - Entity structs for external/local records, scoped users, findings, and runs
//! - Reconciliation decisions and field diffs
//! - Run phases and status enums with state machine transitions
//! - Cross-cutting error types

pub mod decision;
pub mod entities;
pub mod enums;
pub mod errors;
pub mod ids;
pub mod kinds;
pub mod rules;
pub mod scope;
