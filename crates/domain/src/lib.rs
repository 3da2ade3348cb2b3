//! # homenode-domain
//!
//! Pure domain model for the homenode automation core.
//!
//! ## Responsibilities
//! - Foundational types: instance names and kinds, timestamps, error conventions
//! - Define the tagged **Rule** value (universal, numeric, fade, api-action, custom)
//! - Define the **ApiTarget** chained-command grammar ([`action::ActionSpec`])
//! - Rule **validation** — per-kind default and schedule validators
//! - **Schedule** resolution — keywords, HH:MM parsing, rule-queue building
//! - The node **config** schema and its structural validation
//!
//! ## Dependency rule
//! This crate has **no internal dependencies** and performs no IO.
//! It must never import anything from `app`, adapters, or runtime crates.
//! All IO boundaries are expressed as traits in the `app` crate (ports).

pub mod error;
pub mod kind;
pub mod name;
pub mod time;

pub mod action;
pub mod config;
pub mod rule;
pub mod schedule;
pub mod validate;
