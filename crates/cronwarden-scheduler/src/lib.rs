//! `cronwarden-scheduler`: decides when jobs are due and drives the
//! supervisor.
//!
//! # Overview
//!
//! The [`engine::SchedulerEngine`] runs one boot pass and then ticks on a
//! fixed interval. Each pass walks the catalog in startup order (dependencies
//! first), asks [`schedule::is_due`] whether the job fired this minute, asks
//! the [`resolver`] whether its dependencies are satisfied, and hands both
//! answers to the supervisor's restart policy.
//!
//! A job whose dependencies are unsatisfied when it fires is not queued; it is
//! looked at again the next time its schedule matches.

pub mod engine;
pub mod resolver;
pub mod schedule;

pub use engine::{PassOutcome, SchedulerEngine};
pub use resolver::{is_satisfied, unsatisfied};
pub use schedule::{is_due, is_due_on_boot, minute_key};
