//! `uptime-scheduler` — the self-rescheduling ping orchestrator.
//!
//! # Overview
//!
//! Nothing here runs on its own. Each inbound trigger asks the
//! [`engine::SchedulerEngine`] for one cycle: take the cycle lock, run the
//! jobs that are due, record results, then arm a [`trigger::SelfTrigger`] so a
//! later invocation continues the chain. All cross-invocation state lives in
//! the coordination store.
//!
//! | Module      | Responsibility                                          |
//! |-------------|---------------------------------------------------------|
//! | `lock`      | TTL lock with owner-checked release                     |
//! | `cycle`     | cycle records and the cancellation epoch                |
//! | `registry`  | job definitions and their run state                     |
//! | `engine`    | one cycle: lock, due jobs, deadline, rearm              |
//! | `trigger`   | store-backed and deferred-call self-triggers            |
//! | `pacemaker` | always-on caller for the store-backed trigger           |
//! | `handler`   | named cron handlers (`purge-history`)                   |
//! | `schedule`  | interval and cron schedule arithmetic                   |
//!
//! # Cancellation
//!
//! `cancel_all` bumps an integer epoch. Every cycle carries the epoch of the
//! chain it continues; once the counter has moved past it the cycle finishes
//! its due work and stops without rearming.

pub mod cycle;
pub mod engine;
pub mod error;
pub mod handler;
pub mod keys;
pub mod lock;
pub mod pacemaker;
pub mod registry;
pub mod schedule;
pub mod stats;
pub mod trigger;
pub mod types;

pub use engine::{CycleOutcome, CycleReport, Invocation, SchedulerEngine, SchedulerStatus};
pub use error::{Result, SchedulerError};
pub use handler::{CronHandlers, CronTask, PurgeHistory};
pub use pacemaker::Pacemaker;
pub use registry::JobRegistry;
pub use trigger::{DeferredCallTrigger, SelfTrigger, StoreTrigger};
pub use types::{Job, JobAction, JobKind, JobSpec, JobUpdate, Schedule};
