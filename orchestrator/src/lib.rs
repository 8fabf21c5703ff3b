//! Maintenance orchestration core
//!
//! A [`runner::Runner`] drives one task through a bounded reason-act loop.
//! Every proposed tool call passes the [`guardrail::GuardrailEngine`] before
//! the [`tools::ToolDispatcher`] executes it, and the run is recorded step by
//! step in the [`store::RunLog`].

pub mod app_state;
pub mod config;
pub mod context;
pub mod external;
pub mod guardrail;
pub mod notify;
pub mod reasoning;
pub mod runner;
pub mod store;
pub mod tools;
pub mod watcher;
pub mod work_order;
