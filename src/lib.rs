//! Rscan dispatch - turns scan requests into queued sub-tasks
//!
//! A request (port scan, domain scan, POC scan or one of the x-scan
//! shapes) is normalized, split into bounded slices and fanned out as
//! independently queued sub-tasks for the worker pool.
//!
//! # Warning
//! The queued tasks scan real networks. Only dispatch against systems you
//! own or are explicitly authorized to assess.

pub mod cli;
pub mod config;
pub mod dispatch;
pub mod display;
pub mod error;
pub mod extract;
pub mod model;
pub mod partition;
pub mod query;
pub mod queue;
pub mod resolve;
pub mod store;
pub mod suffix;
pub mod target;

pub use dispatch::Dispatcher;
pub use error::{DispatchError, Result};
