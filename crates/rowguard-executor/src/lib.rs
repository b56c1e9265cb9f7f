//! RowGuard Executor
//!
//! Provides:
//! - Policy resolution from raw settings
//! - Per-row interception (sentinel abort, value perturbation)
//! - The pipeline driver that moves rows from source to sink
//! - The run-strategy hook and the sentinel module lifecycle

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod executor;
pub mod hook;
pub mod interceptor;
pub mod noise;
pub mod policy;

mod engine;

pub use engine::{SentinelModule, SentinelRun, StandardRun};
pub use executor::{
    CollectingSink, JunkFilter, PipelineDriver, RunReport, RunState, StatementContext,
    StopReason, TupleSink, TupleSource, VecSource,
};
pub use hook::{HookHandle, HookRegistry, RunStrategy};
pub use interceptor::{InterceptDecision, RowInterceptor};
pub use noise::{NoiseGenerator, NoiseSeed};
pub use policy::PolicyConfig;
