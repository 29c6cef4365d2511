#![doc = include_str!("../README.md")]
#![forbid(unsafe_code)]
#![deny(elided_lifetimes_in_paths, unreachable_pub)]
#![warn(
    missing_docs,
    clippy::doc_link_with_quotes,
    clippy::doc_markdown,
    clippy::missing_errors_doc
)]

pub mod clock;
pub mod config;
pub mod error;
pub mod factory;
mod metrics;
mod policy;
mod pool;
mod resource;
mod waiter;

pub use crate::{
    clock::{Clock, TokioClock},
    config::PoolConfig,
    error::{ConfigError, Error},
    factory::ResourceFactory,
    metrics::PoolState,
    pool::Pool,
    resource::Pooled,
};
