//! extscript - Extension scripting engine
//!
//! Operators attach small JavaScript scripts to ticketing lifecycle events at
//! any level of a dotted scope hierarchy (`acme`, `acme.summer-conf`, ...).
//! This library:
//! - validates scripts statically before they are accepted ([`validator`]);
//! - resolves which scripts apply at a firing scope ([`resolver`]);
//! - compiles and caches scripts by content hash ([`artifact_cache`]);
//! - runs sync chains on the caller's thread and async scripts on FIFO
//!   workers, one per script path ([`engine`], [`extension_dispatcher`]).
//!
//! [`service::ExtensionService`] is the entry point that ties these together.

#![forbid(unsafe_code)]
#![cfg_attr(
    test,
    allow(
        clippy::uninlined_format_args,
        clippy::missing_const_for_fn,
        clippy::match_same_arms
    )
)]
#![allow(
    clippy::must_use_candidate,
    clippy::doc_markdown,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions
)]

pub mod artifact_cache;
pub mod cli;
pub mod clock;
pub mod config;
pub mod connectors;
pub mod crypto_shim;
pub mod engine;
pub mod error;
pub mod extension_dispatcher;
pub mod extension_events;
pub mod extensions_js;
pub mod host;
pub mod metadata;
pub mod model;
pub mod resolver;
pub mod service;
pub mod store;
pub mod validator;

pub use error::{Error, Result};
pub use extension_dispatcher::AsyncDispatcher;
pub use service::{ExtensionService, ServiceComponents};
