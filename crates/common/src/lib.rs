//! Crate includes reusable utils for the observer services.  Such as
//! initializing the tracing framework and reading env overrides.

pub mod env;
pub mod logging;
