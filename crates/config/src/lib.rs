mod config;
mod observer;

pub use config::*;
pub use observer::*;
