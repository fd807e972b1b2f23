//! Profile service module
//!
//! This module contains [`ProfileService`], the facade the application talks
//! to. It is split by concern:
//!
//! - `core`: construction, shared state, teardown
//! - `operations`: select, add, clone, remove, rename
//! - `io`: settings access and saving
//! - `scheduler`: the debounced save timer
//! - `watch`: keeping the catalog in sync with the directory

mod core;
mod io;
mod operations;
mod scheduler;
#[cfg(feature = "watch")]
mod watch;

pub use self::core::{ActiveState, ProfileService};
