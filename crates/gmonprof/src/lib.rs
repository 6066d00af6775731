//! gprof-compatible sampling profiler core.
//!
//! A [`Session`] owns fixed-size buffers for a PC histogram and a call-graph
//! arc table. A timer feeds it register snapshots through
//! [`Session::sample`], instrumented function prologues report edges through
//! [`Session::record_call`], and [`Session::save`] persists both as a gmon
//! stream into a [`PersistentStore`].

extern crate serde;
#[macro_use]
extern crate serde_derive;

pub mod backtrace;
pub mod call_graph;
pub mod error;
pub mod histogram;
pub mod profile;
pub mod report;
pub mod serialization;
pub mod session;
pub mod store;
mod util;

pub use error::{Error, Result, StoreError};
pub use serialization::deserializer::{export_gmon_out, read_store, RecordVisitor};
pub use session::configuration::{Configuration, PointerWidth};
pub use session::task::{CurrentThread, TaskId, TaskIdentity};
pub use session::{Session, State};
pub use store::{FileStore, MemoryStore, PersistentStore};

/// Route `log` output to stderr, filtered by `RUST_LOG`.
#[cfg(feature = "debug")]
pub fn init_debug_logging() {
    env_logger::builder()
        .format_timestamp(None)
        .format_module_path(false)
        .init();
}
