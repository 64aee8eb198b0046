//! Thread-local storage for worker identification.
//!
//! Provides a thread-local worker ID that allows workers to identify themselves
//! in log events and error messages.

use std::cell::Cell;

thread_local! {
    /// Thread-local worker ID.
    ///
    /// Each worker thread is assigned a unique ID (0 to num_workers-1) when spawned.
    /// The orchestrating thread keeps the default of 0.
    pub static WORKER_ID: Cell<usize> = const { Cell::new(0) };
}

/// ID of the calling worker thread.
pub fn current_worker_id() -> usize {
    WORKER_ID.with(Cell::get)
}
