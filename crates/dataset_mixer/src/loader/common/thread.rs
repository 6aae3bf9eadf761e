//! Thread-local storage for worker identification.
//!
//! Materializers can read the ID of the worker they run on, e.g. to open one
//! file handle per worker or to tag log lines.

use std::cell::Cell;

thread_local! {
    /// Thread-local worker ID.
    ///
    /// Each worker thread is assigned a unique ID (0 to num_workers-1) when spawned.
    /// `None` on any thread that is not a loader worker, including the caller's
    /// thread when materializing inline.
    pub static WORKER_ID: Cell<Option<usize>> = const { Cell::new(None) };
}

/// ID of the loader worker running the current thread, if any.
pub fn current_worker_id() -> Option<usize> {
    WORKER_ID.with(Cell::get)
}

pub(crate) fn set_worker_id(worker_id: usize) {
    WORKER_ID.with(|id| id.set(Some(worker_id)));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_id_is_per_thread() {
        assert_eq!(current_worker_id(), None);
        let spawned = std::thread::spawn(|| {
            set_worker_id(3);
            current_worker_id()
        })
        .join()
        .unwrap();
        assert_eq!(spawned, Some(3));
        assert_eq!(current_worker_id(), None);
    }
}
