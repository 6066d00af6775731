/// Opaque identity of a thread of execution.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TaskId(pub u64);

/// Provides the identity of the currently executing task.
///
/// Only the task that started a session is profiled; call-graph events from
/// any other task are dropped.
pub trait TaskIdentity {
    fn current(&self) -> TaskId;
}

/// Identifies tasks by their pthread handle.
#[derive(Clone, Copy, Debug, Default)]
pub struct CurrentThread;

impl TaskIdentity for CurrentThread {
    fn current(&self) -> TaskId {
        // pthread_self() is async-signal-safe and never fails
        TaskId(unsafe { libc::pthread_self() } as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_thread_is_stable() {
        let identity = CurrentThread;
        assert_eq!(identity.current(), identity.current());
    }

    #[test]
    fn test_other_thread_differs() {
        let here = CurrentThread.current();
        let there = std::thread::spawn(|| CurrentThread.current()).join().unwrap();
        assert_ne!(here, there);
    }
}
