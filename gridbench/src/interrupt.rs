//! Cooperative interruption of OS threads.
//!
//! Stressors and endpoint pollers run on plain threads that block in
//! `park_timeout`. Interrupting one sets its [`InterruptFlag`] and unparks it;
//! the thread notices at its next check and winds down. The owner waits for
//! it with an async, deadline-bounded [`InterruptibleThread::join_until`].

use std::{
    io,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle, Thread},
    time::{Duration, Instant},
};

use tokio::sync::oneshot;

use crate::error::Interrupted;

/// Seen from inside the thread: has somebody asked us to stop?
#[derive(Debug, Clone, Default)]
pub struct InterruptFlag(Arc<AtomicBool>);

impl InterruptFlag {
    pub fn is_interrupted(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn check(&self) -> Result<(), Interrupted> {
        if self.is_interrupted() {
            Err(Interrupted)
        } else {
            Ok(())
        }
    }

    /// Sleeps the current thread, waking early when interrupted. Only
    /// meaningful on the thread the flag was handed to.
    pub fn sleep(&self, duration: Duration) -> Result<(), Interrupted> {
        let deadline = Instant::now() + duration;
        loop {
            self.check()?;
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            thread::park_timeout(deadline - now);
        }
    }

    fn raise(&self) {
        self.0.store(true, Ordering::Release);
    }
}

/// Seen from outside the thread: the means to stop it.
#[derive(Debug, Clone)]
pub struct Interrupter {
    flag: InterruptFlag,
    thread: Thread,
}

impl Interrupter {
    pub fn interrupt(&self) {
        self.flag.raise();
        self.thread.unpark();
    }
}

#[derive(Debug)]
pub struct InterruptibleThread<T> {
    interrupter: Interrupter,
    result: Option<oneshot::Receiver<thread::Result<T>>>,
    handle: JoinHandle<()>,
}

/// Spawns a named thread running `f`. A panic in `f` is caught and handed
/// back through [`InterruptibleThread::join_until`].
pub fn spawn_interruptible<F, T>(name: impl Into<String>, f: F) -> io::Result<InterruptibleThread<T>>
where
    F: FnOnce(InterruptFlag) -> T + Send + 'static,
    T: Send + 'static,
{
    let flag = InterruptFlag::default();
    let (tx, rx) = oneshot::channel();
    let thread_flag = flag.clone();
    let handle = thread::Builder::new().name(name.into()).spawn(move || {
        let result = catch_unwind(AssertUnwindSafe(|| f(thread_flag)));
        // the owner may have stopped waiting
        let _ = tx.send(result);
    })?;
    let interrupter = Interrupter {
        flag,
        thread: handle.thread().clone(),
    };
    Ok(InterruptibleThread {
        interrupter,
        result: Some(rx),
        handle,
    })
}

impl<T> InterruptibleThread<T> {
    pub fn name(&self) -> &str {
        self.handle.thread().name().unwrap_or("<unnamed>")
    }

    pub fn interrupt(&self) {
        self.interrupter.interrupt();
    }

    pub fn interrupter(&self) -> Interrupter {
        self.interrupter.clone()
    }

    /// Waits for the thread's result until `deadline`. `None` when the
    /// deadline passed first (call again to keep waiting) or the result was
    /// already taken. `Some(Err(_))` carries the panic payload.
    pub async fn join_until(&mut self, deadline: tokio::time::Instant) -> Option<thread::Result<T>> {
        let rx = self.result.as_mut()?;
        match tokio::time::timeout_at(deadline, rx).await {
            Ok(Ok(result)) => {
                self.result = None;
                Some(result)
            }
            Ok(Err(_)) => {
                self.result = None;
                None
            }
            Err(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn returns_the_result() {
        let mut t = spawn_interruptible("adder", |_| 2 + 2).unwrap();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        assert_eq!(t.join_until(deadline).await.unwrap().unwrap(), 4);
        assert!(t.join_until(deadline).await.is_none());
    }

    #[tokio::test]
    async fn interrupt_wakes_a_sleeping_thread() {
        let mut t = spawn_interruptible("sleeper", |flag| flag.sleep(Duration::from_secs(60))).unwrap();
        assert_eq!(t.name(), "sleeper");
        let soon = tokio::time::Instant::now() + Duration::from_millis(50);
        assert!(t.join_until(soon).await.is_none());
        t.interrupt();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        assert_eq!(t.join_until(deadline).await.unwrap().unwrap(), Err(Interrupted));
    }

    #[tokio::test]
    async fn panics_are_caught() {
        let mut t = spawn_interruptible("panicker", |_| -> u32 { panic!("boom") }).unwrap();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        assert!(t.join_until(deadline).await.unwrap().is_err());
    }

    #[test]
    fn sleep_without_interrupt_completes() {
        let flag = InterruptFlag::default();
        let started = Instant::now();
        assert_eq!(flag.sleep(Duration::from_millis(20)), Ok(()));
        assert!(started.elapsed() >= Duration::from_millis(20));
    }
}
