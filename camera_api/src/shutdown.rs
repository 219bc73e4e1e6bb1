use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Process-wide running flag.
///
/// Besides the flag itself it carries a channel nobody ever sends on. Every
/// timed wait in the crate blocks on `recv_timeout` of that channel, and
/// `stop` drops the sender, which wakes all of them at once.
#[derive(Debug)]
pub struct RunFlag {
    running: AtomicBool,
    wake: Mutex<Option<Sender<()>>>,
    sleepers: Receiver<()>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wait {
    Elapsed,
    Cancelled,
}

impl RunFlag {
    pub fn new() -> Self {
        let (sender, receiver) = bounded::<()>(0);
        Self {
            running: AtomicBool::new(true),
            wake: Mutex::new(Some(sender)),
            sleepers: receiver,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Clears the flag and interrupts every pending wait. Idempotent.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
        let mut wake = match self.wake.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        wake.take();
    }

    /// Sleeps for `duration` unless the flag is cleared first.
    pub fn wait(&self, duration: Duration) -> Wait {
        if !self.is_running() {
            return Wait::Cancelled;
        }
        match self.sleepers.recv_timeout(duration) {
            Err(RecvTimeoutError::Timeout) => Wait::Elapsed,
            Err(RecvTimeoutError::Disconnected) | Ok(()) => Wait::Cancelled,
        }
    }
}

impl Default for RunFlag {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Instant;

    #[test]
    fn wait_elapses_while_running() {
        let run = RunFlag::new();
        assert_eq!(run.wait(Duration::from_millis(20)), Wait::Elapsed);
        assert!(run.is_running());
    }

    #[test]
    fn stop_wakes_a_long_sleeper() {
        let run = Arc::new(RunFlag::new());
        let sleeper = {
            let run = run.clone();
            std::thread::spawn(move || {
                let start = Instant::now();
                let outcome = run.wait(Duration::from_secs(60 * 60));
                (outcome, start.elapsed())
            })
        };
        std::thread::sleep(Duration::from_millis(50));
        run.stop();
        let (outcome, slept) = sleeper.join().unwrap();
        assert_eq!(outcome, Wait::Cancelled);
        assert!(slept < Duration::from_secs(5));
    }

    #[test]
    fn stop_is_idempotent() {
        let run = RunFlag::new();
        run.stop();
        run.stop();
        assert!(!run.is_running());
        assert_eq!(run.wait(Duration::from_secs(10)), Wait::Cancelled);
    }
}
