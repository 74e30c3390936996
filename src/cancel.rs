//! Cooperative cancellation for blocking waits.
//!
//! A [`Cancellation`] is observed by the code doing the waiting; the matching [`Canceller`] is held
//! by whoever may want to give up. The signal is a channel whose only sender lives inside the
//! `Canceller`: cancelling (or simply dropping) it disconnects the channel, which every observer,
//! present or future, sees at once.

use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvError, Select, Sender, TryRecvError};
use thiserror::Error;

/// Why a wait was cut short.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum Interrupt {
    /// A [`Canceller`] fired.
    #[error("operation was cancelled")]
    Cancelled,
    /// The deadline attached to the [`Cancellation`] passed.
    #[error("deadline exceeded")]
    DeadlineExceeded,
}

/// Handle that fires the signal of its [`Cancellation`].
///
/// Dropping the handle cancels as well, so keep it alive for as long as the operation should run.
#[derive(Debug)]
pub struct Canceller {
    _signal: Sender<()>,
}

impl Canceller {
    /// Fires the signal. Observers stay cancelled from then on.
    pub fn cancel(self) {}
}

/// Observer side of a cancellation signal, optionally bounded by a deadline.
///
/// The default value never fires.
#[derive(Debug, Clone, Default)]
pub struct Cancellation {
    signals: Vec<Receiver<()>>,
    deadline: Option<Instant>,
}

impl Cancellation {
    /// A cancellation that never fires.
    pub fn never() -> Self {
        Self::default()
    }

    /// Creates a fresh signal.
    pub fn new() -> (Canceller, Self) {
        Self::never().child()
    }

    /// Derives a cancellation that fires when either `self` fires or the returned `Canceller` does.
    pub fn child(&self) -> (Canceller, Self) {
        let (sender, receiver) = crossbeam_channel::bounded(0);
        let mut signals = self.signals.clone();
        signals.push(receiver);
        let child = Self {
            signals,
            deadline: self.deadline,
        };
        (Canceller { _signal: sender }, child)
    }

    /// Bounds `self` by `deadline`. An earlier existing deadline is kept.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(current) => current.min(deadline),
            None => deadline,
        });
        self
    }

    /// Bounds `self` by a deadline `timeout` from now.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Returns the interrupt if the cancellation already fired.
    pub fn check(&self) -> Result<(), Interrupt> {
        let signalled = self
            .signals
            .iter()
            .any(|signal| matches!(signal.try_recv(), Err(TryRecvError::Disconnected)));
        if signalled {
            return Err(Interrupt::Cancelled);
        }

        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(Interrupt::DeadlineExceeded),
            _ => Ok(()),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.check().is_err()
    }

    /// Blocks until `receiver` yields or the cancellation fires, whichever comes first.
    ///
    /// A message that is already queued is returned even if the cancellation has fired too. The
    /// inner result is the outcome of the receive itself (`Err` once the channel is disconnected
    /// and drained).
    pub fn recv<T>(&self, receiver: &Receiver<T>) -> Result<Result<T, RecvError>, Interrupt> {
        if let Ok(message) = receiver.try_recv() {
            return Ok(Ok(message));
        }

        let timer = match self.deadline {
            Some(deadline) => crossbeam_channel::at(deadline),
            None => crossbeam_channel::never(),
        };

        let mut select = Select::new();
        let target = select.recv(receiver);
        let expiry = select.recv(&timer);
        for signal in &self.signals {
            select.recv(signal);
        }

        let operation = select.select();
        let index = operation.index();
        if index == target {
            Ok(operation.recv(receiver))
        } else if index == expiry {
            let _ = operation.recv(&timer);
            Err(Interrupt::DeadlineExceeded)
        } else {
            // Signals were registered after `target` and `expiry`.
            let _ = operation.recv(&self.signals[index - 2]);
            Err(Interrupt::Cancelled)
        }
    }

    /// Sleeps for `duration` unless the cancellation fires first.
    pub fn sleep(&self, duration: Duration) -> Result<(), Interrupt> {
        self.recv(&crossbeam_channel::after(duration)).map(drop)
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    #[test]
    fn never_fires() {
        let cx = Cancellation::never();
        assert_eq!(cx.check(), Ok(()));

        let (sender, receiver) = crossbeam_channel::bounded(1);
        sender.send(7).unwrap();
        assert_eq!(cx.recv(&receiver), Ok(Ok(7)));
    }

    #[test]
    fn cancel_and_drop_both_fire() {
        let (canceller, cx) = Cancellation::new();
        assert!(!cx.is_cancelled());
        canceller.cancel();
        assert_eq!(cx.check(), Err(Interrupt::Cancelled));

        let (canceller, cx) = Cancellation::new();
        drop(canceller);
        assert!(cx.is_cancelled());
    }

    #[test]
    fn cancel_wakes_blocked_receiver() {
        let (canceller, cx) = Cancellation::new();
        let (_sender, receiver) = crossbeam_channel::bounded::<()>(0);

        thread::scope(|s| {
            let waiter = s.spawn(|| cx.recv(&receiver));
            thread::sleep(Duration::from_millis(20));
            canceller.cancel();
            assert_eq!(waiter.join().unwrap(), Err(Interrupt::Cancelled));
        });
    }

    #[test]
    fn deadline_expires() {
        let cx = Cancellation::never().with_timeout(Duration::from_millis(20));
        let (_sender, receiver) = crossbeam_channel::bounded::<()>(0);

        let start = Instant::now();
        assert_eq!(cx.recv(&receiver), Err(Interrupt::DeadlineExceeded));
        assert!(start.elapsed() >= Duration::from_millis(20));
        assert_eq!(cx.check(), Err(Interrupt::DeadlineExceeded));
    }

    #[test]
    fn queued_message_beats_fired_cancellation() {
        let (canceller, cx) = Cancellation::new();
        let cx = cx.with_timeout(Duration::ZERO);
        canceller.cancel();

        let (sender, receiver) = crossbeam_channel::bounded(1);
        for _ in 0..50 {
            sender.send(7).unwrap();
            assert_eq!(cx.recv(&receiver), Ok(Ok(7)));
        }
        assert!(cx.recv(&receiver).is_err());
    }

    #[test]
    fn sleep_is_cut_short() {
        let (canceller, cx) = Cancellation::new();
        assert_eq!(cx.sleep(Duration::from_millis(1)), Ok(()));

        canceller.cancel();
        let start = Instant::now();
        assert_eq!(cx.sleep(Duration::from_secs(10)), Err(Interrupt::Cancelled));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn earlier_deadline_wins() {
        let now = Instant::now();
        let cx = Cancellation::never()
            .with_deadline(now + Duration::from_secs(1))
            .with_deadline(now + Duration::from_secs(10));
        assert_eq!(cx.deadline(), Some(now + Duration::from_secs(1)));
    }

    #[test]
    fn child_follows_parent_but_not_vice_versa() {
        let (parent_canceller, parent) = Cancellation::new();
        let (child_canceller, child) = parent.child();

        child_canceller.cancel();
        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());

        let (_child_canceller, child) = parent.child();
        parent_canceller.cancel();
        assert!(child.is_cancelled());
    }
}
