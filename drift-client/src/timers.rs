//! Named, cancelable deadlines and periodic ticks.
//!
//! Timers deliver their payload into the client's dispatch channel, so
//! firings are serialized with every other input. A one-shot fires at
//! most once; re-using a name replaces the previous deadline; cancel is
//! idempotent.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

use crate::util::relock;

pub(crate) struct Timers<I: Send + 'static> {
    tx: UnboundedSender<I>,
    tasks: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl<I: Send + 'static> Timers<I> {
    pub(crate) fn new(tx: UnboundedSender<I>) -> Self {
        Self {
            tx,
            tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Arm a one-shot deadline. An armed timer with the same name is
    /// replaced.
    pub(crate) fn schedule(&self, name: &str, delay: Duration, input: I) {
        let tx = self.tx.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(input);
        });
        self.store(name, task);
    }

    /// Arm a periodic tick. The first firing happens one period from now.
    pub(crate) fn set_interval(
        &self,
        name: &str,
        period: Duration,
        make_input: impl Fn() -> I + Send + 'static,
    ) {
        let tx = self.tx.clone();
        let task = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + period;
            let mut ticks = tokio::time::interval_at(start, period);
            loop {
                ticks.tick().await;
                if tx.send(make_input()).is_err() {
                    break;
                }
            }
        });
        self.store(name, task);
    }

    /// Disarm a timer. Unknown or already-fired names are fine.
    pub(crate) fn cancel(&self, name: &str) {
        if let Some(task) = relock(&self.tasks).remove(name) {
            task.abort();
        }
    }

    /// Disarm everything.
    pub(crate) fn cancel_all(&self) {
        for (_, task) in relock(&self.tasks).drain() {
            task.abort();
        }
    }

    fn store(&self, name: &str, task: JoinHandle<()>) {
        if let Some(previous) = relock(&self.tasks).insert(name.to_string(), task) {
            previous.abort();
        }
    }
}

impl<I: Send + 'static> Drop for Timers<I> {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
