//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::Instant;
use tokio::{task, time};
use tracing::{Instrument, error};

/// A handle to a task created by [`Task::spawn`].
///
/// Dropping this handle cancels the task, unless [`Task::detach`] was called.
#[derive(Debug)]
pub struct Task<T> {
    join_handle: task::JoinHandle<T>,
    detached: bool,
}

/// A handle to a one-shot timer created by [`TimeoutTask::new`].
///
/// Dropping this handle cancels the timer.
#[derive(Debug)]
pub struct TimeoutTask {
    #[cfg(not(feature = "testing"))]
    inner: TimerHandle,
}

/// A handle to a periodic timer created by [`IntervalTask::new`].
///
/// Dropping this handle cancels the timer.
#[derive(Debug)]
pub struct IntervalTask {
    #[cfg(not(feature = "testing"))]
    inner: TimerHandle,
}

#[derive(Debug)]
struct TimerHandle {
    _task: Task<()>,
    control: UnboundedSender<Option<Duration>>,
    next: Arc<Mutex<Instant>>,
}

// ===== impl Task =====

impl<T> Task<T> {
    /// Spawns a new asynchronous task, returning a handle for it.
    pub fn spawn<Fut>(future: Fut) -> Task<T>
    where
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        Task {
            join_handle: task::spawn(future),
            detached: false,
        }
    }

    /// Detach the task, meaning it will no longer be canceled if its handle is
    /// dropped.
    pub fn detach(&mut self) {
        self.detached = true;
    }
}

impl<T> Future for Task<T> {
    type Output = Result<T, task::JoinError>;

    fn poll(
        mut self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Self::Output> {
        Pin::new(&mut self.join_handle).poll(cx)
    }
}

impl<T> Drop for Task<T> {
    fn drop(&mut self) {
        if !self.detached {
            self.join_handle.abort();
        }
    }
}

// ===== impl TimeoutTask =====

impl TimeoutTask {
    /// Spawns a task that calls `cb` once `timeout` expires.
    #[cfg(not(feature = "testing"))]
    pub fn new<F, Fut>(timeout: Duration, cb: F) -> TimeoutTask
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let (control_tx, mut control_rx) =
            mpsc::unbounded_channel::<Option<Duration>>();
        let next = Arc::new(Mutex::new(Instant::now() + timeout));
        let next_child = next.clone();

        let task = Task::spawn(
            async move {
                let sleep = time::sleep(timeout);
                tokio::pin!(sleep);

                loop {
                    tokio::select! {
                        _ = &mut sleep => {
                            (cb)().await;
                            break;
                        }
                        message = control_rx.recv() => {
                            let Some(new_timeout) = message else {
                                break;
                            };
                            let deadline = Instant::now()
                                + new_timeout.unwrap_or(timeout);
                            sleep.as_mut().reset(deadline);
                            *next_child.lock().unwrap() = deadline;
                        }
                    }
                }
            }
            .in_current_span(),
        );

        TimeoutTask {
            inner: TimerHandle {
                _task: task,
                control: control_tx,
                next,
            },
        }
    }

    /// Spawns nothing: timers are inert in test builds.
    #[cfg(feature = "testing")]
    pub fn new<F, Fut>(_timeout: Duration, _cb: F) -> TimeoutTask
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        TimeoutTask {}
    }

    /// Restarts the timer, whether it has already expired or not.
    ///
    /// If a new timeout value isn't specified, the last value is reused.
    pub fn reset(&mut self, timeout: Option<Duration>) {
        #[cfg(not(feature = "testing"))]
        self.inner.reset(timeout);
    }

    /// Returns the remaining time before the timer expires.
    pub fn remaining(&self) -> Duration {
        #[cfg(not(feature = "testing"))]
        {
            self.inner.remaining()
        }
        #[cfg(feature = "testing")]
        {
            Duration::ZERO
        }
    }
}

// ===== impl IntervalTask =====

impl IntervalTask {
    /// Spawns a task that calls `cb` every time `interval` elapses.
    #[cfg(not(feature = "testing"))]
    pub fn new<F, Fut>(
        interval: Duration,
        tick_on_start: bool,
        mut cb: F,
    ) -> IntervalTask
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let (control_tx, mut control_rx) =
            mpsc::unbounded_channel::<Option<Duration>>();
        let next = Arc::new(Mutex::new(Instant::now() + interval));
        let next_child = next.clone();

        let task = Task::spawn(
            async move {
                let mut period = interval;
                let mut ticker = if tick_on_start {
                    time::interval(period)
                } else {
                    time::interval_at(Instant::now() + period, period)
                };

                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            (cb)().await;
                            *next_child.lock().unwrap() =
                                Instant::now() + period;
                        }
                        message = control_rx.recv() => {
                            let Some(new_interval) = message else {
                                break;
                            };
                            period = new_interval.unwrap_or(period);
                            ticker = time::interval_at(
                                Instant::now() + period,
                                period,
                            );
                            *next_child.lock().unwrap() =
                                Instant::now() + period;
                        }
                    }
                }
            }
            .in_current_span(),
        );

        IntervalTask {
            inner: TimerHandle {
                _task: task,
                control: control_tx,
                next,
            },
        }
    }

    /// Spawns nothing: timers are inert in test builds.
    #[cfg(feature = "testing")]
    pub fn new<F, Fut>(
        _interval: Duration,
        _tick_on_start: bool,
        _cb: F,
    ) -> IntervalTask
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        IntervalTask {}
    }

    /// Restarts the interval.
    ///
    /// If a new interval value isn't specified, the last value is reused.
    pub fn reset(&mut self, interval: Option<Duration>) {
        #[cfg(not(feature = "testing"))]
        self.inner.reset(interval);
    }

    /// Returns the remaining time before the next tick.
    pub fn remaining(&self) -> Duration {
        #[cfg(not(feature = "testing"))]
        {
            self.inner.remaining()
        }
        #[cfg(feature = "testing")]
        {
            Duration::ZERO
        }
    }
}

// ===== impl TimerHandle =====

impl TimerHandle {
    fn reset(&self, value: Option<Duration>) {
        if self.control.send(value).is_err() {
            error!("failed to reset timer");
        }
    }

    fn remaining(&self) -> Duration {
        let next = self.next.lock().unwrap();
        next.saturating_duration_since(Instant::now())
    }
}
