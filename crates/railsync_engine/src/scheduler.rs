//! Periodic background tasks.
//!
//! Each task runs on its own named thread: it waits the initial delay, then
//! runs and sleeps for the interval until the scheduler is shut down. A stop
//! signal interrupts the sleep, so shutdown never waits out an interval; it
//! does wait for a run that is already executing.

use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

struct ScheduledTask {
    name: String,
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

/// Owns the threads of scheduled tasks. Dropping it stops them.
#[derive(Default)]
pub struct Scheduler {
    tasks: Vec<ScheduledTask>,
}

impl Scheduler {
    /// Creates a scheduler without tasks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a named task.
    pub fn schedule(
        &mut self,
        name: &str,
        initial_delay: Duration,
        interval: Duration,
        mut task: impl FnMut() + Send + 'static,
    ) -> std::io::Result<()> {
        let (stop, stopped) = mpsc::channel::<()>();
        let task_name = name.to_string();
        let handle = thread::Builder::new()
            .name(task_name.clone())
            .spawn(move || {
                let mut wait = initial_delay;
                loop {
                    match stopped.recv_timeout(wait) {
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                        Err(RecvTimeoutError::Timeout) => {}
                    }
                    debug!(task = %task_name, "scheduled task run");
                    task();
                    wait = interval;
                }
            })?;
        self.tasks.push(ScheduledTask {
            name: name.to_string(),
            stop,
            handle,
        });
        Ok(())
    }

    /// Names of the running tasks, in scheduling order.
    pub fn task_names(&self) -> Vec<&str> {
        self.tasks.iter().map(|t| t.name.as_str()).collect()
    }

    /// Stops all tasks and waits for their threads.
    pub fn shutdown(mut self) {
        self.stop_all();
    }

    fn stop_all(&mut self) {
        for task in &self.tasks {
            // a send error means the thread already exited
            let _ = task.stop.send(());
        }
        for task in self.tasks.drain(..) {
            if task.handle.join().is_err() {
                warn!(task = %task.name, "scheduled task panicked");
            }
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop_all();
    }
}
