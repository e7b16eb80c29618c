// Copyright 2022 Matthew Ingwersen.
//
// Licensed under the Apache License, Version 2.0 (the "License"); you
// may not use this file except in compliance with the License. You may
// obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or
// implied. See the License for the specific language governing
// permissions and limitations under the License.

//! Supervision of the bus listener threads.
//!
//! Each listener turns one kind of bus signal into event-loop inputs.
//! A listener whose message stream ends (for instance because the bus
//! dropped a match rule) is restarted, at most once per
//! [`RESPAWN_DELAY`], until the group is shut down.

use std::io;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use log::{error, info, warn};

/// The minimum time between two starts of the same listener.
pub const RESPAWN_DELAY: Duration = Duration::from_secs(1);

/// A group of supervised listener threads.
pub struct ThreadGroup {
    records: Mutex<GroupRecords>,

    /// Notified when shutdown starts and when the last thread ends.
    shutdown_wakeup: Condvar,
}

#[derive(Default)]
struct GroupRecords {
    thread_count: usize,
    shutting_down: bool,
}

impl ThreadGroup {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            records: Mutex::new(GroupRecords::default()),
            shutdown_wakeup: Condvar::new(),
        })
    }

    /// Starts a listener thread running `task`. When `task` returns or
    /// panics while the group is not shutting down, it is started again.
    pub fn start_listener<F>(self: &Arc<Self>, name: &str, task: F) -> Result<(), Error>
    where
        F: Fn() + Send + Sync + 'static,
    {
        let mut records = self.records.lock().unwrap();
        if records.shutting_down {
            return Err(Error::ShuttingDown);
        }
        start(self.clone(), &mut records, name.to_owned(), Arc::new(task))?;
        Ok(())
    }

    /// Marks the group as shutting down. Listeners are not interrupted;
    /// they are just not restarted once they end.
    pub fn shut_down(&self) {
        self.records.lock().unwrap().shutting_down = true;
        self.shutdown_wakeup.notify_all();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.records.lock().unwrap().shutting_down
    }

    /// Waits until the group is shutting down and every thread has
    /// ended, or until `timeout` passes. Returns whether all threads
    /// ended.
    pub fn await_shutdown(&self, timeout: Duration) -> bool {
        let records = self.records.lock().unwrap();
        let (records, _) = self
            .shutdown_wakeup
            .wait_timeout_while(records, timeout, |r| !r.shutting_down || r.thread_count > 0)
            .unwrap();
        records.thread_count == 0
    }
}

struct ListenerHandle<F>
where
    F: Fn() + Send + Sync + 'static,
{
    group: Arc<ThreadGroup>,
    parent: ThreadId,
    task: Arc<F>,
    last_start: Instant,
}

fn start<F>(
    group: Arc<ThreadGroup>,
    records: &mut MutexGuard<GroupRecords>,
    name: String,
    task: Arc<F>,
) -> io::Result<()>
where
    F: Fn() + Send + Sync + 'static,
{
    records.thread_count += 1;
    let handle = ListenerHandle {
        group,
        parent: thread::current().id(),
        task,
        last_start: Instant::now(),
    };
    let result = thread::Builder::new().name(name).spawn(move || {
        (handle.task)();
        drop(handle);
    });
    if result.is_err() {
        records.thread_count -= 1;
    }
    result.and(Ok(()))
}

impl<F> Drop for ListenerHandle<F>
where
    F: Fn() + Send + Sync + 'static,
{
    fn drop(&mut self) {
        let current_thread = thread::current();
        let name = current_thread.name().unwrap_or("anonymous");

        // Dropped in the parent when the thread never started; start()
        // has already undone the count.
        if current_thread.id() == self.parent {
            return;
        }

        if thread::panicking() {
            error!("Listener thread {} panicked.", name);
        }

        let mut records = self.group.records.lock().unwrap();
        if !records.shutting_down {
            warn!("Listener thread {} ended, restarting it.", name);
            let since_last_start = self.last_start.elapsed();
            if since_last_start < RESPAWN_DELAY {
                let wait_for = RESPAWN_DELAY - since_last_start;
                info!(
                    "Restart of listener {} delayed by {} ms.",
                    name,
                    wait_for.as_millis()
                );
                records = self
                    .group
                    .shutdown_wakeup
                    .wait_timeout(records, wait_for)
                    .unwrap()
                    .0;
            }
            if !records.shutting_down {
                let result = start(
                    self.group.clone(),
                    &mut records,
                    name.to_owned(),
                    self.task.clone(),
                );
                if let Err(e) = result {
                    error!("Failed to restart listener {}: {}.", name, e);
                }
            }
        }

        records.thread_count -= 1;
        if records.shutting_down && records.thread_count == 0 {
            self.group.shutdown_wakeup.notify_all();
        }
    }
}

/// An error starting a listener.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to spawn a thread")]
    Io(#[from] io::Error),

    #[error("the listener group is shutting down")]
    ShuttingDown,
}
