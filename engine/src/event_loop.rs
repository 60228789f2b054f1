//! Non-real-time main loop for timers and callbacks that must leave the
//! render thread, driven by a current-thread tokio runtime on its own thread.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread::{self, ThreadId};
use std::time::Duration;
use tokio::sync::mpsc::{UnboundedSender, unbounded_channel};
use tokio::task::JoinHandle;
use tracing::{debug, error};

pub const PRIORITY_NOW: i16 = 900;
pub const PRIORITY_HIGH: i16 = 700;
pub const PRIORITY_NEXT: i16 = 600;
pub const PRIORITY_NORMAL: i16 = 500;
pub const PRIORITY_UPDATE: i16 = 400;
pub const PRIORITY_IDLE: i16 = 200;
pub const PRIORITY_LOW: i16 = 100;

pub type LoopTimer = Box<dyn FnMut() -> bool + Send + 'static>;
pub type LoopCallback = Box<dyn FnOnce() + Send + 'static>;

enum LoopCommand {
    Exec(LoopCallback),
    Timer {
        id: u32,
        delay: Duration,
        period: Option<Duration>,
        callback: LoopTimer,
    },
    Remove(u32),
    Quit,
}

pub struct EventLoop {
    name: String,
    tx: UnboundedSender<LoopCommand>,
    next_id: AtomicU32,
    thread_id: ThreadId,
    thread: Mutex<Option<thread::JoinHandle<()>>>,
}

impl EventLoop {
    pub fn spawn(name: &str) -> Result<Self, String> {
        let (tx, mut rx) = unbounded_channel::<LoopCommand>();
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<Result<ThreadId, String>>();
        let loop_name = name.to_string();
        let thread = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_time()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e.to_string()));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(thread::current().id()));
                runtime.block_on(async move {
                    let mut timers: HashMap<u32, JoinHandle<()>> = HashMap::new();
                    while let Some(command) = rx.recv().await {
                        timers.retain(|_, handle| !handle.is_finished());
                        match command {
                            LoopCommand::Exec(callback) => callback(),
                            LoopCommand::Timer {
                                id,
                                delay,
                                period,
                                mut callback,
                            } => {
                                let handle = tokio::spawn(async move {
                                    tokio::time::sleep(delay).await;
                                    loop {
                                        if !callback() {
                                            break;
                                        }
                                        let Some(period) = period else {
                                            break;
                                        };
                                        tokio::time::sleep(period).await;
                                    }
                                });
                                timers.insert(id, handle);
                            }
                            LoopCommand::Remove(id) => {
                                if let Some(handle) = timers.remove(&id) {
                                    handle.abort();
                                }
                            }
                            LoopCommand::Quit => break,
                        }
                    }
                    for (_, handle) in timers.drain() {
                        handle.abort();
                    }
                    debug!(target: "eventloop", "{loop_name}: quit");
                });
            })
            .map_err(|e| format!("Failed to spawn event loop thread: {e}"))?;
        let thread_id = ready_rx
            .recv()
            .map_err(|e| format!("Event loop thread vanished: {e}"))??;
        Ok(Self {
            name: name.to_string(),
            tx,
            next_id: AtomicU32::new(1),
            thread_id,
            thread: Mutex::new(Some(thread)),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run `callback` once on the loop thread. Returns false after the loop quit.
    pub fn exec_callback(&self, callback: impl FnOnce() + Send + 'static) -> bool {
        self.tx.send(LoopCommand::Exec(Box::new(callback))).is_ok()
    }

    /// Run `callback` after `delay_ms` and then every `period_ms` for as long as
    /// it returns true. A `period_ms` of 0 runs it once.
    ///
    /// Deliveries due at the same time run in submission order; `priority` is
    /// recorded for diagnostics only.
    pub fn exec_timer(
        &self,
        callback: impl FnMut() -> bool + Send + 'static,
        delay_ms: u32,
        period_ms: u32,
        priority: i16,
    ) -> u32 {
        let mut id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if id == 0 {
            id = self.next_id.fetch_add(1, Ordering::Relaxed);
        }
        let period = (period_ms > 0).then(|| Duration::from_millis(period_ms as u64));
        let command = LoopCommand::Timer {
            id,
            delay: Duration::from_millis(delay_ms as u64),
            period,
            callback: Box::new(callback),
        };
        if self.tx.send(command).is_err() {
            error!(target: "eventloop", "{}: timer {id} submitted after quit", self.name);
        } else {
            debug!(target: "eventloop", "{}: timer {id}: delay={delay_ms}ms period={period_ms}ms priority={priority}", self.name);
        }
        id
    }

    pub fn remove(&self, id: u32) -> bool {
        id != 0 && self.tx.send(LoopCommand::Remove(id)).is_ok()
    }

    pub fn is_loop_thread(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    pub fn quit(&self) {
        let _ = self.tx.send(LoopCommand::Quit);
        if self.is_loop_thread() {
            return;
        }
        let handle = self.thread.lock().ok().and_then(|mut guard| guard.take());
        if let Some(handle) = handle
            && handle.join().is_err()
        {
            error!(target: "eventloop", "{}: loop thread panicked", self.name);
        }
    }
}

impl Drop for EventLoop {
    fn drop(&mut self) {
        self.quit();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;

    #[test]
    fn test_exec_callback_runs_on_loop_thread() {
        let event_loop = Arc::new(EventLoop::spawn("test-loop").unwrap());
        let (tx, rx) = mpsc::channel();
        let inner = event_loop.clone();
        assert!(event_loop.exec_callback(move || {
            let _ = tx.send(inner.is_loop_thread());
        }));
        assert!(rx.recv_timeout(Duration::from_secs(2)).unwrap());
        assert!(!event_loop.is_loop_thread());
    }

    #[test]
    fn test_timer_repeats_until_false() {
        let event_loop = EventLoop::spawn("test-timer").unwrap();
        let count = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = mpsc::channel();
        let counter = count.clone();
        let id = event_loop.exec_timer(
            move || {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                if n == 3 {
                    let _ = tx.send(());
                    return false;
                }
                true
            },
            0,
            5,
            PRIORITY_UPDATE,
        );
        assert_ne!(id, 0);
        rx.recv_timeout(Duration::from_secs(2)).unwrap();
        thread::sleep(Duration::from_millis(30));
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_removed_timer_stops() {
        let event_loop = EventLoop::spawn("test-remove").unwrap();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let id = event_loop.exec_timer(
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
                true
            },
            1000,
            1000,
            PRIORITY_NORMAL,
        );
        assert!(event_loop.remove(id));
        let (tx, rx) = mpsc::channel();
        event_loop.exec_callback(move || {
            let _ = tx.send(());
        });
        rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_exec_after_quit_fails() {
        let event_loop = EventLoop::spawn("test-quit").unwrap();
        event_loop.quit();
        assert!(!event_loop.exec_callback(|| {}));
    }
}
