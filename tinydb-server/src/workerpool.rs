//! # Worker Thread Pool
//!
//! Purpose: a fixed-size pool of OS threads servicing pub/sub fan-out
//! sends and webhook HTTP POSTs — never core command execution, which
//! stays on the event loop. Grounded in spec §4.13/§5's explicit call
//! for "a bounded FIFO guarded by a mutex and two condition variables",
//! which is why this is `std::thread` + `parking_lot::Condvar` rather
//! than more `tokio::spawn` tasks: the webhook POST is a blocking
//! synchronous socket call that must not tie up the async reactor.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use tracing::info;

use crate::pubsub::MessageSender;

pub enum Task {
    SendMessage { sender: MessageSender, message: String },
    Webhook { url: String, payload: String },
}

struct Queue {
    tasks: VecDeque<Task>,
    capacity: usize,
    shutting_down: bool,
}

pub struct WorkerPool {
    queue: Arc<Mutex<Queue>>,
    not_empty: Arc<Condvar>,
    not_full: Arc<Condvar>,
    running: Arc<AtomicBool>,
    workers: Vec<std::thread::JoinHandle<()>>,
}

impl WorkerPool {
    pub fn start(size: usize, capacity: usize) -> Self {
        let queue = Arc::new(Mutex::new(Queue {
            tasks: VecDeque::new(),
            capacity,
            shutting_down: false,
        }));
        let not_empty = Arc::new(Condvar::new());
        let not_full = Arc::new(Condvar::new());
        let running = Arc::new(AtomicBool::new(true));

        let mut workers = Vec::with_capacity(size);
        for worker_id in 0..size {
            let queue = queue.clone();
            let not_empty = not_empty.clone();
            let not_full = not_full.clone();
            let running = running.clone();
            workers.push(std::thread::spawn(move || {
                worker_loop(worker_id, queue, not_empty, not_full, running);
            }));
        }

        info!(size, "worker pool started");
        WorkerPool {
            queue,
            not_empty,
            not_full,
            running,
            workers,
        }
    }

    /// Blocks the caller until there is room if the queue is full.
    pub fn submit(&self, task: Task) {
        let mut queue = self.queue.lock();
        while queue.tasks.len() >= queue.capacity && !queue.shutting_down {
            self.not_full.wait(&mut queue);
        }
        if queue.shutting_down {
            return;
        }
        queue.tasks.push_back(task);
        self.not_empty.notify_one();
    }

    pub fn shutdown(mut self) {
        {
            let mut queue = self.queue.lock();
            queue.shutting_down = true;
        }
        self.running.store(false, Ordering::Release);
        self.not_empty.notify_all();
        self.not_full.notify_all();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
        info!("worker pool stopped");
    }
}

fn worker_loop(
    worker_id: usize,
    queue: Arc<Mutex<Queue>>,
    not_empty: Arc<Condvar>,
    not_full: Arc<Condvar>,
    running: Arc<AtomicBool>,
) {
    loop {
        let task = {
            let mut guard = queue.lock();
            loop {
                if let Some(task) = guard.tasks.pop_front() {
                    not_full.notify_one();
                    break Some(task);
                }
                if guard.shutting_down || !running.load(Ordering::Acquire) {
                    break None;
                }
                not_empty.wait(&mut guard);
            }
        };

        let Some(task) = task else { break };

        match task {
            Task::SendMessage { sender, message } => {
                let _ = sender.send(message);
            }
            Task::Webhook { url, payload } => {
                crate::webhook::send_http_post(&url, &payload);
            }
        }
    }
    info!(worker_id, "worker thread exiting");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submitted_message_reaches_receiver() {
        let pool = WorkerPool::start(2, 8);
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        pool.submit(Task::SendMessage {
            sender: tx,
            message: "hi".to_string(),
        });
        let received = std::thread::spawn(move || rx.blocking_recv()).join().unwrap();
        assert_eq!(received, Some("hi".to_string()));
        pool.shutdown();
    }
}
