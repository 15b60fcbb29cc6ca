//! Mock sensor: serves scripted samples in order.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use es_protocol::SensorSample;

use crate::source::Sensor;

/// Mock sensor that returns queued results, then a fallback forever.
pub struct MockSensor {
    queue: Mutex<VecDeque<Option<SensorSample>>>,
    fallback: Option<SensorSample>,
    polls: AtomicUsize,
}

impl MockSensor {
    /// Always return `sample`.
    pub fn constant(sample: SensorSample) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            fallback: Some(sample),
            polls: AtomicUsize::new(0),
        }
    }

    /// Never has a fresh sample.
    pub fn empty() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            fallback: None,
            polls: AtomicUsize::new(0),
        }
    }

    /// Queue results ahead of the fallback (`None` simulates a missed read).
    pub fn push(&self, result: Option<SensorSample>) {
        self.queue.lock().unwrap().push_back(result);
    }

    /// Number of `poll` calls so far.
    pub fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Sensor for MockSensor {
    async fn poll(&self) -> Option<SensorSample> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        self.queue
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(self.fallback)
    }
}
