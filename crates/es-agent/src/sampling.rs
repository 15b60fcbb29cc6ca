//! Sampling loop: poll the sensor, publish, sleep.
//!
//! A cycle never starts sampling on a dead link. If the broker session is
//! gone the loop switches to `Reconnecting` and blocks on
//! `ConnectionManager::connect()` until it is back.

use std::time::Duration;

use es_mqtt_channel::{ConnectionManager, Transport};
use es_sensor::Sensor;

use crate::publisher::{PublishOutcome, Publisher};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Sampling,
    Reconnecting,
}

/// Summary of one cycle, mostly for tests and debug logs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// The cycle had to re-establish the session first.
    pub reconnected: bool,
    /// The sensor produced a sample.
    pub sampled: bool,
    pub sent: usize,
    pub skipped: usize,
    pub failed: usize,
}

pub struct SamplingLoop<'a, T: Transport, S: Sensor + ?Sized> {
    manager: &'a ConnectionManager<T>,
    sensor: &'a S,
    publisher: Publisher<'a, T>,
    interval: Duration,
    state: LoopState,
}

impl<'a, T: Transport, S: Sensor + ?Sized> SamplingLoop<'a, T, S> {
    pub fn new(
        manager: &'a ConnectionManager<T>,
        sensor: &'a S,
        topic_base: impl Into<String>,
        interval: Duration,
    ) -> Self {
        Self {
            manager,
            sensor,
            publisher: Publisher::new(manager, topic_base),
            interval,
            state: LoopState::Sampling,
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    /// Run one cycle without the trailing sleep.
    pub async fn cycle(&mut self) -> CycleReport {
        let mut report = CycleReport::default();

        if !self.manager.is_connected() {
            tracing::warn!("MQTT connection lost, reconnecting before next sample");
            self.state = LoopState::Reconnecting;
            self.manager.connect().await;
            self.state = LoopState::Sampling;
            report.reconnected = true;
        }

        let Some(sample) = self.sensor.poll().await else {
            tracing::debug!("no sensor sample this cycle");
            return report;
        };
        report.sampled = true;

        for reading in sample.readings() {
            match self.publisher.publish(&reading).await {
                PublishOutcome::Sent => report.sent += 1,
                PublishOutcome::Skipped => report.skipped += 1,
                PublishOutcome::Failed => report.failed += 1,
            }
        }

        tracing::debug!(
            sent = report.sent,
            skipped = report.skipped,
            failed = report.failed,
            "sampling cycle complete"
        );
        report
    }

    /// Cycle forever, sleeping `interval` between cycles.
    ///
    /// Never returns; stop it by dropping the future.
    pub async fn run(&mut self) {
        tracing::info!(
            topic_base = %self.publisher.topic_base(),
            interval_secs = self.interval.as_secs(),
            "sampling loop started"
        );
        loop {
            self.cycle().await;
            tokio::time::sleep(self.interval).await;
        }
    }
}
