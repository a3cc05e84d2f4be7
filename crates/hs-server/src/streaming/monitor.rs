//! Throughput measurement and buffering between ffmpeg and the HTTP body.
//!
//! [`SpeedMonitor`] sits in front of the body channel. Chunks the channel
//! cannot take right away are queued in order and flushed as soon as it has
//! room; nothing is ever dropped. Once more than `high_water` bytes are
//! queued the writer waits for the client, which in turn stops reading from
//! ffmpeg's stdout.

use std::collections::VecDeque;
use std::io;
use std::time::{Duration, Instant};

use bytes::Bytes;
use serde::Serialize;
use tokio::sync::{mpsc, watch};

use super::session::PumpError;

/// Sliding-window byte counter.
#[derive(Debug)]
pub struct RateWindow {
    window: Duration,
    samples: VecDeque<(Instant, usize)>,
    total: usize,
}

impl RateWindow {
    pub fn new(window: Duration) -> Self {
        Self {
            window: window.max(Duration::from_millis(1)),
            samples: VecDeque::new(),
            total: 0,
        }
    }

    pub fn record_at(&mut self, now: Instant, bytes: usize) {
        self.samples.push_back((now, bytes));
        self.total += bytes;
        self.expire(now);
    }

    /// Average bytes per second over the window ending at `now`.
    pub fn rate_at(&mut self, now: Instant) -> f64 {
        self.expire(now);
        self.total as f64 / self.window.as_secs_f64()
    }

    fn expire(&mut self, now: Instant) {
        while let Some(&(at, bytes)) = self.samples.front() {
            if now.duration_since(at) <= self.window {
                break;
            }
            self.samples.pop_front();
            self.total -= bytes;
        }
    }
}

/// Current input and output rates in bytes per second.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Rates {
    pub input_bps: f64,
    pub output_bps: f64,
}

/// Buffering writer in front of the body channel.
#[derive(Debug)]
pub struct SpeedMonitor {
    tx: mpsc::Sender<io::Result<Bytes>>,
    pending: VecDeque<Bytes>,
    pending_bytes: usize,
    high_water: usize,
    input: RateWindow,
    output: RateWindow,
    rates: watch::Sender<Rates>,
    report_interval: Duration,
    last_report: Option<Instant>,
}

impl SpeedMonitor {
    pub fn new(
        tx: mpsc::Sender<io::Result<Bytes>>,
        high_water: usize,
        window: Duration,
        report_interval: Duration,
    ) -> (Self, watch::Receiver<Rates>) {
        let (rates, rates_rx) = watch::channel(Rates::default());
        let monitor = Self {
            tx,
            pending: VecDeque::new(),
            pending_bytes: 0,
            high_water,
            input: RateWindow::new(window),
            output: RateWindow::new(window),
            rates,
            report_interval,
            last_report: None,
        };
        (monitor, rates_rx)
    }

    /// Bytes queued but not yet accepted by the body channel.
    pub fn buffered(&self) -> usize {
        self.pending_bytes
    }

    /// Queue `chunk` and flush what the channel takes.
    ///
    /// Waits for the client while the queue is above the high-water mark.
    pub async fn write(&mut self, chunk: Bytes) -> Result<(), PumpError> {
        let now = Instant::now();
        self.input.record_at(now, chunk.len());
        self.pending_bytes += chunk.len();
        self.pending.push_back(chunk);

        self.flush_ready()?;
        while self.pending_bytes > self.high_water {
            self.send_one().await?;
            self.flush_ready()?;
        }

        self.report(Instant::now());
        Ok(())
    }

    /// Flush everything that is queued, waiting as long as needed.
    pub async fn finish(mut self) -> Result<(), PumpError> {
        while !self.pending.is_empty() {
            self.send_one().await?;
        }
        self.report(Instant::now());
        Ok(())
    }

    /// Send queued chunks while the channel has free slots.
    fn flush_ready(&mut self) -> Result<(), PumpError> {
        while let Some(chunk) = self.pending.pop_front() {
            let len = chunk.len();
            match self.tx.try_send(Ok(chunk)) {
                Ok(()) => self.sent(len),
                Err(mpsc::error::TrySendError::Full(item)) => {
                    if let Ok(chunk) = item {
                        self.pending.push_front(chunk);
                    }
                    break;
                }
                Err(mpsc::error::TrySendError::Closed(_)) => return Err(PumpError::OutputClosed),
            }
        }
        Ok(())
    }

    /// Wait for one free slot and send the oldest queued chunk.
    async fn send_one(&mut self) -> Result<(), PumpError> {
        let permit = self.tx.reserve().await.map_err(|_| PumpError::OutputClosed)?;
        if let Some(chunk) = self.pending.pop_front() {
            let len = chunk.len();
            permit.send(Ok(chunk));
            self.sent(len);
        }
        Ok(())
    }

    fn sent(&mut self, len: usize) {
        self.pending_bytes -= len;
        self.output.record_at(Instant::now(), len);
    }

    fn report(&mut self, now: Instant) {
        if self
            .last_report
            .is_some_and(|last| now.duration_since(last) < self.report_interval)
        {
            return;
        }
        self.last_report = Some(now);

        let rates = Rates {
            input_bps: self.input.rate_at(now),
            output_bps: self.output.rate_at(now),
        };
        self.rates.send_if_modified(|current| {
            if *current == rates {
                false
            } else {
                *current = rates;
                true
            }
        });
        tracing::trace!(
            input_bps = rates.input_bps,
            output_bps = rates.output_bps,
            buffered = self.pending_bytes,
            "Stream rates"
        );
    }
}
