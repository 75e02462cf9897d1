//! Poll loop: read new outgoing messages, answer the triggering ones.
//!
//! Each tick runs one full cycle (fetch → ingest → complete → deliver) before
//! the next can start. Failures are contained at two levels:
//! - a failed fetch skips the cycle; the next tick retries from the same watermark
//! - a failed completion or delivery drops that one event; the rest of the cycle continues
//!
//! Panics are caught the same way: in the reader they skip the cycle, in a
//! collaborator they drop the event, anywhere else they are logged at the
//! loop and the next tick runs as usual.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::FutureExt;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::channels::ReplySender;
use crate::error::Error;
use crate::format::{ItalicMap, format_reply};
use crate::llm::Responder;
use crate::pipeline::ingest::IngestState;
use crate::pipeline::types::{DecodedMessage, TriggerEvent};
use crate::store::MessageSource;

/// Default time between polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Default pause between getting a reply and sending it.
pub const DEFAULT_REPLY_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct PollerConfig {
    pub poll_interval: Duration,
    /// Gives Messages time to settle the outgoing trigger before we reply.
    pub reply_delay: Duration,
    /// Render replies in Unicode italics.
    pub italic: bool,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            reply_delay: DEFAULT_REPLY_DELAY,
            italic: true,
        }
    }
}

/// What one cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Rows with text returned by the store.
    pub fetched: usize,
    /// Trigger events emitted by the ingest state.
    pub triggered: usize,
    pub delivered: usize,
    pub failed: usize,
    /// The store could not be read this cycle.
    pub fetch_failed: bool,
}

pub struct Poller {
    config: PollerConfig,
    source: Arc<dyn MessageSource>,
    responder: Arc<dyn Responder>,
    sender: Arc<dyn ReplySender>,
    state: IngestState,
    italic: Option<ItalicMap>,
}

impl Poller {
    pub fn new(
        config: PollerConfig,
        source: Arc<dyn MessageSource>,
        responder: Arc<dyn Responder>,
        sender: Arc<dyn ReplySender>,
        state: IngestState,
    ) -> Self {
        let italic = config.italic.then(ItalicMap::new);
        Self {
            config,
            source,
            responder,
            sender,
            state,
            italic,
        }
    }

    pub fn state(&self) -> &IngestState {
        &self.state
    }

    pub fn poll_interval(&self) -> Duration {
        self.config.poll_interval
    }

    /// Run one cycle.
    pub async fn poll_once(&mut self) -> CycleReport {
        let mut report = CycleReport::default();

        let rows = match self.fetch().await {
            Ok(rows) => rows,
            Err(Error::Store(e)) if e.is_retryable() => {
                warn!(error = %e, "Messages DB busy, retrying next poll");
                report.fetch_failed = true;
                return report;
            }
            Err(e) => {
                error!(error = %e, "Failed to read Messages DB");
                report.fetch_failed = true;
                return report;
            }
        };
        report.fetched = rows.len();

        let events = self.state.process(&rows);
        report.triggered = events.len();
        if !rows.is_empty() {
            debug!(
                rows = rows.len(),
                triggered = events.len(),
                watermark = self.state.watermark(),
                "Ingested rows"
            );
        }

        for event in &events {
            match AssertUnwindSafe(self.handle(event)).catch_unwind().await {
                Ok(Ok(())) => {
                    info!(id = event.id, "Delivered");
                    report.delivered += 1;
                }
                Ok(Err(e)) => {
                    warn!(
                        id = event.id,
                        chat = %event.chat_identifier,
                        channel = self.sender.name(),
                        error = %e,
                        "Dropping prompt"
                    );
                    report.failed += 1;
                }
                Err(panic) => {
                    error!(
                        id = event.id,
                        chat = %event.chat_identifier,
                        panic = panic_message(panic.as_ref()),
                        "Prompt handling panicked, dropping prompt"
                    );
                    report.failed += 1;
                }
            }
        }

        report
    }

    /// Read rows above the watermark on the blocking pool.
    async fn fetch(&self) -> Result<Vec<DecodedMessage>, Error> {
        let source = Arc::clone(&self.source);
        let after = self.state.watermark();
        match tokio::task::spawn_blocking(move || source.fetch_since(after)).await {
            Ok(result) => Ok(result?),
            Err(join_err) => {
                // A panic inside the reader is unexpected but must not end the loop.
                error!(error = %join_err, "Messages DB read task panicked");
                Err(Error::Store(crate::error::StoreError::Query(join_err.to_string())))
            }
        }
    }

    async fn handle(&self, event: &TriggerEvent) -> Result<(), Error> {
        info!(id = event.id, chat = %event.chat_identifier, prompt = %event.prompt, "Triggered");

        let raw = self.responder.complete(&event.prompt).await?;
        let reply = format_reply(&raw, self.italic.as_ref());
        info!(
            id = event.id,
            reply = %reply.chars().take(100).collect::<String>(),
            "Reply ready"
        );

        if !self.config.reply_delay.is_zero() {
            tokio::time::sleep(self.config.reply_delay).await;
        }

        self.sender.deliver(&event.chat_guid, &reply).await?;
        Ok(())
    }
}

/// Best-effort text of a panic payload.
fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

/// Spawn the poll loop.
///
/// Returns a `JoinHandle` and a shutdown flag. Set the flag to stop polling;
/// the loop exits at its next tick, after any in-flight cycle finishes. The
/// task only ends when the flag is set.
pub fn spawn_poller(mut poller: Poller) -> (JoinHandle<()>, Arc<AtomicBool>) {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);

    let handle = tokio::spawn(async move {
        info!(
            interval_secs = poller.poll_interval().as_secs_f64(),
            watermark = poller.state().watermark(),
            trigger = %poller.state().trigger_prefix(),
            "Poller started"
        );

        let mut tick = tokio::time::interval(poller.poll_interval());
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tick.tick().await;

            if shutdown.load(Ordering::Relaxed) {
                info!("Poller shutting down");
                return;
            }

            if let Err(panic) = AssertUnwindSafe(poller.poll_once()).catch_unwind().await {
                error!(panic = panic_message(panic.as_ref()), "Poll cycle panicked");
            }
        }
    });

    (handle, shutdown_flag)
}

/// How the poll loop ended after a stop request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The in-flight cycle finished and the loop exited.
    Stopped,
    /// The loop did not exit within the grace period and was aborted.
    Aborted,
}

/// Ask the loop to stop and wait up to `grace` for it, aborting it after that.
///
/// The wait also ends early, with an abort, when `force` resolves (a second
/// Ctrl-C in the binary).
pub async fn stop_poller<F>(
    mut handle: JoinHandle<()>,
    shutdown: &AtomicBool,
    grace: Duration,
    force: F,
) -> StopOutcome
where
    F: std::future::Future<Output = ()>,
{
    shutdown.store(true, Ordering::Relaxed);
    tokio::select! {
        result = &mut handle => {
            if let Err(e) = result {
                warn!(error = %e, "Poller did not stop cleanly");
            }
            StopOutcome::Stopped
        }
        _ = tokio::time::sleep(grace) => {
            warn!(grace_secs = grace.as_secs_f64(), "Poller still busy, aborting");
            handle.abort();
            StopOutcome::Aborted
        }
        _ = force => {
            warn!("Stop forced, aborting poller");
            handle.abort();
            StopOutcome::Aborted
        }
    }
}
