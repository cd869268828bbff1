//! Per-connection streaming supervisor.
//!
//! Owns the two loops that share one [`SessionHandle`]:
//!
//! - the **frame loop** polls the engine on the blocking pool, then
//!   drains at most one frame through the [`FrameSequencer`];
//! - the **audio loop** runs an [`AudioMultiplexer`].
//!
//! The first fatal condition in either loop is reported through
//! [`StreamingSupervisor::wait_failure`]. Teardown always runs in the
//! same order: cancel both loops, await them, notify the receiver (on
//! failure), close the transport, then release the session.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::control::ServerMessage;
use crate::error::{SessionError, WireError};
use crate::pipeline::audio::{AudioConfig, AudioMultiplexer};
use crate::pipeline::flow::{FlowController, FlowSignal};
use crate::pipeline::sequencer::FrameSequencer;
use crate::session::SessionHandle;
use crate::transport::{TransportSink, truncate_reason};

/// Reason used when the engine fails without saying why.
pub const DEFAULT_DISCONNECT_REASON: &str = "Connection closed";

/// Pause after a non-fatal poll error before polling again.
const POLL_RETRY_DELAY: Duration = Duration::from_millis(10);

// ── StreamConfig ─────────────────────────────────────────────────

/// Configuration for one streaming connection.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Upper bound on a single blocking engine poll.
    pub poll_timeout: Duration,
    /// Pass receiver frame acknowledgments on to the session.
    pub forward_frame_acks: bool,
    /// Transport limit on close-reason length, in bytes.
    pub close_reason_limit: usize,
    /// `None` disables the audio loop.
    pub audio: Option<AudioConfig>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_millis(16),
            forward_frame_acks: false,
            close_reason_limit: 120,
            audio: Some(AudioConfig::default()),
        }
    }
}

// ── StreamingSupervisor ──────────────────────────────────────────

pub struct StreamingSupervisor {
    session: Arc<dyn SessionHandle>,
    sink: Arc<dyn TransportSink>,
    config: StreamConfig,
    cancel: CancellationToken,
    frame_task: Option<JoinHandle<()>>,
    audio_task: Option<JoinHandle<()>>,
    failures: mpsc::Receiver<String>,
    flow: FlowController,
}

impl StreamingSupervisor {
    /// Spawn the frame loop (and the audio loop, if configured).
    pub fn start(
        session: Arc<dyn SessionHandle>,
        sink: Arc<dyn TransportSink>,
        config: StreamConfig,
    ) -> Self {
        let cancel = CancellationToken::new();
        let (failure_tx, failures) = mpsc::channel(2);

        let frame_task = tokio::spawn(frame_loop(
            session.clone(),
            sink.clone(),
            config.poll_timeout,
            cancel.child_token(),
            failure_tx.clone(),
        ));

        let audio_task = config.audio.clone().map(|audio| {
            tokio::spawn(audio_loop(
                session.clone(),
                sink.clone(),
                audio,
                cancel.child_token(),
                failure_tx,
            ))
        });

        info!(
            audio = audio_task.is_some(),
            forward_frame_acks = config.forward_frame_acks,
            "streaming started"
        );

        Self {
            flow: FlowController::new(config.forward_frame_acks),
            session,
            sink,
            config,
            cancel,
            frame_task: Some(frame_task),
            audio_task,
            failures,
        }
    }

    /// Hand an inbound binary message to the flow controller.
    pub fn handle_inbound(&mut self, data: &[u8]) -> FlowSignal {
        self.flow.handle_inbound(data, &*self.session)
    }

    pub fn flow(&self) -> &FlowController {
        &self.flow
    }

    /// Resolve with the disconnect reason of the first fatal failure.
    ///
    /// Returns `None` once both loops have exited without failing.
    /// Cancel-safe; suitable for `tokio::select!`.
    pub async fn wait_failure(&mut self) -> Option<String> {
        self.failures.recv().await
    }

    /// Tear down after a failure: exactly one `disconnected` notice,
    /// then a close carrying the (truncated) reason.
    pub async fn fail(mut self, reason: &str) -> Result<(), WireError> {
        self.stop_loops().await;
        warn!(reason, "streaming stopped");

        let notice = ServerMessage::disconnected(reason).to_json()?;
        let notified = self.sink.send_text(notice).await;
        let closed = self
            .sink
            .close(truncate_reason(reason, self.config.close_reason_limit))
            .await;
        self.session.disconnect();

        notified?;
        closed?;
        Ok(())
    }

    /// Normal shutdown: stop both loops and release the session. The
    /// transport is left open for the caller.
    pub async fn stop(mut self) {
        self.stop_loops().await;
        self.session.disconnect();
        info!("streaming stopped");
    }

    async fn stop_loops(&mut self) {
        self.cancel.cancel();
        for task in [self.frame_task.take(), self.audio_task.take()].into_iter().flatten() {
            if let Err(e) = task.await {
                error!(error = %e, "streaming task panicked");
            }
        }
    }
}

impl Drop for StreamingSupervisor {
    fn drop(&mut self) {
        // Dropped without `fail`/`stop`: the loops must not outlive us.
        self.cancel.cancel();
    }
}

// ── Loops ────────────────────────────────────────────────────────

async fn frame_loop(
    session: Arc<dyn SessionHandle>,
    sink: Arc<dyn TransportSink>,
    poll_timeout: Duration,
    cancel: CancellationToken,
    failures: mpsc::Sender<String>,
) {
    let mut sequencer = FrameSequencer::new();
    let mut codec_logged = false;
    let mut transient_errors: u64 = 0;

    let reason = loop {
        let polling = session.clone();
        let polled = tokio::select! {
            _ = cancel.cancelled() => break None,
            r = tokio::task::spawn_blocking(move || polling.poll(poll_timeout)) => r,
        };
        match polled {
            Ok(Ok(())) => transient_errors = 0,
            Ok(Err(e)) if !e.is_fatal() => {
                transient_errors += 1;
                warn!(error = %e, count = transient_errors, "session poll failed; retrying");
                tokio::select! {
                    _ = cancel.cancelled() => break None,
                    _ = tokio::time::sleep(POLL_RETRY_DELAY) => continue,
                };
            }
            Ok(Err(e)) => {
                debug!(error = %e, "session poll failed");
                break Some(disconnect_reason(&*session, e));
            }
            Err(e) => break Some(format!("session poll panicked: {e}")),
        }

        if !codec_logged && let Some(codec) = session.active_codec() {
            info!(%codec, "graphics codec active");
            codec_logged = true;
        }

        let drained = tokio::select! {
            _ = cancel.cancelled() => break None,
            r = sequencer.drain_one_frame(&*session, &*sink) => r,
        };
        if let Err(e) = drained {
            break Some(e.to_string());
        }
        tokio::task::yield_now().await;
    };

    let stats = sequencer.stats();
    debug!(
        messages = stats.messages_sent,
        frames = stats.frames_completed,
        violations = stats.violations,
        "frame loop ended"
    );
    if let Some(reason) = reason {
        // The receiver is gone only if the supervisor already tore down.
        let _ = failures.send(reason).await;
    }
}

/// What the receiver is told when the engine ends the session.
fn disconnect_reason(session: &dyn SessionHandle, error: SessionError) -> String {
    let detail = match error {
        SessionError::Fatal(reason) if !reason.is_empty() => Some(reason),
        _ => None,
    };
    session
        .last_error()
        .or(detail)
        .unwrap_or_else(|| DEFAULT_DISCONNECT_REASON.to_string())
}

async fn audio_loop(
    session: Arc<dyn SessionHandle>,
    sink: Arc<dyn TransportSink>,
    config: AudioConfig,
    cancel: CancellationToken,
    failures: mpsc::Sender<String>,
) {
    let mut mux = AudioMultiplexer::new(config);
    if let Err(e) = mux.run(&*session, &*sink, &cancel).await {
        let _ = failures.send(e.to_string()).await;
    }
}
