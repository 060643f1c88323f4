//! Progress push over Server-Sent Events.
//!
//! The notifier is a blocking channel, so each stream is pumped by a
//! blocking task that forwards into an unbounded tokio channel.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{Extension, Path},
    response::{
        sse::{Event as SseEvent, KeepAlive, Sse},
        IntoResponse,
    },
};
use pixforge_events::{Event, ProgressEvent, Subscription};
use pixforge_jobs::JobStatus;
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::app::dto;
use crate::app::routes::owned_job;
use crate::app::services::AppServices;
use crate::context::UserContext;

type SseSender = UnboundedSender<Result<SseEvent, std::convert::Infallible>>;

const HEARTBEAT: Duration = Duration::from_secs(15);

/// GET /stream
///
/// Every progress event for the caller's jobs.
pub async fn user_stream(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<UserContext>,
) -> axum::response::Response {
    let subscription = services.notifier.subscribe_user(user.user_id());
    sse_response(subscription, None, Pump::Forever)
}

/// GET /jobs/:id/stream
///
/// Starts with a `snapshot` of the job, then its events; closes after the
/// terminal event.
pub async fn job_stream(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<UserContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let job_id = match dto::parse_job_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    // Subscribe before reading the snapshot so no transition is missed.
    let subscription = services.notifier.subscribe_job(job_id);
    let job = match owned_job(&services, &user, job_id).await {
        Ok(job) => job,
        Err(resp) => return resp,
    };

    let pump = if job.status == JobStatus::Processing {
        Pump::UntilTerminal
    } else {
        Pump::Never
    };
    let snapshot = serde_json::to_string(&job.status_view())
        .ok()
        .map(|data| SseEvent::default().event("snapshot").data(data));
    sse_response(subscription, snapshot, pump)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pump {
    Never,
    UntilTerminal,
    Forever,
}

fn sse_response(
    subscription: Subscription<ProgressEvent>,
    first: Option<SseEvent>,
    mode: Pump,
) -> axum::response::Response {
    let (tx, rx) = unbounded_channel::<Result<SseEvent, std::convert::Infallible>>();
    if let Some(event) = first {
        let _ = tx.send(Ok(event));
    }
    if mode != Pump::Never {
        tokio::task::spawn_blocking(move || pump(subscription, tx, mode == Pump::UntilTerminal));
    }

    Sse::new(UnboundedReceiverStream::new(rx))
        .keep_alive(KeepAlive::new().interval(HEARTBEAT))
        .into_response()
}

fn pump(subscription: Subscription<ProgressEvent>, tx: SseSender, stop_on_terminal: bool) {
    let mut last_heartbeat = Instant::now();
    loop {
        match subscription.recv_timeout(Duration::from_millis(1000)) {
            Ok(event) => {
                let json = match serde_json::to_string(&event) {
                    Ok(s) => s,
                    Err(_) => continue,
                };
                let terminal = event.is_terminal();
                if tx.send(Ok(SseEvent::default().event(event.event_type()).data(json))).is_err() {
                    break; // Client went away
                }
                last_heartbeat = Instant::now();
                if stop_on_terminal && terminal {
                    break;
                }
            }
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {
                // Detects disconnected clients between events.
                if last_heartbeat.elapsed() > HEARTBEAT {
                    if tx.send(Ok(SseEvent::default().event("heartbeat").data("{}"))).is_err() {
                        break;
                    }
                    last_heartbeat = Instant::now();
                }
            }
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }
}
