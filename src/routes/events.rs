//! Server-Sent Events stream of one job's progress.
//!
//! GET /api/v1/jobs/{job_id}/events
//!
//! The first event is a `snapshot` of the job. Progress events follow, named by
//! their type; the stream ends after the job reaches a terminal state.

use std::convert::Infallible;

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::{self, Stream, StreamExt};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::models::event::ProgressEvent;
use crate::routes::error::ApiError;
use crate::services::broadcaster::{ProgressBroadcaster, SubscriptionId};

/// Unsubscribes when the client goes away.
struct SubscriptionGuard {
    id: SubscriptionId,
    broadcaster: ProgressBroadcaster,
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        let broadcaster = self.broadcaster.clone();
        let id = self.id;
        tokio::spawn(async move {
            broadcaster.unsubscribe(id).await;
        });
    }
}

pub async fn job_events(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let subscription = state.orchestrator.subscribe(job_id).await?;
    let guard = SubscriptionGuard {
        id: subscription.id,
        broadcaster: state.orchestrator.broadcaster().clone(),
    };

    // Read state after subscribing so no transition falls between the two.
    let job = state.orchestrator.status(job_id).await?;
    let finished = job.status.is_terminal();
    let snapshot = stream::once(async move {
        Ok::<_, Infallible>(
            Event::default()
                .event("snapshot")
                .json_data(&job)
                .unwrap_or_else(|_| Event::default().event("snapshot")),
        )
    });

    let progress = stream::unfold(
        (subscription.receiver, guard, finished),
        |(mut receiver, guard, done): (mpsc::Receiver<ProgressEvent>, SubscriptionGuard, bool)| async move {
            if done {
                return None;
            }
            let event = receiver.recv().await?;
            let done = matches!(
                &event,
                ProgressEvent::StatusChanged { status, .. } if status.is_terminal()
            );
            Some((Ok(to_sse(&event)), (receiver, guard, done)))
        },
    );

    Ok(Sse::new(snapshot.chain(progress)).keep_alive(KeepAlive::default()))
}

fn to_sse(event: &ProgressEvent) -> Event {
    Event::default()
        .event(event.name())
        .json_data(event)
        .unwrap_or_else(|_| Event::default().event(event.name()))
}
