use std::sync::Arc;
use tokio::{
    sync::{
        mpsc::{self, error::TrySendError},
        RwLock,
    },
    task::JoinHandle,
};
use tracing::{debug, warn};

use crate::{
    protocol::Command,
    session::Session,
    transport::{SerialWriter, Transport},
    types::PostureClassification,
};

/// At most one cue waits behind the one being written
const PENDING_CUES: usize = 1;

/// Queues a vibration cue for every bad-posture verdict
///
/// Cues are written by a background worker one at a time, so the caller never
/// waits on the transport. While a cue is already pending, further ones are
/// dropped rather than buffered. Failed writes are logged and dropped.
pub struct FeedbackActuator {
    queue: mpsc::Sender<Command>,
    cue: Command,
    enabled: bool,
}

impl FeedbackActuator {
    /// Start the write worker for one connection
    pub fn spawn<T: Transport>(
        writer: Arc<SerialWriter<T>>,
        session: Arc<RwLock<Session>>,
        enabled: bool,
    ) -> (Self, JoinHandle<()>) {
        let (queue, pending) = mpsc::channel(PENDING_CUES);
        let worker = tokio::spawn(run_worker(writer, session, pending));

        (
            Self {
                queue,
                cue: Command::Vibrate,
                enabled,
            },
            worker,
        )
    }

    /// React to a newly recorded verdict; returns whether a cue was queued
    pub fn on_classification(&self, classification: PostureClassification) -> bool {
        if !self.enabled || classification != PostureClassification::Bad {
            return false;
        }

        match self.queue.try_send(self.cue) {
            Ok(()) => true,
            Err(TrySendError::Full(cue)) => {
                debug!("{cue} cue already pending, skipping");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }
}

async fn run_worker<T: Transport>(
    writer: Arc<SerialWriter<T>>,
    session: Arc<RwLock<Session>>,
    mut pending: mpsc::Receiver<Command>,
) {
    while let Some(command) = pending.recv().await {
        if !session.read().await.is_connected() {
            debug!("Dropping {command} cue, session no longer connected");
            continue;
        }

        match writer.write(&command.to_bytes()).await {
            Ok(()) => debug!("Sent {command} cue"),
            Err(e) => warn!("Feedback write failed: {e}"),
        }
    }
}
