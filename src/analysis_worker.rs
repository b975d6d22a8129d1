/// Inference worker thread
///
/// Runs remote analysis off the controller's timeline so a slow round trip
/// never blocks lifecycle handling. Results come back tagged with the request
/// ID that submitted them; the controller decides whether a result is still
/// relevant (stale results are dropped there, not here).

use std::sync::mpsc::{channel, sync_channel, Receiver, Sender, SyncSender, TrySendError};
use std::thread;

use tracing::{debug, error, warn};

use crate::camera::Frame;
use crate::constants::worker::MAX_PENDING_REQUESTS;
use crate::inference::{AnalysisError, Analyzer};

/// Message sent to the worker thread
enum WorkerMessage {
    Analyze { frame: Frame, request_id: u64 },
}

/// Result of one analysis request
#[derive(Debug)]
pub enum AnalysisOutcome {
    /// The model answered; raw text plus the capture time of the frame
    Verdict {
        text: String,
        captured_at_ms: u64,
        request_id: u64,
    },
    /// The request failed; the cycle resolves without a verdict
    Failed {
        error: AnalysisError,
        request_id: u64,
    },
}

impl AnalysisOutcome {
    pub fn request_id(&self) -> u64 {
        match self {
            AnalysisOutcome::Verdict { request_id, .. } => *request_id,
            AnalysisOutcome::Failed { request_id, .. } => *request_id,
        }
    }
}

/// Handle for submitting frames to the worker thread
pub struct AnalysisWorker {
    task_sender: SyncSender<WorkerMessage>,
}

impl AnalysisWorker {
    /// Spawn the worker thread owning the analyzer
    pub fn spawn(analyzer: Box<dyn Analyzer + Send>) -> (Self, Receiver<AnalysisOutcome>) {
        // Bounded submission channel for backpressure; the result channel can
        // be unbounded since the controller drains it every loop turn
        let (task_tx, task_rx) = sync_channel(MAX_PENDING_REQUESTS);
        let (result_tx, result_rx) = channel();

        thread::spawn(move || {
            Self::worker_loop(task_rx, result_tx, analyzer);
        });

        (AnalysisWorker { task_sender: task_tx }, result_rx)
    }

    /// Submit a frame for analysis (non-blocking)
    ///
    /// If the queue is full the frame is dropped: the loop will capture a
    /// fresher one on its next cycle anyway.
    pub fn submit(&self, frame: Frame, request_id: u64) {
        match self.task_sender.try_send(WorkerMessage::Analyze { frame, request_id }) {
            Ok(_) => {}
            Err(TrySendError::Full(_)) => {
                warn!(request_id, "analysis queue full, dropping frame");
            }
            Err(TrySendError::Disconnected(_)) => {
                error!("analysis worker disconnected");
            }
        }
    }

    fn worker_loop(
        task_rx: Receiver<WorkerMessage>,
        result_tx: Sender<AnalysisOutcome>,
        analyzer: Box<dyn Analyzer + Send>,
    ) {
        debug!("analysis worker thread started");

        for message in task_rx {
            match message {
                WorkerMessage::Analyze { frame, request_id } => {
                    let captured_at_ms = frame.captured_at_ms;
                    let outcome = match analyzer.analyze(&frame) {
                        Ok(text) => AnalysisOutcome::Verdict {
                            text: text.trim().to_string(),
                            captured_at_ms,
                            request_id,
                        },
                        Err(error) => AnalysisOutcome::Failed { error, request_id },
                    };

                    if result_tx.send(outcome).is_err() {
                        debug!("controller disconnected, worker exiting");
                        break;
                    }
                }
            }
        }

        debug!("analysis worker thread stopped");
    }
}
