/// Analysis loop controller
///
/// Owns the camera, the inference worker, the throttle, and the speech
/// output, and drives the LoopState machine on a single timeline: commands
/// and worker results are polled in one loop, and at most one deferred
/// continuation (the next-cycle deadline) exists at a time. Each resolved
/// cycle schedules exactly one follow-up, so a slow endpoint naturally slows
/// the cadence instead of piling up requests.

use std::sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError};
use std::time::{Duration, Instant};

use tracing::{error, info, warn};

use crate::alert::AlertThrottle;
use crate::analysis_worker::{AnalysisOutcome, AnalysisWorker};
use crate::camera::{CameraError, FrameSource};
use crate::constants::analysis::NOT_READY_RETRY_MS;
use crate::inference::{AnalysisError, Analyzer};
use crate::loop_state::{LoopState, Phase};
use crate::speech::Voice;
use crate::verdict::Status;

/// User-facing controls; safe to send repeatedly and from any state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Stop,
    Shutdown,
}

pub struct Controller<C: FrameSource, V: Voice> {
    camera: C,
    voice: V,
    worker: AnalysisWorker,
    results: Receiver<AnalysisOutcome>,
    state: LoopState,
    throttle: AlertThrottle,
    cycle_delay: Duration,
    retry_delay: Duration,
    /// The one pending deferred continuation; None means nothing scheduled
    next_cycle_at: Option<Instant>,
}

impl<C: FrameSource, V: Voice> Controller<C, V> {
    pub fn new(
        camera: C,
        analyzer: Box<dyn Analyzer + Send>,
        voice: V,
        cycle_delay: Duration,
        alert_cooldown: Duration,
    ) -> Self {
        let (worker, results) = AnalysisWorker::spawn(analyzer);

        Controller {
            camera,
            voice,
            worker,
            results,
            state: LoopState::new(),
            throttle: AlertThrottle::with_cooldown(alert_cooldown),
            cycle_delay,
            retry_delay: Duration::from_millis(NOT_READY_RETRY_MS),
            next_cycle_at: None,
        }
    }

    pub fn state(&self) -> &LoopState {
        &self.state
    }

    /// Deadline of the next scheduled cycle, if any
    pub fn next_cycle_at(&self) -> Option<Instant> {
        self.next_cycle_at
    }

    /// Idle -> Running (or back to Idle with an observable error when the
    /// camera cannot be acquired). A no-op when already active.
    pub fn start(&mut self) {
        if !self.state.begin_start() {
            return;
        }

        match self.camera.start() {
            Ok(()) => {
                self.state.camera_ready();
                // First cycle runs immediately
                self.next_cycle_at = Some(Instant::now());
                info!("analysis loop running");
            }
            Err(e) => {
                warn!("camera acquisition failed: {e}");
                self.state.camera_failed(e.to_string());
            }
        }
    }

    /// Tear down: cancel the pending cycle, release the camera, silence
    /// speech, forget throttle memory. A no-op when already Idle; safe while
    /// a cycle is in flight (its eventual result is dropped as stale).
    pub fn stop(&mut self) {
        if !self.state.begin_stop() {
            return;
        }

        self.next_cycle_at = None;
        self.camera.stop();
        self.voice.cancel();
        self.throttle.reset();
        self.state.finish_stop();
        info!("analysis loop stopped");
    }

    /// Execute the scheduled cycle if its deadline has passed
    pub fn tick(&mut self, now: Instant) {
        let due = matches!(self.next_cycle_at, Some(at) if at <= now);
        if !due {
            return;
        }

        let Some(request_id) = self.state.begin_cycle() else {
            // Not running, or a cycle is somehow still unresolved; the
            // deadline stays consumed either way
            self.next_cycle_at = None;
            return;
        };
        self.next_cycle_at = None;

        match self.camera.capture() {
            Ok(frame) => {
                self.worker.submit(frame, request_id);
            }
            Err(CameraError::NotReady) => {
                // Transient: retry shortly, never surfaced to the user
                self.state.abort_cycle(request_id);
                self.next_cycle_at = Some(now + self.retry_delay);
            }
            Err(e) => {
                // The camera went away mid-run; take the loop down with a
                // visible error
                error!("camera failure: {e}");
                self.state.abort_cycle(request_id);
                self.stop();
                self.state.note_error(e.to_string());
            }
        }
    }

    /// Wait up to `wait` for a worker outcome, then drain whatever else is
    /// already queued
    pub fn process_results(&mut self, wait: Duration) {
        match self.results.recv_timeout(wait) {
            Ok(outcome) => {
                self.handle_outcome(outcome);
                while let Ok(outcome) = self.results.try_recv() {
                    self.handle_outcome(outcome);
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                error!("analysis worker disconnected");
            }
        }
    }

    fn handle_outcome(&mut self, outcome: AnalysisOutcome) {
        match outcome {
            AnalysisOutcome::Verdict {
                text,
                captured_at_ms,
                request_id,
            } => {
                let Some(verdict) = self.state.apply_result(request_id, text, captured_at_ms)
                else {
                    return;
                };

                match verdict.status {
                    Status::Safe => info!(text = %verdict.text, "path clear"),
                    Status::Danger => {
                        warn!(text = %verdict.text, "obstacle detected");
                        if self.throttle.should_speak(&verdict.text) {
                            if let Err(e) = self.voice.speak(&verdict.text) {
                                warn!("speech output failed: {e}");
                            }
                            self.throttle.mark_spoken(&verdict.text);
                        }
                    }
                }

                self.schedule_next();
            }
            AnalysisOutcome::Failed { error, request_id } => {
                if !self.state.apply_failure(request_id) {
                    return;
                }

                match &error {
                    AnalysisError::MissingApiKey(_) => {
                        // Not transient; make it visible instead of retrying
                        // in silence
                        error!("{error}");
                        self.state.note_error(error.to_string());
                    }
                    other => warn!("analysis cycle failed: {other}"),
                }

                if self.state.is_degraded() {
                    warn!("inference degraded: recent cycles all failed, alerts may be stale");
                }

                self.schedule_next();
            }
        }
    }

    /// Each resolved cycle schedules exactly one follow-up
    fn schedule_next(&mut self) {
        if self.state.phase() == Phase::Running {
            self.next_cycle_at = Some(Instant::now() + self.cycle_delay);
        }
    }

    /// Drive the loop until a Shutdown command arrives (or the command
    /// channel goes away)
    pub fn run(&mut self, commands: Receiver<Command>) {
        const POLL_INTERVAL: Duration = Duration::from_millis(50);

        loop {
            loop {
                match commands.try_recv() {
                    Ok(Command::Start) => self.start(),
                    Ok(Command::Stop) => self.stop(),
                    Ok(Command::Shutdown) => {
                        self.stop();
                        return;
                    }
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        self.stop();
                        return;
                    }
                }
            }

            self.tick(Instant::now());
            self.process_results(POLL_INTERVAL);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::Frame;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    struct FakeCamera {
        fail_start: bool,
        captures: Arc<AtomicUsize>,
        started: Arc<AtomicUsize>,
        stopped: Arc<AtomicUsize>,
    }

    impl FakeCamera {
        fn new() -> Self {
            FakeCamera {
                fail_start: false,
                captures: Arc::new(AtomicUsize::new(0)),
                started: Arc::new(AtomicUsize::new(0)),
                stopped: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    impl FrameSource for FakeCamera {
        fn start(&mut self) -> Result<(), CameraError> {
            if self.fail_start {
                return Err(CameraError::Unavailable("no device".to_string()));
            }
            self.started.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn capture(&mut self) -> Result<Frame, CameraError> {
            self.captures.fetch_add(1, Ordering::SeqCst);
            Ok(Frame {
                data: vec![0xFF, 0xD8, 0xFF, 0xD9],
                mime_type: "image/jpeg",
                width: 4,
                height: 4,
                captured_at_ms: 1,
            })
        }

        fn stop(&mut self) {
            self.stopped.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct SilentVoice {
        spoken: Arc<Mutex<Vec<String>>>,
    }

    impl Voice for SilentVoice {
        fn speak(&mut self, text: &str) -> anyhow::Result<()> {
            self.spoken.lock().unwrap().push(text.to_string());
            Ok(())
        }

        fn cancel(&mut self) {}
    }

    struct NeverAnalyzer;

    impl Analyzer for NeverAnalyzer {
        fn analyze(&self, _frame: &Frame) -> Result<String, AnalysisError> {
            Err(AnalysisError::Transport("unreachable in test".to_string()))
        }
    }

    fn controller(camera: FakeCamera) -> Controller<FakeCamera, SilentVoice> {
        Controller::new(
            camera,
            Box::new(NeverAnalyzer),
            SilentVoice {
                spoken: Arc::new(Mutex::new(Vec::new())),
            },
            Duration::from_millis(2500),
            Duration::from_millis(3000),
        )
    }

    #[test]
    fn start_schedules_the_first_cycle_immediately() {
        let mut controller = controller(FakeCamera::new());

        controller.start();

        assert_eq!(controller.state().phase(), Phase::Running);
        assert!(controller.next_cycle_at().unwrap() <= Instant::now());
    }

    #[test]
    fn failed_acquisition_returns_to_idle_without_scheduling() {
        let mut camera = FakeCamera::new();
        camera.fail_start = true;
        let mut controller = controller(camera);

        controller.start();

        assert_eq!(controller.state().phase(), Phase::Idle);
        assert!(controller.state().error().is_some());
        assert!(controller.next_cycle_at().is_none());
    }

    #[test]
    fn start_while_running_does_not_reacquire() {
        let mut controller = controller(FakeCamera::new());
        let started = controller.camera.started.clone();

        controller.start();
        controller.start();

        assert_eq!(started.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn stop_cancels_schedule_and_releases_camera() {
        let mut controller = controller(FakeCamera::new());
        let stopped = controller.camera.stopped.clone();

        controller.start();
        controller.stop();
        controller.stop(); // idempotent

        assert_eq!(controller.state().phase(), Phase::Idle);
        assert!(controller.next_cycle_at().is_none());
        assert_eq!(stopped.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn resolved_cycle_schedules_exactly_one_followup() {
        let mut controller = controller(FakeCamera::new());
        let captures = controller.camera.captures.clone();

        controller.start();
        controller.tick(Instant::now());
        assert_eq!(captures.load(Ordering::SeqCst), 1);

        // The analyzer fails; the cycle still resolves and schedules a
        // follow-up on the normal cadence
        controller.process_results(Duration::from_secs(5));
        let deadline = controller.next_cycle_at().expect("follow-up scheduled");
        assert!(deadline > Instant::now());

        // Before the deadline nothing new is captured
        controller.tick(Instant::now());
        assert_eq!(captures.load(Ordering::SeqCst), 1);
    }
}
