/// Analysis loop state machine
///
/// Pure lifecycle and sequencing logic for the capture-analyze-speak loop,
/// kept free of I/O so every transition is testable. The controller drives
/// it and performs the side effects it sanctions.
///
/// Lifecycle: Idle -> Starting -> Running -> Stopping -> Idle. At most one
/// analysis cycle is ever in flight, enforced here via the `analyzing` flag
/// and a pending request ID; a result that arrives after the loop left
/// Running (or under a different ID) is stale and gets dropped.

use tracing::debug;

use crate::constants::analysis::DEGRADED_AFTER_FAILURES;
use crate::verdict::Verdict;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Starting,
    Running,
    Stopping,
}

pub struct LoopState {
    phase: Phase,

    /// True only while a capture/inference/classify cycle is in flight
    analyzing: bool,

    /// The verdict currently shown to the user; replaced wholesale each cycle
    last_result: Option<Verdict>,

    /// User-visible error text (camera unavailable, missing credential)
    error: Option<String>,

    /// ID of the in-flight analysis request, if any
    pending_request: Option<u64>,

    /// Counter for generating unique request IDs
    next_request_id: u64,

    /// Consecutive failed cycles; drives the degraded-mode indicator
    consecutive_failures: u32,
}

impl LoopState {
    pub fn new() -> Self {
        LoopState {
            phase: Phase::Idle,
            analyzing: false,
            last_result: None,
            error: None,
            pending_request: None,
            next_request_id: 1,
            consecutive_failures: 0,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Whether the loop has been started and not yet stopped
    pub fn is_active(&self) -> bool {
        matches!(self.phase, Phase::Starting | Phase::Running)
    }

    pub fn is_analyzing(&self) -> bool {
        self.analyzing
    }

    pub fn last_result(&self) -> Option<&Verdict> {
        self.last_result.as_ref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Sustained inference failure: the loop still runs but its verdicts are
    /// stale and must not be read as "all clear"
    pub fn is_degraded(&self) -> bool {
        self.consecutive_failures >= DEGRADED_AFTER_FAILURES
    }

    /// Record a user-visible error without changing phase
    pub fn note_error(&mut self, message: impl Into<String>) {
        self.error = Some(message.into());
    }

    /// Idle -> Starting. Returns false (no-op) from any other phase, which is
    /// what makes repeated start() calls safe.
    pub fn begin_start(&mut self) -> bool {
        if self.phase != Phase::Idle {
            return false;
        }
        self.phase = Phase::Starting;
        self.error = None;
        true
    }

    /// Starting -> Running; the first cycle may now be scheduled
    pub fn camera_ready(&mut self) {
        debug_assert_eq!(self.phase, Phase::Starting);
        self.phase = Phase::Running;
        self.error = None;
        self.consecutive_failures = 0;
    }

    /// Starting -> Idle with an observable error; no cycle gets scheduled
    pub fn camera_failed(&mut self, message: impl Into<String>) {
        self.phase = Phase::Idle;
        self.error = Some(message.into());
    }

    /// Begin one analysis cycle, if the loop is Running and no cycle is in
    /// flight. Returns the request ID to tag the cycle with.
    pub fn begin_cycle(&mut self) -> Option<u64> {
        if self.phase != Phase::Running || self.analyzing {
            return None;
        }
        let request_id = self.generate_request_id();
        self.analyzing = true;
        self.pending_request = Some(request_id);
        debug!(request_id, "cycle started");
        Some(request_id)
    }

    /// Abandon a cycle that never reached the worker (e.g. the camera was not
    /// ready); clears `analyzing` so the next cycle may begin
    pub fn abort_cycle(&mut self, request_id: u64) {
        if self.pending_request == Some(request_id) {
            self.pending_request = None;
            self.analyzing = false;
        }
    }

    /// Apply a successful analysis result
    ///
    /// Returns the new current verdict, or None when the result is stale:
    /// wrong request ID, or the loop left Running while the request was in
    /// flight. A stale result must not touch `last_result`.
    pub fn apply_result(&mut self, request_id: u64, text: String, timestamp_ms: u64) -> Option<Verdict> {
        if self.pending_request != Some(request_id) {
            debug!(request_id, "dropping stale result");
            return None;
        }

        self.pending_request = None;
        self.analyzing = false;

        if self.phase != Phase::Running {
            debug!(request_id, "dropping result, loop no longer running");
            return None;
        }

        self.consecutive_failures = 0;
        let verdict = Verdict::new(text, timestamp_ms);
        self.last_result = Some(verdict.clone());
        Some(verdict)
    }

    /// Apply a failed analysis result
    ///
    /// `last_result` stays untouched; only `analyzing` resets and the failure
    /// streak grows. Returns false for stale failures.
    pub fn apply_failure(&mut self, request_id: u64) -> bool {
        if self.pending_request != Some(request_id) {
            return false;
        }

        self.pending_request = None;
        self.analyzing = false;

        if self.phase != Phase::Running {
            return false;
        }

        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        true
    }

    /// Running|Starting -> Stopping. Returns false (no-op) when there is
    /// nothing to stop, making repeated stop() calls safe.
    pub fn begin_stop(&mut self) -> bool {
        if !self.is_active() {
            return false;
        }
        self.phase = Phase::Stopping;
        true
    }

    /// Stopping -> Idle; clears the current verdict and any in-flight cycle
    /// bookkeeping so a late result has nothing to attach to
    pub fn finish_stop(&mut self) {
        self.phase = Phase::Idle;
        self.analyzing = false;
        self.last_result = None;
        self.pending_request = None;
        self.consecutive_failures = 0;
    }

    fn generate_request_id(&mut self) -> u64 {
        let id = self.next_request_id;
        self.next_request_id = self.next_request_id.wrapping_add(1);
        id
    }
}

impl Default for LoopState {
    fn default() -> Self {
        Self::new()
    }
}
