/// Application-wide constants for the analysis cadence, alerting, and capture policy

pub mod analysis {
    /// Delay between the end of one analysis cycle and the start of the next
    /// Self-paced: the follow-up is only scheduled once the previous cycle resolved
    pub const CYCLE_DELAY_MS: u64 = 2500;

    /// Short retry delay when the camera has not produced a usable frame yet
    pub const NOT_READY_RETRY_MS: u64 = 300;

    /// Consecutive inference failures before the loop reports degraded mode
    /// A degraded loop keeps running but stops pretending the path is clear
    pub const DEGRADED_AFTER_FAILURES: u32 = 3;
}

pub mod alert {
    /// The model's fixed marker meaning "no obstacle detected"
    /// Must match the output contract in the system instruction exactly
    pub const SAFE_SENTINEL: &str = "RAS";

    /// Cool-down after speaking an alert during which identical repeats are suppressed
    /// Short enough that a persistent obstacle keeps re-alerting
    pub const COOLDOWN_MS: u64 = 3000;
}

pub mod capture {
    /// Width frames are downscaled to before upload
    /// Small on purpose: payload size and latency matter more than fidelity
    pub const TARGET_WIDTH: u32 = 480;

    /// JPEG quality for the uploaded still (1-100)
    pub const JPEG_QUALITY: u8 = 60;
}

pub mod worker {
    /// Maximum queued inference requests
    /// The controller keeps at most one in flight, so 1 is enough backpressure
    pub const MAX_PENDING_REQUESTS: usize = 1;
}
