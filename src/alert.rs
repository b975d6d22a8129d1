/// Alert throttling for spoken obstacle warnings
///
/// Suppresses immediate repeats of the same alert while still re-alerting when
/// a danger persists: the memory of the last spoken text expires after a short
/// cool-down, after which the identical alert may be spoken again.

use std::time::{Duration, Instant};

use crate::constants::alert::{COOLDOWN_MS, SAFE_SENTINEL};

/// Memory of the most recently spoken alert
///
/// Owned exclusively by the throttle; mutated only when an alert is actually
/// spoken and on `reset()`.
#[derive(Debug, Clone)]
struct AlertMemory {
    text: String,
    spoken_at: Instant,
}

pub struct AlertThrottle {
    last_spoken: Option<AlertMemory>,
    cooldown: Duration,
}

impl AlertThrottle {
    pub fn new() -> Self {
        Self::with_cooldown(Duration::from_millis(COOLDOWN_MS))
    }

    pub fn with_cooldown(cooldown: Duration) -> Self {
        AlertThrottle {
            last_spoken: None,
            cooldown,
        }
    }

    /// Whether `text` should be vocalized now
    ///
    /// The "no obstacle" sentinel is never speakable. The same text twice
    /// within the cool-down window is suppressed; once the window elapses the
    /// memory no longer applies.
    pub fn should_speak(&self, text: &str) -> bool {
        self.should_speak_at(text, Instant::now())
    }

    /// Time-explicit variant of [`should_speak`](Self::should_speak)
    pub fn should_speak_at(&self, text: &str, now: Instant) -> bool {
        if text.trim() == SAFE_SENTINEL {
            return false;
        }

        match &self.last_spoken {
            Some(memory) if memory.text == text => {
                now.duration_since(memory.spoken_at) >= self.cooldown
            }
            _ => true,
        }
    }

    /// Record that `text` was just handed to the speech output
    pub fn mark_spoken(&mut self, text: &str) {
        self.mark_spoken_at(text, Instant::now());
    }

    /// Time-explicit variant of [`mark_spoken`](Self::mark_spoken)
    pub fn mark_spoken_at(&mut self, text: &str, now: Instant) {
        self.last_spoken = Some(AlertMemory {
            text: text.to_string(),
            spoken_at: now,
        });
    }

    /// Clear the memory, e.g. when the analysis loop stops
    pub fn reset(&mut self) {
        self.last_spoken = None;
    }
}

impl Default for AlertThrottle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_is_never_spoken() {
        let throttle = AlertThrottle::new();
        assert!(!throttle.should_speak("RAS"));
        assert!(!throttle.should_speak(" RAS "));
    }

    #[test]
    fn first_alert_is_spoken() {
        let throttle = AlertThrottle::new();
        assert!(throttle.should_speak("Mur droit devant !"));
    }

    #[test]
    fn repeat_within_cooldown_is_suppressed() {
        let mut throttle = AlertThrottle::new();
        let t0 = Instant::now();

        throttle.mark_spoken_at("Mur droit devant !", t0);

        let one_second_later = t0 + Duration::from_secs(1);
        assert!(!throttle.should_speak_at("Mur droit devant !", one_second_later));
    }

    #[test]
    fn repeat_after_cooldown_is_spoken_again() {
        let mut throttle = AlertThrottle::new();
        let t0 = Instant::now();

        throttle.mark_spoken_at("Mur droit devant !", t0);

        let after_cooldown = t0 + Duration::from_millis(COOLDOWN_MS) + Duration::from_millis(1);
        assert!(throttle.should_speak_at("Mur droit devant !", after_cooldown));
    }

    #[test]
    fn different_alert_is_spoken_immediately() {
        let mut throttle = AlertThrottle::new();
        let t0 = Instant::now();

        throttle.mark_spoken_at("Mur droit devant !", t0);

        let shortly_after = t0 + Duration::from_millis(100);
        assert!(throttle.should_speak_at("Trou droit devant !", shortly_after));
    }

    #[test]
    fn reset_clears_memory() {
        let mut throttle = AlertThrottle::new();
        let t0 = Instant::now();

        throttle.mark_spoken_at("Mur droit devant !", t0);
        throttle.reset();

        // Right after reset the same text is speakable again
        assert!(throttle.should_speak_at("Mur droit devant !", t0 + Duration::from_millis(1)));
    }
}
