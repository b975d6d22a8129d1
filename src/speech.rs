/// Speech output
///
/// Thin wrapper over the platform text-to-speech engine. Alerts use
/// interrupt-and-replace semantics: speaking a new alert cuts off whatever is
/// currently playing so the most recent danger is always the one audible.

use anyhow::{Context, Result};
use tracing::warn;

/// Seam between the analysis loop and the audio output
pub trait Voice {
    /// Speak `text`, interrupting any utterance currently playing
    fn speak(&mut self, text: &str) -> Result<()>;

    /// Cancel all pending and playing speech
    fn cancel(&mut self);
}

/// Platform TTS engine with a fixed language and rate
pub struct SystemVoice {
    tts: tts::Tts,
}

impl SystemVoice {
    /// `language` is a BCP-47 tag prefix (e.g. `fr`); `rate` is a multiplier
    /// over the engine's normal speaking rate, clamped to what the backend
    /// supports
    pub fn new(language: &str, rate: f32) -> Result<Self> {
        let mut tts = tts::Tts::default().context("Failed to initialize speech engine")?;

        match tts.voices() {
            Ok(voices) => {
                let wanted = voices
                    .iter()
                    .find(|voice| voice.language().as_str().starts_with(language));
                match wanted {
                    Some(voice) => {
                        if let Err(e) = tts.set_voice(voice) {
                            warn!(language, "could not select voice: {e}");
                        }
                    }
                    None => warn!(language, "no voice for requested language, using default"),
                }
            }
            Err(e) => warn!("could not enumerate voices: {e}"),
        }

        let scaled = (tts.normal_rate() * rate).clamp(tts.min_rate(), tts.max_rate());
        if let Err(e) = tts.set_rate(scaled) {
            warn!(rate, "could not set speech rate: {e}");
        }

        Ok(SystemVoice { tts })
    }
}

impl Voice for SystemVoice {
    fn speak(&mut self, text: &str) -> Result<()> {
        self.tts
            .speak(text, true)
            .map(|_| ())
            .context("Speech synthesis failed")
    }

    fn cancel(&mut self) {
        if let Err(e) = self.tts.stop() {
            warn!("could not cancel speech: {e}");
        }
    }
}
