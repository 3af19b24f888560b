use tracing::info;

/// Output device able to play a test tone
pub trait ToneOutput: Send {
    /// Returns false when the device could not play the tone
    fn play_tone(&mut self, frequency_hz: u32, duration_ms: u32) -> bool;
}

/// Tone output for nodes without a speaker; records requests in the log
#[derive(Debug, Default)]
pub struct LogToneOutput {
    played: u64,
}

impl LogToneOutput {
    pub fn played(&self) -> u64 {
        self.played
    }
}

impl ToneOutput for LogToneOutput {
    fn play_tone(&mut self, frequency_hz: u32, duration_ms: u32) -> bool {
        self.played += 1;
        info!("Tone requested: {} Hz for {} ms", frequency_hz, duration_ms);
        true
    }
}
