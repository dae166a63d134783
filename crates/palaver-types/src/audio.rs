//! Audio format descriptor shared by synthesizers and the wire protocol.

use serde::{Deserialize, Serialize};

/// PCM format of an audio stream.
///
/// Synthesizers advertise the format of the chunks they produce; the server
/// echoes it to clients in the `tts_start` envelope so playback can be
/// configured before the first binary frame arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioFormat {
    /// Samples per second.
    pub sample_rate: u32,
    /// Interleaved channel count.
    pub channels: u16,
    /// Bits per sample.
    pub bit_depth: u16,
}

impl AudioFormat {
    /// Raw byte throughput of a stream in this format.
    pub fn bytes_per_second(&self) -> u64 {
        u64::from(self.sample_rate) * u64::from(self.channels) * u64::from(self.bit_depth) / 8
    }
}

impl Default for AudioFormat {
    /// 16 kHz mono s16le, the capture format expected from dialogue clients.
    fn default() -> Self {
        AudioFormat {
            sample_rate: 16000,
            channels: 1,
            bit_depth: 16,
        }
    }
}
