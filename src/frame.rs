//! The frame type shared by every stage of the pipeline.

use serde::Serialize;

/// Sub-second timestamp resolution as recorded in the source capture.
///
/// Carried as an opaque tag rather than converted to a fixed unit so that
/// [`Frame::ts_frac`] can be written back out bit-exact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TsResolution {
    Micros,
    Nanos,
}

/// One captured packet plus the metadata a capture file carries alongside it.
///
/// `data` is the raw link-layer frame exactly as captured (`caplen` bytes);
/// `orig_len` is the length before any capture-time truncation. Stages that
/// touch bytes (Anonymise, Mask) overwrite `data` in place and never change
/// its length.
#[derive(Debug, Clone, Serialize)]
pub struct Frame {
    pub ts_secs: i64,
    pub ts_frac: u32,
    pub ts_resolution: TsResolution,
    pub orig_len: u32,
    pub data: Vec<u8>,
}

impl Frame {
    pub fn new(ts_secs: i64, ts_frac: u32, ts_resolution: TsResolution, orig_len: u32, data: Vec<u8>) -> Self {
        Self {
            ts_secs,
            ts_frac,
            ts_resolution,
            orig_len,
            data,
        }
    }

    /// Captured length — the number of bytes actually stored for this frame.
    pub fn caplen(&self) -> u32 {
        self.data.len() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caplen_tracks_data_length() {
        let frame = Frame::new(0, 0, TsResolution::Micros, 64, vec![0u8; 40]);
        assert_eq!(frame.caplen(), 40);
        assert_eq!(frame.orig_len, 64);
    }
}
