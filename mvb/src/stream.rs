//! Sample-level access to a captured line signal.

use std::io::{ErrorKind, Read};

/// Nominal bit time of the 1.5 Mb/s bus, in seconds. (§3.3.1.1)
pub const BT: f64 = 666.7e-9;

/// Sample rate of the capture, in samples per second.
pub const SAMPLE_RATE: f64 = 12_000_000.0;

const BLOCK_SIZE: usize = 4096;

/// Tail of the previous block retained across refills, so that the
/// half-bit back-off in [`SampleStream::find_transition`] never reaches
/// behind the buffer.
const OVERLAP: usize = 8;

/// Mapping from raw capture bytes to logical line levels.
///
/// Capture setups differ in which byte value encodes a low line; the
/// mapping is fixed when the decoder is constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum Polarity {
    /// `0xFE` reads as level 0, any other byte as level 1.
    Direct,

    /// `0x02` reads as level 0, any other byte as level 1. The dominant
    /// convention in practice.
    Inverted,
}

impl Polarity {
    fn level(self, raw: u8) -> u8 {
        let low = match self {
            Polarity::Direct => 0xfe,
            Polarity::Inverted => 0x02,
        };
        (raw != low) as u8
    }
}

impl Default for Polarity {
    fn default() -> Self {
        Polarity::Inverted
    }
}

/// Faults raised by the sample cursor.
#[derive(Debug, thiserror::Error)]
pub(crate) enum StreamError {
    #[error("failed to read from capture source: {0}")]
    Io(#[from] std::io::Error),

    #[error("end of stream")]
    Eof,

    /// The decoder only ever moves forward; a skip target behind the
    /// cursor is a logic bug, not a property of the capture.
    #[error("target sample {target} is behind cursor {cursor}")]
    InvalidSkip { target: u64, cursor: u64 },
}

/// Lazy cursor over a one-byte-per-sample capture. Sample `i` carries the
/// time coordinate `i / SAMPLE_RATE`; refills are transparent to callers.
pub(crate) struct SampleStream<R>
where
    R: Read,
{
    reader: R,
    polarity: Polarity,
    ignore_eof: bool,
    block: [u8; BLOCK_SIZE],
    /// Absolute sample index of `block[0]`.
    block_base: u64,
    /// Number of valid bytes in `block`.
    block_len: usize,
    /// Absolute index of the next sample to emit.
    cursor: u64,
}

impl<R> SampleStream<R>
where
    R: Read,
{
    pub fn new(reader: R, polarity: Polarity, ignore_eof: bool) -> SampleStream<R> {
        SampleStream {
            reader,
            polarity,
            ignore_eof,
            block: [0; BLOCK_SIZE],
            block_base: 0,
            block_len: 0,
            cursor: 0,
        }
    }

    /// Time coordinate of the sample under the cursor.
    pub fn time(&self) -> f64 {
        self.cursor as f64 / SAMPLE_RATE
    }

    /// Refills `block` until it covers the cursor. Continuously retries a
    /// zero-length read if `ignore_eof` is set.
    fn check_block(&mut self) -> Result<(), StreamError> {
        while self.cursor >= self.block_base + self.block_len as u64 {
            let keep = self.block_len.min(OVERLAP);
            self.block.copy_within(self.block_len - keep..self.block_len, 0);
            self.block_base += (self.block_len - keep) as u64;
            self.block_len = keep;
            loop {
                match self.reader.read(&mut self.block[self.block_len..]) {
                    Ok(0) => {
                        if self.ignore_eof {
                            continue;
                        }
                        return Err(StreamError::Eof);
                    }
                    Ok(n) => {
                        self.block_len += n;
                        break;
                    }
                    Err(e) => {
                        if e.kind() == ErrorKind::Interrupted {
                            continue;
                        }
                        return Err(e.into());
                    }
                }
            }
        }
        Ok(())
    }

    /// Emits the sample under the cursor and advances by one.
    pub fn next(&mut self) -> Result<(f64, u8), StreamError> {
        self.check_block()?;
        let raw = self.block[(self.cursor - self.block_base) as usize];
        let t = self.time();
        self.cursor += 1;
        Ok((t, self.polarity.level(raw)))
    }

    /// Fast-forwards the cursor to `floor(target * SAMPLE_RATE)` and emits
    /// that sample.
    pub fn skip_until(&mut self, target: f64) -> Result<(f64, u8), StreamError> {
        let index = (target * SAMPLE_RATE) as u64;
        if index < self.cursor {
            return Err(StreamError::InvalidSkip {
                target: index,
                cursor: self.cursor,
            });
        }
        self.cursor = index;
        self.next()
    }

    /// Scans forward for the next sample at `level`, then backs the cursor
    /// off by half a bit time (clamped to the stream start) and emits the
    /// sample there. Used to locate the mid-bit edge of a Start Bit.
    pub fn find_transition(&mut self, level: u8) -> Result<(f64, u8), StreamError> {
        loop {
            self.check_block()?;
            let offset = (self.cursor - self.block_base) as usize;
            let found = self.block[offset..self.block_len]
                .iter()
                .position(|&raw| self.polarity.level(raw) == level);
            match found {
                Some(i) => {
                    self.cursor += i as u64;
                    let back = (self.time() - BT / 2.0).max(0.0);
                    // The overlap retained by `check_block` covers the
                    // back-off; the clamp guards against short reads.
                    self.cursor = ((back * SAMPLE_RATE) as u64).max(self.block_base);
                    return self.next();
                }
                None => self.cursor = self.block_base + self.block_len as u64,
            }
        }
    }
}

#[cfg(test)]
mod cursor {
    use super::*;

    #[test]
    fn next_crosses_block_boundaries() {
        let raw = vec![0x02u8; BLOCK_SIZE + 16];
        let mut stream = SampleStream::new(raw.as_slice(), Polarity::Inverted, false);
        for i in 0..raw.len() {
            let (t, v) = stream.next().unwrap();
            assert_eq!(v, 0);
            assert!((t - i as f64 / SAMPLE_RATE).abs() < 1e-12);
        }
        assert!(matches!(stream.next(), Err(StreamError::Eof)));
    }

    #[test]
    fn skip_until_lands_on_floor_of_target() {
        let raw = [0u8; 64];
        let mut stream = SampleStream::new(&raw[..], Polarity::Inverted, false);
        let (t, v) = stream.skip_until(10.4 / SAMPLE_RATE).unwrap();
        assert_eq!(v, 1);
        assert!((t - 10.0 / SAMPLE_RATE).abs() < 1e-12);
    }

    #[test]
    fn skip_into_the_past_is_rejected() {
        let raw = [0u8; 64];
        let mut stream = SampleStream::new(&raw[..], Polarity::Inverted, false);
        stream.skip_until(32.5 / SAMPLE_RATE).unwrap();
        assert!(matches!(
            stream.skip_until(16.5 / SAMPLE_RATE),
            Err(StreamError::InvalidSkip { target: 16, cursor: 33 })
        ));
    }

    #[test]
    fn find_transition_backs_off_half_a_bit() {
        let mut raw = vec![0x00u8; 16];
        raw.extend_from_slice(&[0x02; 16]);
        let mut stream = SampleStream::new(raw.as_slice(), Polarity::Inverted, false);
        let (t, v) = stream.find_transition(0).unwrap();
        // BT/2 before sample 16 floors to sample 11, still on the high level
        assert_eq!(v, 1);
        assert!((t - 11.0 / SAMPLE_RATE).abs() < 1e-12);
    }

    #[test]
    fn find_transition_crosses_a_refill() {
        let mut raw = vec![0x00u8; BLOCK_SIZE + 2];
        raw.extend_from_slice(&[0x02; 16]);
        let mut stream = SampleStream::new(raw.as_slice(), Polarity::Inverted, false);
        let (t, v) = stream.find_transition(0).unwrap();
        assert_eq!(v, 1);
        let expected = (BLOCK_SIZE + 2) as f64 - 5.0;
        assert!((t - expected / SAMPLE_RATE).abs() < 1e-12);
    }

    #[test]
    fn find_transition_clamps_at_stream_start() {
        let raw = [0x02u8; 8];
        let mut stream = SampleStream::new(&raw[..], Polarity::Inverted, false);
        let (t, v) = stream.find_transition(0).unwrap();
        assert_eq!(t, 0.0);
        assert_eq!(v, 0);
    }

    #[test]
    fn direct_polarity_mapping() {
        let raw = [0xfeu8, 0xff, 0x00];
        let mut stream = SampleStream::new(&raw[..], Polarity::Direct, false);
        assert_eq!(stream.next().unwrap().1, 0);
        assert_eq!(stream.next().unwrap().1, 1);
        assert_eq!(stream.next().unwrap().1, 1);
    }
}
