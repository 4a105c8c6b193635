//! Bit recovery and frame delimiting for the 1.5 Mb/s line signal.

use std::fmt;
use std::io::Read;

use log::trace;

use crate::iter::{Frames, Pairs};
use crate::stream::{Polarity, SampleStream, StreamError, BT};

/// Line symbol recovered from the two half-bit samples of one bit cell.
/// `Nh`/`Nl` are the Manchester violations reserved for frame delimiting.
/// (§3.3.1.2, §3.3.1.3)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum Symbol {
    B0,
    B1,
    Nh,
    Nl,
}

impl Symbol {
    /// Classifies the half-bit sample pair. (§3.3.1.2-3)
    fn classify(v1: u8, v2: u8) -> Symbol {
        match (v1, v2) {
            (1, 0) => Symbol::B1,
            (0, 1) => Symbol::B0,
            (1, 1) => Symbol::Nh,
            _ => Symbol::Nl,
        }
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Symbol::B0 => "0",
            Symbol::B1 => "1",
            Symbol::Nh => "NH",
            Symbol::Nl => "NL",
        })
    }
}

/// Start Delimiter of a master frame. (§3.3.1.5)
const MASTER_DELIMITER: [Symbol; 8] = [
    Symbol::Nh,
    Symbol::Nl,
    Symbol::B0,
    Symbol::Nh,
    Symbol::Nl,
    Symbol::B0,
    Symbol::B0,
    Symbol::B0,
];

/// Start Delimiter of a slave frame.
const SLAVE_DELIMITER: [Symbol; 8] = [
    Symbol::B1,
    Symbol::B1,
    Symbol::B1,
    Symbol::Nl,
    Symbol::Nh,
    Symbol::B1,
    Symbol::Nl,
    Symbol::Nh,
];

/// Which of the two reserved Start Delimiter patterns opened a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum FrameKind {
    Master,
    Slave,
}

impl FrameKind {
    fn from_delimiter(symbols: &[Symbol; 8]) -> Option<FrameKind> {
        if *symbols == MASTER_DELIMITER {
            Some(FrameKind::Master)
        } else if *symbols == SLAVE_DELIMITER {
            Some(FrameKind::Slave)
        } else {
            None
        }
    }
}

/// A validated frame recovered from the line signal.
///
/// `bytes` carries the post-delimiter data and check-sequence bytes; the
/// Start Delimiter itself is consumed into `kind`.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct PhysicalFrame {
    /// Time of the frame's Start Bit, in seconds from capture start.
    pub t_start: f64,

    pub kind: FrameKind,

    /// Data and check-sequence bytes, `len >= 1`.
    pub bytes: Vec<u8>,
}

/// Set of line faults that abort a single frame. All of them are
/// recoverable: the decoder resumes searching for the next Start Bit.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FramingError {
    #[error("start bit should be 1, got {0}")]
    StartBit(Symbol),

    /// The eight symbols after the Start Bit matched neither reserved
    /// pattern.
    #[error("bad start delimiter {0:?}")]
    StartDelimiter([Symbol; 8]),

    /// A non-data symbol inside a data byte, anywhere but the first bit
    /// cell.
    #[error("unexpected non-data symbol {symbol} at bit {position}")]
    NonDataSymbol { symbol: Symbol, position: usize },

    /// An End Delimiter sequence that does not read `NL`, `NH`.
    #[error("end delimiter: expected {expected}, got {got}")]
    EndDelimiter { expected: Symbol, got: Symbol },

    #[error("frame carries no data bytes")]
    EmptyFrame,
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum ErrorInt {
    #[error(transparent)]
    Stream(#[from] StreamError),
    #[error(transparent)]
    Framing(#[from] FramingError),
}

/// [`Decoder`] configuration.
#[derive(Debug, Clone)]
pub struct DecoderOptions {
    /// Raw-byte polarity of the capture source.
    pub polarity: Polarity,

    /// Whether to keep reading after a (temporary) EOF condition. If set,
    /// iteration over [`Frames`] or [`Pairs`] will never end unless the
    /// EOF condition is eventually resolved.
    pub ignore_eof: bool,
}

impl Default for DecoderOptions {
    fn default() -> Self {
        DecoderOptions {
            polarity: Polarity::Inverted,
            ignore_eof: false,
        }
    }
}

/// MVB physical layer decoder: recovers [`PhysicalFrame`]s from a capture
/// of the line signal.
pub struct Decoder<R>
where
    R: Read,
{
    stream: SampleStream<R>,
}

impl<R> Decoder<R>
where
    R: Read,
{
    pub fn new(reader: R, options: DecoderOptions) -> Decoder<R> {
        Decoder {
            stream: SampleStream::new(reader, options.polarity, options.ignore_eof),
        }
    }

    /// Current position in the capture, in seconds.
    pub fn time(&self) -> f64 {
        self.stream.time()
    }

    /// Returns an iterator over [`PhysicalFrame`]s.
    pub fn frames(&mut self) -> Frames<R> {
        Frames::new(self)
    }

    /// Returns an iterator over master/slave pairing records.
    pub fn pairs(&mut self) -> Pairs<R> {
        Pairs::new(self)
    }

    /// Recovers the next valid frame. (§3.3.1.7)
    ///
    /// The idle line sits high; the falling mid-bit edge of the Start Bit
    /// (§3.3.1.4) is the first low sample, so the search backs off half a
    /// bit to land on the bit boundary. All later bit cells are
    /// extrapolated from that boundary; the capture clock is trusted
    /// against the bus clock.
    pub(crate) fn next_frame(&mut self) -> Result<PhysicalFrame, ErrorInt> {
        let (start, _) = self.stream.find_transition(0)?;

        let start_bit = self.read_symbol(start)?;
        if start_bit != Symbol::B1 {
            return Err(FramingError::StartBit(start_bit).into());
        }

        // 3.3.1.5 Start Delimiter
        let mut delimiter = [Symbol::B0; 8];
        for (i, slot) in delimiter.iter_mut().enumerate() {
            *slot = self.read_symbol(start + BT + i as f64 * BT)?;
        }
        let kind = FrameKind::from_delimiter(&delimiter)
            .ok_or(FramingError::StartDelimiter(delimiter))?;
        trace!("{:?} start delimiter at t={:.6}", kind, start);

        let mut bytes = Vec::new();
        for i in 1u64.. {
            match self.read_byte(start + BT + i as f64 * 8.0 * BT)? {
                Some(byte) => bytes.push(byte),
                None => break,
            }
        }
        if bytes.is_empty() {
            return Err(FramingError::EmptyFrame.into());
        }
        Ok(PhysicalFrame {
            t_start: start,
            kind,
            bytes,
        })
    }

    /// Reads one data byte, MSB first. `None` means the End Delimiter
    /// (§3.3.1.6) was consumed instead.
    fn read_byte(&mut self, start: f64) -> Result<Option<u8>, ErrorInt> {
        let mut byte = 0u8;
        for position in 0..8usize {
            let symbol = self.read_symbol(start + position as f64 * BT)?;
            match symbol {
                Symbol::B1 => byte = byte << 1 | 1,
                Symbol::B0 => byte <<= 1,
                _ if position == 0 => {
                    if symbol != Symbol::Nl {
                        return Err(FramingError::EndDelimiter {
                            expected: Symbol::Nl,
                            got: symbol,
                        }
                        .into());
                    }
                    let second = self.read_symbol(start + BT)?;
                    if second != Symbol::Nh {
                        return Err(FramingError::EndDelimiter {
                            expected: Symbol::Nh,
                            got: second,
                        }
                        .into());
                    }
                    // One further bit cell belongs to the delimiter; its
                    // value is not used.
                    self.read_symbol(start + 2.0 * BT)?;
                    return Ok(None);
                }
                _ => {
                    return Err(FramingError::NonDataSymbol { symbol, position }.into());
                }
            }
        }
        Ok(Some(byte))
    }

    /// Samples both halves of the bit cell starting at `start`, then
    /// realigns the cursor to the next cell boundary. (§3.3.1.2)
    fn read_symbol(&mut self, start: f64) -> Result<Symbol, ErrorInt> {
        let (_, v1) = self.stream.skip_until(start + BT / 4.0)?;
        let (_, v2) = self.stream.skip_until(start + 3.0 * BT / 4.0)?;
        self.stream.skip_until(start + BT)?;
        Ok(Symbol::classify(v1, v2))
    }
}
