//! # `mvb`
//!
//! A decoder for the Multifunction Vehicle Bus (MVB) physical layer and
//! telegram protocol as specified in IEC 61375-3-1. Any section
//! references in this code base refer to this document.
//!
//! The input is a capture of the bus line signal: one byte per sample at
//! 12 MS/s, read from any [`Read`](std::io::Read) instance. Two iterators
//! expose the decoded stream:
//!
//! - [`Frames`](Frames), which recovers each physical frame in sequence,
//! yielding [`PhysicalFrame`](PhysicalFrame)s.
//!
//! - [`Pairs`](Pairs), which pairs every master frame with the slave frame
//! answering it (if any), yielding [`PairedFrames`](PairedFrames) records
//! ready for interpretation via [`Telegram::from_pair`](Telegram::from_pair).
//!
//! Usage is simple:
//! ```
//! use mvb::{Decoder, DecoderOptions};
//!
//! // or a std::fs::File, or anything else that implements std::io::Read
//! let capture: &[u8] = &[
//!     // ...
//! ];
//! let mut decoder = Decoder::<&[u8]>::new(capture, DecoderOptions::default());
//! for record in decoder.pairs() {
//!     // ...
//! }
//! ```
#[deny(rustdoc::broken_intra_doc_links)]
mod aggregate;
mod crc;
mod decoder;
mod iter;
mod stream;
mod telegram;

pub use aggregate::{ProcessVariable, ProcessVariables};
pub use crc::{check_sequence, verify as verify_check_sequence, CrcMismatch};
pub use decoder::{Decoder, DecoderOptions, FrameKind, FramingError, PhysicalFrame, Symbol};
pub use iter::{Frames, PairedFrames, Pairs, Record, RecordError};
pub use stream::{Polarity, BT, SAMPLE_RATE};
pub use telegram::{
    parse_slave_frame, AddressType, DeviceStatusResponse, FCode, MasterFrame, MasterRequest,
    MessageDataResponse, ProcessDataResponse, SlaveFrame, SlaveFrameDestination, SlaveFrameSource,
    SlaveReply, SlaveResponse, Telegram, TelegramError, FCODES,
};

/// Set of errors that can occur during decode.
#[derive(Debug, thiserror::Error)]
pub enum DecoderError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The decoder asked its sample cursor to rewind. Always a logic bug,
    /// never a property of the capture; fatal.
    #[error("InvalidSkip: target sample {target} is behind cursor {cursor}")]
    InvalidSkip { target: u64, cursor: u64 },

    /// The line signal violated the frame format. The current frame is
    /// abandoned and decoding resumes at the next Start Bit.
    #[error("FramingError: {source}")]
    Framing {
        /// Stream position the fault was detected at.
        t: f64,
        source: FramingError,
    },

    /// A slave frame arrived where a master was required. The stray frame
    /// is dropped.
    #[error("ProtocolError: expected master frame, got slave")]
    ExpectedMaster { t: f64 },
}

impl DecoderError {
    /// Stream time the error was raised at, where one is known.
    pub fn time(&self) -> Option<f64> {
        match self {
            DecoderError::Framing { t, .. } | DecoderError::ExpectedMaster { t } => Some(*t),
            _ => None,
        }
    }

    /// Whether the pipeline may keep running past this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            DecoderError::Framing { .. } | DecoderError::ExpectedMaster { .. }
        )
    }
}
