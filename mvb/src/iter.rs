//! Iterators over decoded frames, master/slave pairing, and the
//! intermediate dump format.

use std::fmt;
use std::io::Read;
use std::str::FromStr;

use log::debug;

use crate::decoder::{Decoder, ErrorInt, FrameKind, PhysicalFrame};
use crate::stream::StreamError;
use crate::DecoderError;

/// Iterator that yields each [`PhysicalFrame`] in the capture in turn.
pub struct Frames<'a, R>
where
    R: Read,
{
    decoder: &'a mut Decoder<R>,
}

impl<'a, R> Frames<'a, R>
where
    R: Read,
{
    pub(crate) fn new(decoder: &'a mut Decoder<R>) -> Self {
        Self { decoder }
    }
}

impl<'a, R> Iterator for Frames<'a, R>
where
    R: Read,
{
    type Item = Result<PhysicalFrame, DecoderError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.decoder.next_frame() {
            Err(ErrorInt::Stream(StreamError::Eof)) => None,
            Err(e) => Some(Err(lift(e, self.decoder.time()))),
            Ok(frame) => Some(Ok(frame)),
        }
    }
}

/// Maps an internal fault onto the public error, attaching the stream time
/// recoverable faults are reported at.
fn lift(e: ErrorInt, t: f64) -> DecoderError {
    match e {
        ErrorInt::Stream(StreamError::Io(io)) => DecoderError::Io(io),
        ErrorInt::Stream(StreamError::Eof) => unreachable!("EOF ends iteration"),
        ErrorInt::Stream(StreamError::InvalidSkip { target, cursor }) => {
            DecoderError::InvalidSkip { target, cursor }
        }
        ErrorInt::Framing(source) => DecoderError::Framing { t, source },
    }
}

/// A pairing record: one master frame and the slave frame answering it,
/// if any.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct PairedFrames {
    pub master: PhysicalFrame,
    pub slave: Option<PhysicalFrame>,
}

/// Iterator that yields [`PairedFrames`] records.
///
/// A master frame with no reply is followed directly by the next master
/// frame on the bus, so pairing keeps a one-frame look-ahead: when two
/// masters arrive back to back, the first record carries no slave and the
/// second master is deferred to the next pull. Emission order follows
/// `t_start` and is never reordered.
pub struct Pairs<'a, R>
where
    R: Read,
{
    decoder: &'a mut Decoder<R>,
    pending: Option<PhysicalFrame>,
    done: bool,
}

impl<'a, R> Pairs<'a, R>
where
    R: Read,
{
    pub(crate) fn new(decoder: &'a mut Decoder<R>) -> Self {
        Self {
            decoder,
            pending: None,
            done: false,
        }
    }
}

impl<'a, R> Iterator for Pairs<'a, R>
where
    R: Read,
{
    type Item = Result<PairedFrames, DecoderError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let master = match self.pending.take() {
            Some(frame) => frame,
            None => match self.decoder.next_frame() {
                Ok(frame) => frame,
                Err(ErrorInt::Stream(StreamError::Eof)) => {
                    self.done = true;
                    return None;
                }
                Err(e) => return Some(Err(lift(e, self.decoder.time()))),
            },
        };
        if master.kind != FrameKind::Master {
            return Some(Err(DecoderError::ExpectedMaster { t: master.t_start }));
        }

        match self.decoder.next_frame() {
            Ok(follower) if follower.kind == FrameKind::Master => {
                debug!("master at t={:.6} went unanswered", master.t_start);
                self.pending = Some(follower);
                Some(Ok(PairedFrames {
                    master,
                    slave: None,
                }))
            }
            Ok(follower) => Some(Ok(PairedFrames {
                master,
                slave: Some(follower),
            })),
            Err(ErrorInt::Stream(StreamError::Eof)) => {
                self.done = true;
                Some(Ok(PairedFrames {
                    master,
                    slave: None,
                }))
            }
            // The held master is dropped along with the faulted frame.
            Err(e) => Some(Err(lift(e, self.decoder.time()))),
        }
    }
}

/// One row of the intermediate `t,master_hex,slave_hex` dump: the time of
/// the master frame, its bytes, and the reply bytes (empty when the master
/// went unanswered).
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Record {
    pub t: f64,
    pub master: Vec<u8>,
    pub slave: Option<Vec<u8>>,
}

/// Faults raised while parsing an intermediate dump row.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RecordError {
    #[error("RecordError: expected 3 comma-separated fields, got {0}")]
    FieldCount(usize),

    #[error("RecordError: bad time field: {0}")]
    Time(#[from] std::num::ParseFloatError),

    #[error("RecordError: odd hex length")]
    OddHexLength,

    #[error("RecordError: bad hex digit {0:?}")]
    HexDigit(char),
}

fn hex_digit(c: char) -> Result<u8, RecordError> {
    c.to_digit(16)
        .map(|d| d as u8)
        .ok_or(RecordError::HexDigit(c))
}

fn parse_hex(s: &str) -> Result<Vec<u8>, RecordError> {
    if s.len() % 2 != 0 {
        return Err(RecordError::OddHexLength);
    }
    s.as_bytes()
        .chunks(2)
        .map(|pair| Ok(hex_digit(pair[0] as char)? << 4 | hex_digit(pair[1] as char)?))
        .collect()
}

impl FromStr for Record {
    type Err = RecordError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = line.trim_end().split(',').collect();
        if fields.len() != 3 {
            return Err(RecordError::FieldCount(fields.len()));
        }
        Ok(Record {
            t: fields[0].parse()?,
            master: parse_hex(fields[1])?,
            slave: if fields[2].is_empty() {
                None
            } else {
                Some(parse_hex(fields[2])?)
            },
        })
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{},", self.t)?;
        for byte in &self.master {
            write!(f, "{:02x}", byte)?;
        }
        f.write_str(",")?;
        if let Some(slave) = &self.slave {
            for byte in slave {
                write!(f, "{:02x}", byte)?;
            }
        }
        Ok(())
    }
}

impl From<&PairedFrames> for Record {
    fn from(pair: &PairedFrames) -> Record {
        Record {
            t: pair.master.t_start,
            master: pair.master.bytes.clone(),
            slave: pair.slave.as_ref().map(|slave| slave.bytes.clone()),
        }
    }
}

#[cfg(test)]
mod records {
    use super::*;

    #[test]
    fn parses_a_paired_row() {
        let record: Record = "0.000123,0f21a5,abcdef".parse().unwrap();
        assert!((record.t - 0.000123).abs() < 1e-12);
        assert_eq!(record.master, vec![0x0f, 0x21, 0xa5]);
        assert_eq!(record.slave, Some(vec![0xab, 0xcd, 0xef]));
    }

    #[test]
    fn empty_reply_field_means_no_slave() {
        let record: Record = "1.5,0f21a5,".parse().unwrap();
        assert_eq!(record.slave, None);
    }

    #[test]
    fn renders_exactly_what_it_parses() {
        for line in ["0.000123,0f21a5,abcdef", "2.5,c034ff,"].iter() {
            let record: Record = line.parse().unwrap();
            assert_eq!(record.to_string(), *line);
        }
    }

    #[test]
    fn rejects_malformed_rows() {
        assert_eq!(
            "0.1,0f21a5".parse::<Record>(),
            Err(RecordError::FieldCount(2))
        );
        assert_eq!(
            "0.1,0f21a5".parse::<Record>().unwrap_err().to_string(),
            "RecordError: expected 3 comma-separated fields, got 2"
        );
        assert_eq!(
            "0.1,0f2,".parse::<Record>(),
            Err(RecordError::OddHexLength)
        );
        assert_eq!(
            "0.1,0fzz,".parse::<Record>(),
            Err(RecordError::HexDigit('z'))
        );
        assert!("abc,0f21a5,".parse::<Record>().is_err());
    }
}
