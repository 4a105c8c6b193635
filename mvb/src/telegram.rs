//! Telegram semantics: the function-code table and the interpretation of
//! master and slave frames. (§3.4, §3.5)

use std::fmt;

use bitmatch::bitmatch;
use bitvec::prelude::*;

use crate::crc::{self, CrcMismatch};
use crate::iter::{PairedFrames, Record};

/// How the 12-bit address field of a master frame is to be read.
/// (Table 53)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum AddressType {
    None,
    Logical,
    Device,
    AllDevices,
    DeviceGroup,
}

/// Action requested of the addressed device(s) by a master frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum MasterRequest {
    ProcessData,
    Reserved,
    MastershipTransfer,
    GeneralEvent,
    MessageData,
    GroupEvent,
    SingleEvent,
    DeviceStatus,
}

impl MasterRequest {
    /// Upper-case name as printed in telegram logs.
    pub fn name(self) -> &'static str {
        match self {
            MasterRequest::ProcessData => "PROCESS_DATA",
            MasterRequest::Reserved => "RESERVED",
            MasterRequest::MastershipTransfer => "MASTERSHIP_TRANSFER",
            MasterRequest::GeneralEvent => "GENERAL_EVENT",
            MasterRequest::MessageData => "MESSAGE_DATA",
            MasterRequest::GroupEvent => "GROUP_EVENT",
            MasterRequest::SingleEvent => "SINGLE_EVENT",
            MasterRequest::DeviceStatus => "DEVICE_STATUS",
        }
    }
}

/// Which device sources the slave frame answering a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum SlaveFrameSource {
    None,
    Single,
    ProposedMaster,
    DeviceGroup,
    SubscribedSource,
}

/// What the slave frame carries in response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum SlaveResponse {
    None,
    ProcessData,
    MastershipTransfer,
    EventIdentifier,
    MessageData,
    DeviceStatus,
}

/// Who consumes the slave frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum SlaveFrameDestination {
    None,
    SubscribedSinks,
    Master,
    SelectedDevices,
    MasterOrMonitor,
}

/// One row of the function-code table. (Table 53)
#[derive(Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct FCode {
    pub n: u8,
    pub address_type: AddressType,
    pub master_request: MasterRequest,
    pub slave_frame_source: SlaveFrameSource,
    /// Expected slave payload size in bits; 0 for reserved codes.
    pub slave_frame_size: u16,
    pub slave_response: SlaveResponse,
    pub slave_frame_destination: SlaveFrameDestination,
}

const fn row(
    n: u8,
    address_type: AddressType,
    master_request: MasterRequest,
    slave_frame_source: SlaveFrameSource,
    slave_frame_size: u16,
    slave_response: SlaveResponse,
    slave_frame_destination: SlaveFrameDestination,
) -> FCode {
    FCode {
        n,
        address_type,
        master_request,
        slave_frame_source,
        slave_frame_size,
        slave_response,
        slave_frame_destination,
    }
}

/// The function-code table, indexed by the 4-bit F-code of the master
/// frame. Exhaustive over 0..=15; reserved codes expect no slave frame.
/// (Table 53)
pub static FCODES: [FCode; 16] = fcode_table();

#[rustfmt::skip]
const fn fcode_table() -> [FCode; 16] {
    use AddressType::*;
    use MasterRequest as Req;
    use SlaveFrameDestination as Dst;
    use SlaveFrameSource as Src;
    use SlaveResponse as Rsp;
    [
        row(0,  Logical,     Req::ProcessData,        Src::SubscribedSource, 16,  Rsp::ProcessData,        Dst::SubscribedSinks),
        row(1,  Logical,     Req::ProcessData,        Src::SubscribedSource, 32,  Rsp::ProcessData,        Dst::SubscribedSinks),
        row(2,  Logical,     Req::ProcessData,        Src::SubscribedSource, 64,  Rsp::ProcessData,        Dst::SubscribedSinks),
        row(3,  Logical,     Req::ProcessData,        Src::SubscribedSource, 128, Rsp::ProcessData,        Dst::SubscribedSinks),
        row(4,  Logical,     Req::ProcessData,        Src::SubscribedSource, 256, Rsp::ProcessData,        Dst::SubscribedSinks),
        row(5,  None,        Req::Reserved,           Src::None,             0,   Rsp::None,               Dst::None),
        row(6,  None,        Req::Reserved,           Src::None,             0,   Rsp::None,               Dst::None),
        row(7,  None,        Req::Reserved,           Src::None,             0,   Rsp::None,               Dst::None),
        row(8,  Device,      Req::MastershipTransfer, Src::ProposedMaster,   16,  Rsp::MastershipTransfer, Dst::Master),
        row(9,  AllDevices,  Req::GeneralEvent,       Src::DeviceGroup,      16,  Rsp::EventIdentifier,    Dst::Master),
        row(10, Device,      Req::Reserved,           Src::None,             0,   Rsp::None,               Dst::None),
        row(11, Device,      Req::Reserved,           Src::None,             0,   Rsp::None,               Dst::None),
        row(12, Device,      Req::MessageData,        Src::Single,           256, Rsp::MessageData,        Dst::SelectedDevices),
        row(13, DeviceGroup, Req::GroupEvent,         Src::DeviceGroup,      16,  Rsp::EventIdentifier,    Dst::Master),
        row(14, Device,      Req::SingleEvent,        Src::Single,           16,  Rsp::EventIdentifier,    Dst::Master),
        row(15, Device,      Req::DeviceStatus,       Src::Single,           16,  Rsp::DeviceStatus,       Dst::MasterOrMonitor),
    ]
}

/// Faults raised while interpreting frames as telegrams.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TelegramError {
    #[error("FramingError: master frame should be 3 bytes, got {0}")]
    MasterLength(usize),

    #[error("FramingError: {0} bytes is not a valid slave frame length")]
    SlaveLength(usize),

    #[error("FramingError: slave payload of {got} bytes does not satisfy F-code {fcode} ({expected} bytes)")]
    SlavePayloadLength {
        fcode: u8,
        expected: usize,
        got: usize,
    },

    #[error("FramingError: device status payload should be 2 bytes, got {0}")]
    StatusLength(usize),

    #[error(transparent)]
    Crc(#[from] CrcMismatch),
}

/// A decoded master frame: what is being asked of whom. (§3.4.1.1)
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct MasterFrame {
    /// Time of the originating frame's Start Bit.
    pub t: f64,

    pub fcode: &'static FCode,

    /// 12-bit port or device address, read per `fcode.address_type`.
    pub address: u16,
}

impl MasterFrame {
    /// Parses the three post-delimiter bytes of a master frame.
    /// (§3.4.1.1, §3.5.2.1)
    #[bitmatch]
    pub fn parse(t: f64, bytes: &[u8]) -> Result<MasterFrame, TelegramError> {
        if bytes.len() != 3 {
            return Err(TelegramError::MasterLength(bytes.len()));
        }
        crc::verify(&bytes[..2], bytes[2])?;

        #[bitmatch]
        let "ffff_aaaa" = bytes[0];
        Ok(MasterFrame {
            t,
            fcode: &FCODES[f as usize],
            address: (a as u16) << 8 | bytes[1] as u16,
        })
    }
}

impl fmt::Display for MasterFrame {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "MASTER [{}] -> ", self.fcode.master_request.name())?;
        match self.fcode.address_type {
            // reserved codes carry no address
            AddressType::None => Ok(()),
            AddressType::Logical => write!(f, "[port 0x{:03x}]", self.address),
            _ => write!(f, "[physical 0x{:03x}]", self.address),
        }
    }
}

/// A slave frame this decoder has no dedicated interpretation for.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct SlaveFrame {
    pub data: Vec<u8>,
}

impl fmt::Display for SlaveFrame {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "SLAVE ?? ({:2}b)", self.data.len())
    }
}

/// Reply carried on a Process Data telegram. (§3.5.4.1)
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ProcessDataResponse {
    /// Time of the polling master frame.
    pub t: f64,

    /// Port the variable is published on.
    pub port: u16,

    pub data: Vec<u8>,
}

impl fmt::Display for ProcessDataResponse {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "SLAVE ({:2}b): 0x", self.data.len())?;
        for byte in &self.data {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

/// Reply carried on a Message Data telegram. (§3.5.4.2)
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct MessageDataResponse {
    pub device_address: u16,
    pub data: Vec<u8>,
}

impl fmt::Display for MessageDataResponse {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "SLAVE MessageDataResponse {} bytes", self.data.len())
    }
}

/// Device_Status word of the addressed device. (§3.6.4.1.1)
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct DeviceStatusResponse {
    pub device_address: u16,
    pub sp: bool,
    pub ba: bool,
    pub gw: bool,
    pub md: bool,
    pub class_specific: [bool; 4],
    pub lat: bool,
    pub rld: bool,
    pub ssd: bool,
    pub sdd: bool,
    pub erd: bool,
    pub frc: bool,
    pub dnr: bool,
    pub ser: bool,
}

impl DeviceStatusResponse {
    fn parse(device_address: u16, data: &[u8]) -> Result<DeviceStatusResponse, TelegramError> {
        if data.len() != 2 {
            return Err(TelegramError::StatusLength(data.len()));
        }
        let bits = data.view_bits::<Msb0>();
        Ok(DeviceStatusResponse {
            device_address,
            sp: bits[0],
            ba: bits[1],
            gw: bits[2],
            md: bits[3],
            class_specific: [bits[4], bits[5], bits[6], bits[7]],
            lat: bits[8],
            rld: bits[9],
            ssd: bits[10],
            sdd: bits[11],
            erd: bits[12],
            frc: bits[13],
            dnr: bits[14],
            ser: bits[15],
        })
    }
}

impl fmt::Display for DeviceStatusResponse {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let b = |v: bool| v as u8;
        write!(
            f,
            "SLAVE DeviceStatus SP={} BA={} GW={} MD={} class={}{}{}{} \
             LAT={} RLD={} SSD={} SDD={} ERD={} FRC={} DNR={} SER={}",
            b(self.sp),
            b(self.ba),
            b(self.gw),
            b(self.md),
            b(self.class_specific[0]),
            b(self.class_specific[1]),
            b(self.class_specific[2]),
            b(self.class_specific[3]),
            b(self.lat),
            b(self.rld),
            b(self.ssd),
            b(self.sdd),
            b(self.erd),
            b(self.frc),
            b(self.dnr),
            b(self.ser),
        )
    }
}

/// Everything a slave frame can decode to, keyed by what the master asked
/// for. (§3.5.4)
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum SlaveReply {
    ProcessData(ProcessDataResponse),
    MessageData(MessageDataResponse),
    DeviceStatus(DeviceStatusResponse),
    Unknown(SlaveFrame),
}

impl fmt::Display for SlaveReply {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SlaveReply::ProcessData(reply) => reply.fmt(f),
            SlaveReply::MessageData(reply) => reply.fmt(f),
            SlaveReply::DeviceStatus(reply) => reply.fmt(f),
            SlaveReply::Unknown(reply) => reply.fmt(f),
        }
    }
}

/// A fully decoded master/slave exchange.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Telegram {
    pub master: MasterFrame,
    pub reply: Option<SlaveReply>,
}

impl Telegram {
    /// Interprets a pairing record produced by
    /// [`Pairs`](crate::iter::Pairs).
    pub fn from_pair(pair: &PairedFrames) -> Result<Telegram, TelegramError> {
        Telegram::parse(
            pair.master.t_start,
            &pair.master.bytes,
            pair.slave.as_ref().map(|slave| slave.bytes.as_slice()),
        )
    }

    /// Interprets a row of an intermediate frame dump.
    pub fn from_record(record: &Record) -> Result<Telegram, TelegramError> {
        Telegram::parse(record.t, &record.master, record.slave.as_deref())
    }

    pub fn parse(t: f64, master: &[u8], slave: Option<&[u8]>) -> Result<Telegram, TelegramError> {
        let master = MasterFrame::parse(t, master)?;
        let reply = match slave {
            Some(bytes) => Some(parse_slave_frame(bytes, &master)?),
            None => None,
        };
        Ok(Telegram { master, reply })
    }
}

/// Check-sequence block spans for each permitted raw slave frame length:
/// `(a, b)` covers the data slice `bytes[a..b]` with the check byte at
/// `bytes[b]`. (§3.4.1.2)
fn slave_blocks(len: usize) -> Option<&'static [(usize, usize)]> {
    Some(match len {
        3 => &[(0, 2)],
        5 => &[(0, 4)],
        9 => &[(0, 8)],
        18 => &[(0, 8), (9, 17)],
        36 => &[(0, 8), (9, 17), (18, 26), (27, 35)],
        _ => return None,
    })
}

/// Interprets a slave frame in the context of the master frame it answers.
/// (§3.4.1.2, §3.5.4)
pub fn parse_slave_frame(bytes: &[u8], master: &MasterFrame) -> Result<SlaveReply, TelegramError> {
    let blocks = slave_blocks(bytes.len()).ok_or(TelegramError::SlaveLength(bytes.len()))?;
    let mut data = Vec::with_capacity(bytes.len() - blocks.len());
    for &(a, b) in blocks {
        crc::verify(&bytes[a..b], bytes[b])?;
        data.extend_from_slice(&bytes[a..b]);
    }

    let expected = master.fcode.slave_frame_size as usize / 8;
    if data.len() != expected {
        return Err(TelegramError::SlavePayloadLength {
            fcode: master.fcode.n,
            expected,
            got: data.len(),
        });
    }

    Ok(match master.fcode.master_request {
        MasterRequest::ProcessData => SlaveReply::ProcessData(ProcessDataResponse {
            t: master.t,
            port: master.address,
            data,
        }),
        MasterRequest::MessageData => SlaveReply::MessageData(MessageDataResponse {
            device_address: master.address,
            data,
        }),
        MasterRequest::DeviceStatus => {
            SlaveReply::DeviceStatus(DeviceStatusResponse::parse(master.address, &data)?)
        }
        _ => SlaveReply::Unknown(SlaveFrame { data }),
    })
}


#[cfg(test)]
mod device_status {
    use super::*;

    #[test]
    fn splits_both_flag_bytes_msb_first() {
        let status = DeviceStatusResponse::parse(0x100, &[0x33, 0x55]).unwrap();
        assert!(!status.sp && !status.ba && status.gw && status.md);
        assert_eq!(status.class_specific, [false, false, true, true]);
        assert!(!status.lat && status.rld && !status.ssd && status.sdd);
        assert!(!status.erd && status.frc && !status.dnr && status.ser);
    }

    #[test]
    fn rejects_odd_payload_sizes() {
        assert_eq!(
            DeviceStatusResponse::parse(0, &[0x33]),
            Err(TelegramError::StatusLength(1))
        );
    }
}
