//! Telegram interpretation tests over intermediate dump rows.

use mvb::{
    check_sequence, AddressType, MasterRequest, Record, SlaveReply, Telegram, TelegramError,
    FCODES,
};

fn master_bytes(b0: u8, b1: u8) -> Vec<u8> {
    vec![b0, b1, check_sequence(&[b0, b1])]
}

fn slave_bytes(data: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::new();
    for block in data.chunks(8) {
        bytes.extend_from_slice(block);
        bytes.push(check_sequence(block));
    }
    bytes
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|byte| format!("{:02x}", byte)).collect()
}

fn row(t: &str, master: &[u8], slave: Option<&[u8]>) -> Record {
    format!("{},{},{}", t, hex(master), slave.map(hex).unwrap_or_default())
        .parse()
        .unwrap()
}

#[test]
fn process_data_telegram() {
    let record = row(
        "0.000123",
        &master_bytes(0x0f, 0x21),
        Some(&slave_bytes(&[0xab, 0xcd])),
    );
    let telegram = Telegram::from_record(&record).unwrap();

    assert_eq!(telegram.master.fcode, &FCODES[0]);
    assert_eq!(telegram.master.fcode.master_request, MasterRequest::ProcessData);
    assert_eq!(telegram.master.address, 0xf21);
    assert!((telegram.master.t - 0.000123).abs() < 1e-12);

    match telegram.reply.unwrap() {
        SlaveReply::ProcessData(reply) => {
            assert_eq!(reply.port, 0xf21);
            assert_eq!(reply.data, vec![0xab, 0xcd]);
            assert!((reply.t - 0.000123).abs() < 1e-12);
        }
        other => panic!("expected process data, got {:?}", other),
    }
}

#[test]
fn message_data_telegram() {
    let data: Vec<u8> = (0x10..0x30).collect();
    let record = row("1.0", &master_bytes(0xc0, 0x34), Some(&slave_bytes(&data)));
    let telegram = Telegram::from_record(&record).unwrap();

    assert_eq!(telegram.master.fcode.n, 12);
    assert_eq!(telegram.master.fcode.master_request, MasterRequest::MessageData);
    assert_eq!(telegram.master.address, 0x034);

    match telegram.reply.unwrap() {
        SlaveReply::MessageData(reply) => {
            assert_eq!(reply.device_address, 0x034);
            assert_eq!(reply.data, data);
        }
        other => panic!("expected message data, got {:?}", other),
    }
}

#[test]
fn device_status_telegram() {
    let record = row(
        "2.5",
        &master_bytes(0xf1, 0x00),
        Some(&slave_bytes(&[0x33, 0x55])),
    );
    let telegram = Telegram::from_record(&record).unwrap();

    assert_eq!(telegram.master.fcode.master_request, MasterRequest::DeviceStatus);
    assert_eq!(telegram.master.address, 0x100);

    match telegram.reply.unwrap() {
        SlaveReply::DeviceStatus(status) => {
            assert_eq!(status.device_address, 0x100);
            assert!(!status.sp && !status.ba && status.gw && status.md);
            assert_eq!(status.class_specific, [false, false, true, true]);
            assert!(!status.lat && status.rld && !status.ssd && status.sdd);
            assert!(!status.erd && status.frc && !status.dnr && status.ser);
        }
        other => panic!("expected device status, got {:?}", other),
    }
}

#[test]
fn reserved_code_master_without_reply() {
    let record = row("0.5", &master_bytes(0x50, 0x00), None);
    let telegram = Telegram::from_record(&record).unwrap();

    assert_eq!(telegram.master.fcode.master_request, MasterRequest::Reserved);
    assert_eq!(telegram.master.fcode.address_type, AddressType::None);
    assert!(telegram.reply.is_none());
}

#[test]
fn unhandled_request_yields_a_generic_reply() {
    // mastership transfer replies are carried through undecoded
    let record = row(
        "0.5",
        &master_bytes(0x80, 0x42),
        Some(&slave_bytes(&[0xaa, 0xbb])),
    );
    let telegram = Telegram::from_record(&record).unwrap();

    assert_eq!(
        telegram.master.fcode.master_request,
        MasterRequest::MastershipTransfer
    );
    match telegram.reply.unwrap() {
        SlaveReply::Unknown(frame) => assert_eq!(frame.data, vec![0xaa, 0xbb]),
        other => panic!("expected a generic slave frame, got {:?}", other),
    }
}

#[test]
fn payload_size_must_match_the_fcode() {
    // F-code 12 expects 256 bits; a 9-byte slave frame carries only 64
    let record = row(
        "1.0",
        &master_bytes(0xc0, 0x34),
        Some(&slave_bytes(&[1, 2, 3, 4, 5, 6, 7, 8])),
    );
    assert_eq!(
        Telegram::from_record(&record),
        Err(TelegramError::SlavePayloadLength {
            fcode: 12,
            expected: 32,
            got: 8,
        })
    );
}

#[test]
fn master_check_sequence_is_enforced() {
    let mut master = master_bytes(0x0f, 0x21);
    master[2] ^= 0x40;
    let record = row("0.1", &master, None);
    assert!(matches!(
        Telegram::from_record(&record),
        Err(TelegramError::Crc(_))
    ));
}

#[test]
fn slave_check_sequence_is_enforced() {
    let mut slave = slave_bytes(&[1, 2, 3, 4, 5, 6, 7, 8]);
    let last = slave.len() - 1;
    slave[last] ^= 0xff;
    let record = row("0.1", &master_bytes(0x2f, 0x00), Some(&slave));
    assert!(matches!(
        Telegram::from_record(&record),
        Err(TelegramError::Crc(_))
    ));
}

#[test]
fn frame_lengths_are_enforced() {
    let record = row("0.1", &[0x0f, 0x21, 0xa5, 0x00], None);
    assert_eq!(
        Telegram::from_record(&record),
        Err(TelegramError::MasterLength(4))
    );

    let record = row("0.1", &master_bytes(0x0f, 0x21), Some(&[0u8; 7]));
    assert_eq!(
        Telegram::from_record(&record),
        Err(TelegramError::SlaveLength(7))
    );
}

#[test]
fn telegram_log_rendering() {
    let record = row(
        "0.000123",
        &master_bytes(0x0f, 0x21),
        Some(&slave_bytes(&[0xab, 0xcd])),
    );
    let telegram = Telegram::from_record(&record).unwrap();

    assert_eq!(
        telegram.master.to_string(),
        "MASTER [PROCESS_DATA] -> [port 0xf21]"
    );
    assert_eq!(
        telegram.reply.unwrap().to_string(),
        "SLAVE ( 2b): 0xabcd"
    );

    let record = row("0.5", &master_bytes(0xf1, 0x00), None);
    let telegram = Telegram::from_record(&record).unwrap();
    assert_eq!(
        telegram.master.to_string(),
        "MASTER [DEVICE_STATUS] -> [physical 0x100]"
    );

    // reserved codes elide the address entirely
    let record = row("0.5", &master_bytes(0x50, 0x00), None);
    let telegram = Telegram::from_record(&record).unwrap();
    assert_eq!(telegram.master.to_string(), "MASTER [RESERVED] -> ");
}
