//! EventFifo wire format.
//!
//! Every record is an 8-byte header, a static payload whose size is fixed by the packet type,
//! and a dynamic payload padded with zeros to a 4-byte boundary. All multi-byte header and
//! static fields are little-endian.
//!
//! | bytes | field                                            |
//! |-------|--------------------------------------------------|
//! | 0-1   | record length in 32-bit words, header included   |
//! | 2     | packet type                                      |
//! | 3     | reserved, zero                                   |
//! | 4-7   | device microsecond counter                       |
use byteorder::{BigEndian, ByteOrder, LittleEndian, ReadBytesExt};
use num_enum::TryFromPrimitive;
use std::convert::TryFrom;
use std::io::{self, Cursor};

pub const HEADER_LEN: usize = 8;

#[derive(Copy, Clone, PartialEq, Eq, Debug, TryFromPrimitive)]
#[repr(u8)]
pub enum PacketType {
    /// Parser sentinel, never valid on the wire
    Invalid = 0x00,
    TxRampUp = 0x01,
    TxRampDown = 0x02,
    InventoryRoundSummary = 0x03,
    QChanged = 0x04,
    TagRead = 0x05,
    Gen2Transaction = 0x06,
    ContinuousInventorySummary = 0x07,
    HelloWorld = 0x08,
    Custom = 0x09,
    PowerControlLoopSummary = 0x0A,
    AggregateOpSummary = 0x0B,
    Halted = 0x0C,
    MeasureRssiSummary = 0x0D,
    SjcMeasurement = 0x0E,
    WriteProfileData = 0x0F,
    DebugMessage = 0x10,
}

impl PacketType {
    /// Size of the static payload that follows the header
    pub fn static_len(self) -> usize {
        match self {
            PacketType::Invalid => 0,
            PacketType::TxRampUp => 4,
            PacketType::TxRampDown => 4,
            PacketType::InventoryRoundSummary => 20,
            PacketType::QChanged => 12,
            PacketType::TagRead => 8,
            PacketType::Gen2Transaction => 4,
            PacketType::ContinuousInventorySummary => 16,
            PacketType::HelloWorld => 4,
            PacketType::Custom => 4,
            PacketType::PowerControlLoopSummary => 8,
            PacketType::AggregateOpSummary => 12,
            PacketType::Halted => 4,
            PacketType::MeasureRssiSummary => 8,
            PacketType::SjcMeasurement => 16,
            PacketType::WriteProfileData => 4,
            PacketType::DebugMessage => 4,
        }
    }
}

/// Why the transmitter was ramped down
#[derive(Copy, Clone, PartialEq, Eq, Debug, TryFromPrimitive)]
#[repr(u32)]
pub enum TxRampDownReason {
    Host = 1,
    Regulatory = 2,
}

/// Why an inventory round ended
#[derive(Copy, Clone, PartialEq, Eq, Debug, TryFromPrimitive)]
#[repr(u8)]
pub enum RoundSummaryReason {
    /// The round finished singulating
    Done = 1,
    Host = 2,
    /// Dwell time expired part way through the round
    Regulatory = 3,
    EventFifoFull = 4,
    TxNotRampedUp = 5,
    InvalidParam = 6,
    LmacOverload = 7,
}

/// Why a continuous inventory run ended
#[derive(Copy, Clone, PartialEq, Eq, Debug, TryFromPrimitive)]
#[repr(u8)]
pub enum StopReason {
    None = 0,
    Host = 1,
    MaxNumberOfRounds = 2,
    MaxNumberOfTags = 3,
    MaxDuration = 4,
    OpError = 5,
    SdkTimeoutError = 6,
    DeviceCommandError = 7,
}

#[derive(Copy, Clone, PartialEq, Eq, Debug, TryFromPrimitive)]
#[repr(u8)]
pub enum TagReadType {
    EpcOnly = 0,
    EpcWithTid = 1,
    EpcWithFastIdTid = 2,
}

#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub struct TxRampUp {
    pub carrier_frequency: u32,
}

impl TxRampUp {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![0u8; 4];
        LittleEndian::write_u32(&mut out, self.carrier_frequency);
        out
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub struct TxRampDown {
    pub reason: u32,
}

impl TxRampDown {
    pub fn ramp_down_reason(&self) -> Option<TxRampDownReason> {
        TxRampDownReason::try_from(self.reason).ok()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![0u8; 4];
        LittleEndian::write_u32(&mut out, self.reason);
        out
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub struct InventoryRoundSummary {
    pub duration_us: u32,
    pub total_slots: u32,
    pub num_slots: u16,
    pub empty_slots: u16,
    pub single_slots: u16,
    pub collided_slots: u16,
    pub reason: u8,
    /// Q value the round ended on
    pub final_q: u8,
    pub min_q_count: u8,
    pub queries_since_valid_epc_count: u8,
}

impl InventoryRoundSummary {
    pub fn round_reason(&self) -> Option<RoundSummaryReason> {
        RoundSummaryReason::try_from(self.reason).ok()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![0u8; 20];
        LittleEndian::write_u32(&mut out[0..4], self.duration_us);
        LittleEndian::write_u32(&mut out[4..8], self.total_slots);
        LittleEndian::write_u16(&mut out[8..10], self.num_slots);
        LittleEndian::write_u16(&mut out[10..12], self.empty_slots);
        LittleEndian::write_u16(&mut out[12..14], self.single_slots);
        LittleEndian::write_u16(&mut out[14..16], self.collided_slots);
        out[16] = self.reason;
        out[17] = self.final_q;
        out[18] = self.min_q_count;
        out[19] = self.queries_since_valid_epc_count;
        out
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub struct QChanged {
    pub num_slots: u16,
    pub empty_slots: u16,
    pub single_slots: u16,
    pub collided_slots: u16,
    pub q_value: u8,
    pub sent_query: u8,
}

impl QChanged {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![0u8; 12];
        LittleEndian::write_u16(&mut out[0..2], self.num_slots);
        LittleEndian::write_u16(&mut out[2..4], self.empty_slots);
        LittleEndian::write_u16(&mut out[4..6], self.single_slots);
        LittleEndian::write_u16(&mut out[6..8], self.collided_slots);
        out[8] = self.q_value;
        out[9] = self.sent_query;
        out
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub struct TagRead {
    /// Uncompensated RSSI as reported by the modem
    pub rssi: u16,
    pub rx_gain_settings: u16,
    pub read_type: u8,
    /// Byte offset of the TID within the dynamic payload
    pub tid_offset: u8,
    pub halted_on_tag: u8,
    /// Logical length of the dynamic payload in bytes
    pub payload_len: u8,
}

impl TagRead {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![0u8; 8];
        LittleEndian::write_u16(&mut out[0..2], self.rssi);
        LittleEndian::write_u16(&mut out[2..4], self.rx_gain_settings);
        out[4] = self.read_type;
        out[5] = self.tid_offset;
        out[6] = self.halted_on_tag;
        out[7] = self.payload_len;
        out
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub struct Gen2Transaction {
    pub status: u8,
    pub transaction_id: u8,
    /// Number of reply bits in the dynamic payload
    pub num_bits: u16,
}

impl Gen2Transaction {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![self.status, self.transaction_id, 0, 0];
        LittleEndian::write_u16(&mut out[2..4], self.num_bits);
        out
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub struct ContinuousInventorySummary {
    pub duration_us: u32,
    pub number_of_inventory_rounds: u32,
    pub number_of_tags: u32,
    pub reason: u8,
    pub last_op_id: u8,
    pub last_op_error: u8,
}

impl ContinuousInventorySummary {
    pub fn stop_reason(&self) -> Option<StopReason> {
        StopReason::try_from(self.reason).ok()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![0u8; 16];
        LittleEndian::write_u32(&mut out[0..4], self.duration_us);
        LittleEndian::write_u32(&mut out[4..8], self.number_of_inventory_rounds);
        LittleEndian::write_u32(&mut out[8..12], self.number_of_tags);
        out[12] = self.reason;
        out[13] = self.last_op_id;
        out[14] = self.last_op_error;
        out
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub struct HelloWorld {
    pub sku: u16,
    pub reset_reason: u8,
    pub crash_info_conditional: u8,
}

impl HelloWorld {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![0u8; 4];
        LittleEndian::write_u16(&mut out[0..2], self.sku);
        out[2] = self.reset_reason;
        out[3] = self.crash_info_conditional;
        out
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub struct Custom {
    /// Dynamic payload length in 32-bit words
    pub payload_len: u16,
}

impl Custom {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![0u8; 4];
        LittleEndian::write_u16(&mut out[0..2], self.payload_len);
        out
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub struct Halted {
    pub halted_handle: u16,
}

impl Halted {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![0u8; 4];
        LittleEndian::write_u16(&mut out[0..2], self.halted_handle);
        out
    }
}

/// Static payload interpreted according to the packet type.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum PacketData {
    Invalid,
    TxRampUp(TxRampUp),
    TxRampDown(TxRampDown),
    InventoryRoundSummary(InventoryRoundSummary),
    QChanged(QChanged),
    TagRead(TagRead),
    Gen2Transaction(Gen2Transaction),
    ContinuousInventorySummary(ContinuousInventorySummary),
    HelloWorld(HelloWorld),
    Custom(Custom),
    Halted(Halted),
    /// Calibration and diagnostic packets, passed through as raw bytes
    Opaque,
}

impl PacketData {
    /// Decode a static payload. Fails if `static_data` is shorter than the type's layout.
    fn parse(packet_type: PacketType, static_data: &[u8]) -> io::Result<PacketData> {
        let mut r = Cursor::new(static_data);
        Ok(match packet_type {
            PacketType::Invalid => PacketData::Invalid,
            PacketType::TxRampUp => PacketData::TxRampUp(TxRampUp {
                carrier_frequency: r.read_u32::<LittleEndian>()?,
            }),
            PacketType::TxRampDown => PacketData::TxRampDown(TxRampDown {
                reason: r.read_u32::<LittleEndian>()?,
            }),
            PacketType::InventoryRoundSummary => {
                PacketData::InventoryRoundSummary(InventoryRoundSummary {
                    duration_us: r.read_u32::<LittleEndian>()?,
                    total_slots: r.read_u32::<LittleEndian>()?,
                    num_slots: r.read_u16::<LittleEndian>()?,
                    empty_slots: r.read_u16::<LittleEndian>()?,
                    single_slots: r.read_u16::<LittleEndian>()?,
                    collided_slots: r.read_u16::<LittleEndian>()?,
                    reason: r.read_u8()?,
                    final_q: r.read_u8()?,
                    min_q_count: r.read_u8()?,
                    queries_since_valid_epc_count: r.read_u8()?,
                })
            }
            PacketType::QChanged => PacketData::QChanged(QChanged {
                num_slots: r.read_u16::<LittleEndian>()?,
                empty_slots: r.read_u16::<LittleEndian>()?,
                single_slots: r.read_u16::<LittleEndian>()?,
                collided_slots: r.read_u16::<LittleEndian>()?,
                q_value: r.read_u8()?,
                sent_query: r.read_u8()?,
            }),
            PacketType::TagRead => PacketData::TagRead(TagRead {
                rssi: r.read_u16::<LittleEndian>()?,
                rx_gain_settings: r.read_u16::<LittleEndian>()?,
                read_type: r.read_u8()?,
                tid_offset: r.read_u8()?,
                halted_on_tag: r.read_u8()?,
                payload_len: r.read_u8()?,
            }),
            PacketType::Gen2Transaction => PacketData::Gen2Transaction(Gen2Transaction {
                status: r.read_u8()?,
                transaction_id: r.read_u8()?,
                num_bits: r.read_u16::<LittleEndian>()?,
            }),
            PacketType::ContinuousInventorySummary => {
                PacketData::ContinuousInventorySummary(ContinuousInventorySummary {
                    duration_us: r.read_u32::<LittleEndian>()?,
                    number_of_inventory_rounds: r.read_u32::<LittleEndian>()?,
                    number_of_tags: r.read_u32::<LittleEndian>()?,
                    reason: r.read_u8()?,
                    last_op_id: r.read_u8()?,
                    last_op_error: r.read_u8()?,
                })
            }
            PacketType::HelloWorld => PacketData::HelloWorld(HelloWorld {
                sku: r.read_u16::<LittleEndian>()?,
                reset_reason: r.read_u8()?,
                crash_info_conditional: r.read_u8()?,
            }),
            PacketType::Custom => PacketData::Custom(Custom {
                payload_len: r.read_u16::<LittleEndian>()?,
            }),
            PacketType::Halted => PacketData::Halted(Halted {
                halted_handle: r.read_u16::<LittleEndian>()?,
            }),
            _ => PacketData::Opaque,
        })
    }

    /// Packet type a typed payload is carried in. `None` for `Invalid` and `Opaque`.
    pub fn packet_type(&self) -> Option<PacketType> {
        match self {
            PacketData::TxRampUp(_) => Some(PacketType::TxRampUp),
            PacketData::TxRampDown(_) => Some(PacketType::TxRampDown),
            PacketData::InventoryRoundSummary(_) => Some(PacketType::InventoryRoundSummary),
            PacketData::QChanged(_) => Some(PacketType::QChanged),
            PacketData::TagRead(_) => Some(PacketType::TagRead),
            PacketData::Gen2Transaction(_) => Some(PacketType::Gen2Transaction),
            PacketData::ContinuousInventorySummary(_) => {
                Some(PacketType::ContinuousInventorySummary)
            }
            PacketData::HelloWorld(_) => Some(PacketType::HelloWorld),
            PacketData::Custom(_) => Some(PacketType::Custom),
            PacketData::Halted(_) => Some(PacketType::Halted),
            PacketData::Invalid | PacketData::Opaque => None,
        }
    }

    /// Encode the static payload. `None` for `Invalid` and `Opaque`.
    pub fn to_bytes(&self) -> Option<Vec<u8>> {
        Some(match self {
            PacketData::TxRampUp(d) => d.to_bytes(),
            PacketData::TxRampDown(d) => d.to_bytes(),
            PacketData::InventoryRoundSummary(d) => d.to_bytes(),
            PacketData::QChanged(d) => d.to_bytes(),
            PacketData::TagRead(d) => d.to_bytes(),
            PacketData::Gen2Transaction(d) => d.to_bytes(),
            PacketData::ContinuousInventorySummary(d) => d.to_bytes(),
            PacketData::HelloWorld(d) => d.to_bytes(),
            PacketData::Custom(d) => d.to_bytes(),
            PacketData::Halted(d) => d.to_bytes(),
            PacketData::Invalid | PacketData::Opaque => return None,
        })
    }
}

/// Logical dynamic payload length carried in the static payload, if the type has one.
fn declared_payload_len(packet_type: PacketType, data: &PacketData, static_data: &[u8]) -> Option<usize> {
    match (packet_type, data) {
        (_, PacketData::TagRead(t)) => Some(usize::from(t.payload_len)),
        (_, PacketData::Gen2Transaction(t)) => Some((usize::from(t.num_bits) + 7) / 8),
        (_, PacketData::Custom(c)) => Some(usize::from(c.payload_len) * 4),
        (PacketType::DebugMessage, _) => Some(usize::from(LittleEndian::read_u16(&static_data[0..2]))),
        (PacketType::WriteProfileData, _) => {
            Some(usize::from(LittleEndian::read_u16(&static_data[2..4])))
        }
        (_, PacketData::Opaque) => None,
        _ => Some(0),
    }
}

fn padded(len: usize) -> usize {
    (len + 3) / 4 * 4
}

/// A decoded EventFifo record borrowing the buffer it was parsed from.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct Packet<'a> {
    pub packet_type: PacketType,
    pub us_counter: u32,
    pub data: PacketData,
    pub static_data: &'a [u8],
    /// Dynamic payload including padding
    pub dynamic_data: &'a [u8],
}

impl<'a> Packet<'a> {
    pub fn invalid() -> Packet<'static> {
        Packet {
            packet_type: PacketType::Invalid,
            us_counter: 0,
            data: PacketData::Invalid,
            static_data: &[],
            dynamic_data: &[],
        }
    }

    pub fn is_valid(&self) -> bool {
        self.packet_type != PacketType::Invalid
    }

    /// Dynamic payload without padding
    pub fn payload(&self) -> &'a [u8] {
        match declared_payload_len(self.packet_type, &self.data, self.static_data) {
            Some(len) if len <= self.dynamic_data.len() => &self.dynamic_data[..len],
            _ => self.dynamic_data,
        }
    }

    /// True when every byte between the payload and the end of the record is zero.
    pub fn padding_is_zero(&self) -> bool {
        self.dynamic_data[self.payload().len()..]
            .iter()
            .all(|b| *b == 0)
    }

    /// Total record length on the wire
    pub fn byte_len(&self) -> usize {
        HEADER_LEN + self.static_data.len() + self.dynamic_data.len()
    }

    /// Re-encode the record.
    pub fn to_bytes(&self) -> Vec<u8> {
        encode_packet(
            self.packet_type,
            self.us_counter,
            self.static_data,
            self.dynamic_data,
        )
    }

    /// Split a `TagRead` payload into its Gen2 fields.
    pub fn tag_read_fields(&self) -> Option<TagReadFields<'a>> {
        match self.data {
            PacketData::TagRead(ref t) => TagReadFields::from_payload(t, self.payload()),
            _ => None,
        }
    }
}

/// Build a wire record, zero padding the dynamic payload to a 4-byte boundary.
///
/// `static_data` is expected to be `packet_type.static_len()` bytes.
pub fn encode_packet(
    packet_type: PacketType,
    us_counter: u32,
    static_data: &[u8],
    dynamic_data: &[u8],
) -> Vec<u8> {
    let total = HEADER_LEN + static_data.len() + padded(dynamic_data.len());
    let dynamic_at = HEADER_LEN + static_data.len();
    let mut out = vec![0u8; total];
    LittleEndian::write_u16(&mut out[0..2], (total / 4) as u16);
    out[2] = packet_type as u8;
    LittleEndian::write_u32(&mut out[4..8], us_counter);
    out[HEADER_LEN..dynamic_at].copy_from_slice(static_data);
    out[dynamic_at..dynamic_at + dynamic_data.len()].copy_from_slice(dynamic_data);
    out
}

/// Decode the record at the front of `span`.
///
/// A malformed record yields [`Packet::invalid`] and an empty remainder, so the rest of the
/// span is dropped.
pub fn parse(span: &[u8]) -> (Packet<'_>, &[u8]) {
    let invalid = (Packet::invalid(), &span[span.len()..]);
    if span.len() < HEADER_LEN || span[3] != 0 {
        return invalid;
    }
    let total = usize::from(LittleEndian::read_u16(&span[0..2])) * 4;
    let packet_type = match PacketType::try_from(span[2]) {
        Ok(PacketType::Invalid) | Err(_) => return invalid,
        Ok(t) => t,
    };
    let static_len = packet_type.static_len();
    if total < HEADER_LEN + static_len || total > span.len() {
        return invalid;
    }
    let us_counter = LittleEndian::read_u32(&span[4..8]);
    let static_data = &span[HEADER_LEN..HEADER_LEN + static_len];
    let dynamic_data = &span[HEADER_LEN + static_len..total];
    let data = match PacketData::parse(packet_type, static_data) {
        Ok(data) => data,
        Err(_) => return invalid,
    };
    if let Some(len) = declared_payload_len(packet_type, &data, static_data) {
        if padded(len) != dynamic_data.len() {
            return invalid;
        }
    }
    let packet = Packet {
        packet_type,
        us_counter,
        data,
        static_data,
        dynamic_data,
    };
    (packet, &span[total..])
}

/// Iterator over the records in a span. Yields an invalid packet at most once, then stops.
pub struct Packets<'a> {
    span: &'a [u8],
}

impl<'a> Iterator for Packets<'a> {
    type Item = Packet<'a>;

    fn next(&mut self) -> Option<Packet<'a>> {
        if self.span.is_empty() {
            return None;
        }
        let (packet, rest) = parse(self.span);
        self.span = rest;
        Some(packet)
    }
}

pub fn packets(span: &[u8]) -> Packets<'_> {
    Packets { span }
}

/// Gen2 fields carried by a `TagRead` payload.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct TagReadFields<'a> {
    pub pc: u16,
    pub xpc_w1: Option<u16>,
    pub xpc_w2: Option<u16>,
    pub epc: &'a [u8],
    pub tid: Option<&'a [u8]>,
}

const PC_XI: u16 = 0x0200;
const XPC_W1_XEB: u16 = 0x8000;

impl<'a> TagReadFields<'a> {
    /// The payload is the backscattered PC word, XPC words when the PC (and XPC W1) announce
    /// them, then the EPC. A TID, when read, starts at `tid_offset`.
    fn from_payload(tag_read: &TagRead, payload: &'a [u8]) -> Option<TagReadFields<'a>> {
        let word = |at: usize| -> Option<u16> {
            payload.get(at..at + 2).map(BigEndian::read_u16)
        };
        let pc = word(0)?;
        let mut cursor = 2;
        let mut xpc_w1 = None;
        let mut xpc_w2 = None;
        if pc & PC_XI != 0 {
            let w1 = word(cursor)?;
            cursor += 2;
            xpc_w1 = Some(w1);
            if w1 & XPC_W1_XEB != 0 {
                xpc_w2 = Some(word(cursor)?);
                cursor += 2;
            }
        }
        let epc_len = usize::from(pc >> 11) * 2;
        let epc_end = (cursor + epc_len).min(payload.len());
        let epc = &payload[cursor..epc_end];

        let tid = match TagReadType::try_from(tag_read.read_type) {
            Ok(TagReadType::EpcWithTid) | Ok(TagReadType::EpcWithFastIdTid) => {
                let offset = usize::from(tag_read.tid_offset);
                if offset >= epc_end && offset < payload.len() {
                    Some(&payload[offset..])
                } else {
                    None
                }
            }
            _ => None,
        };
        Some(TagReadFields {
            pc,
            xpc_w1,
            xpc_w2,
            epc,
            tid,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn tag_read_payload() -> Vec<u8> {
        // PC: 6 EPC words, no XPC
        let mut payload = vec![0x30, 0x00];
        payload.extend((0..12).map(|i| 0xE0 + i as u8));
        payload
    }

    #[test]
    fn test_parse_tag_read() {
        let payload = tag_read_payload();
        let tag = TagRead {
            rssi: 0x1234,
            rx_gain_settings: 7,
            read_type: TagReadType::EpcOnly as u8,
            tid_offset: 0,
            halted_on_tag: 0,
            payload_len: payload.len() as u8,
        };
        let bytes = encode_packet(PacketType::TagRead, 1000, &tag.to_bytes(), &payload);
        assert_eq!(bytes.len(), 8 + 8 + 16);
        assert_eq!(&bytes[0..4], &[8, 0, PacketType::TagRead as u8, 0]);

        let (packet, rest) = parse(&bytes);
        assert!(rest.is_empty());
        assert_eq!(packet.us_counter, 1000);
        assert_eq!(packet.data, PacketData::TagRead(tag));
        assert_eq!(packet.payload(), &payload[..]);
        assert!(packet.padding_is_zero());
        assert_eq!(packet.to_bytes(), bytes);

        let fields = packet.tag_read_fields().unwrap();
        assert_eq!(fields.pc, 0x3000);
        assert_eq!(fields.epc, &payload[2..14]);
        assert_eq!(fields.xpc_w1, None);
        assert_eq!(fields.tid, None);
    }

    #[test]
    fn test_tag_read_with_xpc_and_tid() {
        // 2 EPC words, XI set; XPC W1 with XEB set
        let mut payload = vec![0x12, 0x00, 0x80, 0x01, 0x00, 0x02];
        payload.extend(&[0xAA, 0xBB, 0xCC, 0xDD]);
        payload.extend(&[0xE2, 0x80, 0x11, 0x00]);
        let tag = TagRead {
            read_type: TagReadType::EpcWithTid as u8,
            tid_offset: 10,
            payload_len: payload.len() as u8,
            ..TagRead::default()
        };
        let bytes = encode_packet(PacketType::TagRead, 0, &tag.to_bytes(), &payload);
        let (packet, _) = parse(&bytes);
        let fields = packet.tag_read_fields().unwrap();
        assert_eq!(fields.xpc_w1, Some(0x8001));
        assert_eq!(fields.xpc_w2, Some(0x0002));
        assert_eq!(fields.epc, &[0xAA, 0xBB, 0xCC, 0xDD]);
        assert_eq!(fields.tid, Some(&[0xE2, 0x80, 0x11, 0x00][..]));
    }

    #[test]
    fn test_multiple_packets() {
        let mut bytes = encode_packet(PacketType::TxRampUp, 1, &TxRampUp { carrier_frequency: 915_250 }.to_bytes(), &[]);
        let summary = InventoryRoundSummary {
            reason: RoundSummaryReason::Done as u8,
            final_q: 4,
            ..InventoryRoundSummary::default()
        };
        bytes.extend(encode_packet(
            PacketType::InventoryRoundSummary,
            2,
            &summary.to_bytes(),
            &[],
        ));
        let parsed: Vec<_> = packets(&bytes).collect();
        assert_eq!(parsed.len(), 2);
        assert_eq!(
            parsed[0].data,
            PacketData::TxRampUp(TxRampUp {
                carrier_frequency: 915_250
            })
        );
        match parsed[1].data {
            PacketData::InventoryRoundSummary(s) => {
                assert_eq!(s.round_reason(), Some(RoundSummaryReason::Done));
                assert_eq!(s.final_q, 4);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_unknown_type_discards_rest() {
        let mut bytes = encode_packet(PacketType::HelloWorld, 0, &[1, 0, 0, 0], &[]);
        bytes[2] = 0x7F;
        bytes.extend(encode_packet(PacketType::HelloWorld, 0, &[1, 0, 0, 0], &[]));
        let (packet, rest) = parse(&bytes);
        assert!(!packet.is_valid());
        assert!(rest.is_empty());
    }

    #[test]
    fn test_truncated_packets_are_invalid() {
        let bytes = encode_packet(PacketType::Custom, 0, &[2, 0, 0, 0], &[9; 8]);
        assert!(!parse(&bytes[..4]).0.is_valid());
        assert!(!parse(&bytes[..bytes.len() - 4]).0.is_valid());
        assert!(parse(&bytes).0.is_valid());
        assert!(!parse(&[]).0.is_valid());
    }

    #[test]
    fn test_declared_length_mismatch() {
        // Gen2Transaction claiming 40 bits with only 4 dynamic bytes
        let txn = Gen2Transaction {
            status: 0,
            transaction_id: 1,
            num_bits: 40,
        };
        let bytes = encode_packet(PacketType::Gen2Transaction, 0, &txn.to_bytes(), &[1, 2, 3, 4]);
        assert!(!parse(&bytes).0.is_valid());
    }

    #[test]
    fn test_opaque_packets_pass_through() {
        let bytes = encode_packet(PacketType::SjcMeasurement, 5, &[7; 16], &[1, 2, 3, 4]);
        let (packet, _) = parse(&bytes);
        assert_eq!(packet.data, PacketData::Opaque);
        assert_eq!(packet.payload(), &[1, 2, 3, 4]);
        assert_eq!(packet.to_bytes(), bytes);
    }

    #[test]
    fn test_short_static_payload_is_an_error() {
        assert!(PacketData::parse(PacketType::InventoryRoundSummary, &[0; 19]).is_err());
        assert!(PacketData::parse(PacketType::TagRead, &[0; 3]).is_err());
        assert_eq!(
            PacketData::parse(PacketType::Halted, &[0x34, 0x12, 0, 0]).unwrap(),
            PacketData::Halted(Halted { halted_handle: 0x1234 })
        );
        assert_eq!(
            PacketData::parse(PacketType::SjcMeasurement, &[]).unwrap(),
            PacketData::Opaque
        );
    }

    /// Encode a typed payload, parse it back and check both the typed value and the bytes.
    fn check_round_trip(
        data: PacketData,
        us_counter: u32,
        payload: &[u8],
    ) -> std::result::Result<(), TestCaseError> {
        let packet_type = data.packet_type().unwrap();
        let static_bytes = data.to_bytes().unwrap();
        prop_assert_eq!(static_bytes.len(), packet_type.static_len());
        let bytes = encode_packet(packet_type, us_counter, &static_bytes, payload);
        prop_assert_eq!(bytes.len() % 4, 0);

        let (packet, rest) = parse(&bytes);
        prop_assert!(rest.is_empty());
        prop_assert_eq!(packet.packet_type, packet_type);
        prop_assert_eq!(packet.us_counter, us_counter);
        prop_assert_eq!(packet.data, data);
        prop_assert_eq!(packet.payload(), payload);
        prop_assert!(packet.padding_is_zero());
        prop_assert_eq!(packet.data.to_bytes(), Some(static_bytes));
        prop_assert_eq!(packet.to_bytes(), bytes);
        Ok(())
    }

    fn round_summary() -> impl Strategy<Value = InventoryRoundSummary> {
        (any::<u32>(), any::<u32>(), any::<[u16; 4]>(), any::<[u8; 4]>()).prop_map(
            |(duration_us, total_slots, slots, tail)| InventoryRoundSummary {
                duration_us,
                total_slots,
                num_slots: slots[0],
                empty_slots: slots[1],
                single_slots: slots[2],
                collided_slots: slots[3],
                reason: tail[0],
                final_q: tail[1],
                min_q_count: tail[2],
                queries_since_valid_epc_count: tail[3],
            },
        )
    }

    proptest! {
        #[test]
        fn tx_ramp_round_trip(carrier_frequency in any::<u32>(), reason in any::<u32>(), counter in any::<u32>()) {
            check_round_trip(PacketData::TxRampUp(TxRampUp { carrier_frequency }), counter, &[])?;
            check_round_trip(PacketData::TxRampDown(TxRampDown { reason }), counter, &[])?;
        }

        #[test]
        fn inventory_round_summary_round_trip(summary in round_summary(), counter in any::<u32>()) {
            check_round_trip(PacketData::InventoryRoundSummary(summary), counter, &[])?;
        }

        #[test]
        fn q_changed_round_trip(slots in any::<[u16; 4]>(), q_value in any::<u8>(), sent_query in any::<u8>()) {
            let q = QChanged {
                num_slots: slots[0],
                empty_slots: slots[1],
                single_slots: slots[2],
                collided_slots: slots[3],
                q_value,
                sent_query,
            };
            check_round_trip(PacketData::QChanged(q), 0, &[])?;
        }

        #[test]
        fn tag_read_round_trip(
            rssi in any::<u16>(),
            rx_gain_settings in any::<u16>(),
            read_type in 0u8..3,
            tid_offset in any::<u8>(),
            halted_on_tag in any::<u8>(),
            payload in proptest::collection::vec(any::<u8>(), 0..64),
        ) {
            let tag = TagRead {
                rssi,
                rx_gain_settings,
                read_type,
                tid_offset,
                halted_on_tag,
                payload_len: payload.len() as u8,
            };
            check_round_trip(PacketData::TagRead(tag), 7, &payload)?;
        }

        #[test]
        fn gen2_transaction_round_trip(num_bits in 0u16..160, status in any::<u8>(), transaction_id in any::<u8>(), fill in any::<u8>()) {
            let reply = vec![fill; (usize::from(num_bits) + 7) / 8];
            let txn = Gen2Transaction { status, transaction_id, num_bits };
            check_round_trip(PacketData::Gen2Transaction(txn), 0, &reply)?;
        }

        #[test]
        fn continuous_inventory_summary_round_trip(
            counts in any::<[u32; 3]>(),
            reason in any::<u8>(),
            last_op_id in any::<u8>(),
            last_op_error in any::<u8>(),
        ) {
            let summary = ContinuousInventorySummary {
                duration_us: counts[0],
                number_of_inventory_rounds: counts[1],
                number_of_tags: counts[2],
                reason,
                last_op_id,
                last_op_error,
            };
            check_round_trip(PacketData::ContinuousInventorySummary(summary), counts[0], &[])?;
        }

        #[test]
        fn hello_world_and_halted_round_trip(sku in any::<u16>(), reasons in any::<[u8; 2]>(), handle in any::<u16>()) {
            let hello = HelloWorld { sku, reset_reason: reasons[0], crash_info_conditional: reasons[1] };
            check_round_trip(PacketData::HelloWorld(hello), 0, &[])?;
            check_round_trip(PacketData::Halted(Halted { halted_handle: handle }), 0, &[])?;
        }

        #[test]
        fn custom_round_trip(words in 0u16..16, fill in any::<u8>(), counter in any::<u32>()) {
            let payload = vec![fill; usize::from(words) * 4];
            check_round_trip(PacketData::Custom(Custom { payload_len: words }), counter, &payload)?;
        }
    }
}
