//! Gen2 tag commands: bit-exact encoding and decoding, the transaction controls the device
//! needs to run each command, and interpretation of tag replies.
use bitreader::BitReader;
use num_enum::TryFromPrimitive;
use std::convert::TryFrom;

use crate::bits::{ebv_bit_len, read_bits, read_ebv, BitWriter, EBV_14_MAX, EBV_21_MAX, EBV_7_MAX};
use crate::error::{Error, Result};
use crate::packet::{Packet, PacketData};

/// Largest encoded command the device accepts
pub const MAX_COMMAND_BYTES: usize = 32;

const SELECT_OPCODE: u32 = 0xA;
const READ_OPCODE: u8 = 0xC2;
const WRITE_OPCODE: u8 = 0xC3;
const KILL_OPCODE: u8 = 0xC4;
const LOCK_OPCODE: u8 = 0xC5;
const ACCESS_OPCODE: u8 = 0xC6;
const BLOCK_WRITE_OPCODE: u8 = 0xC7;
const BLOCK_PERMALOCK_OPCODE: u8 = 0xC9;
const AUTHENTICATE_OPCODE: u8 = 0xD5;

#[derive(Copy, Clone, PartialEq, Eq, Debug, TryFromPrimitive)]
#[repr(u8)]
pub enum MemoryBank {
    Reserved = 0,
    Epc = 1,
    Tid = 2,
    User = 3,
}

#[derive(Copy, Clone, PartialEq, Eq, Debug, TryFromPrimitive)]
#[repr(u8)]
pub enum SelectTarget {
    Session0 = 0,
    Session1 = 1,
    Session2 = 2,
    Session3 = 3,
    SelectedFlag = 4,
}

/// Select action, named by the (matching, non-matching) behaviour bits
#[derive(Copy, Clone, PartialEq, Eq, Debug, TryFromPrimitive)]
#[repr(u8)]
pub enum SelectAction {
    Action000 = 0,
    Action001 = 1,
    Action010 = 2,
    Action011 = 3,
    Action100 = 4,
    Action101 = 5,
    Action110 = 6,
    Action111 = 7,
}

/// Air-link outcome of a Gen2 transaction
#[derive(Copy, Clone, PartialEq, Eq, Debug, TryFromPrimitive)]
#[repr(u8)]
pub enum Gen2TransactionStatus {
    Ok = 0,
    BadCrc = 1,
    NoReply = 2,
    InvalidReplyType = 3,
}

/// Error code backscattered by a tag
#[derive(Copy, Clone, PartialEq, Eq, Debug, TryFromPrimitive)]
#[repr(u8)]
pub enum TagErrorCode {
    Other = 0,
    NotSupported = 1,
    InsufficientPrivileges = 2,
    MemoryOverrun = 3,
    MemoryLocked = 4,
    CryptoSuite = 5,
    CommandNotEncapsulated = 6,
    ResponseBufferOverflow = 7,
    SecurityTimeout = 8,
    InsufficientPower = 11,
    NonSpecific = 15,
    NoError = 16,
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum ResponseType {
    None = 0,
    Immediate = 1,
    Delayed = 2,
    InProcess = 3,
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Gen2CommandKind {
    Select,
    Read,
    Write,
    Kill1,
    Kill2,
    Lock,
    Access,
    BlockWrite,
    BlockPermalock,
    Authenticate,
}

impl Gen2CommandKind {
    /// Whether the tag prefixes its reply with an error header bit
    fn has_error_header(self) -> bool {
        match self {
            Gen2CommandKind::Read
            | Gen2CommandKind::BlockPermalock
            | Gen2CommandKind::Write
            | Gen2CommandKind::Kill2
            | Gen2CommandKind::Lock
            | Gen2CommandKind::BlockWrite => true,
            _ => false,
        }
    }
}

/// A run of bits, most significant bit of the first byte first.
///
/// Bits past `bit_len` in the last byte are always zero.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct BitSpan {
    data: Vec<u8>,
    bit_len: usize,
}

impl BitSpan {
    /// Take the first `bit_len` bits of `bytes`.
    pub fn new(bytes: &[u8], bit_len: usize) -> Result<BitSpan> {
        if bit_len > bytes.len() * 8 {
            return Err(Error::Program(format!(
                "{} bits requested from a {} byte span",
                bit_len,
                bytes.len()
            )));
        }
        let mut data = bytes[..(bit_len + 7) / 8].to_vec();
        if bit_len % 8 != 0 {
            if let Some(last) = data.last_mut() {
                *last &= 0xFFu8 << (8 - bit_len % 8);
            }
        }
        Ok(BitSpan { data, bit_len })
    }

    pub fn from_bytes(bytes: &[u8]) -> BitSpan {
        BitSpan {
            data: bytes.to_vec(),
            bit_len: bytes.len() * 8,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn bit_len(&self) -> usize {
        self.bit_len
    }

    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    fn from_writer(writer: BitWriter) -> BitSpan {
        let (data, bit_len) = writer.into_parts();
        BitSpan { data, bit_len }
    }
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct SelectCommand {
    pub target: SelectTarget,
    pub action: SelectAction,
    pub memory_bank: MemoryBank,
    pub bit_pointer: u32,
    /// The mask length is sent as the 8-bit Length field
    pub mask: BitSpan,
    pub truncate: bool,
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct ReadCommand {
    pub memory_bank: MemoryBank,
    pub word_pointer: u32,
    pub word_count: u8,
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct WriteCommand {
    pub memory_bank: MemoryBank,
    pub word_pointer: u32,
    /// Cover coding is applied by the device
    pub data: u16,
}

/// One half of the kill password. The upper half goes in the first kill command.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct KillCommand {
    pub password: u16,
}

pub const LOCK_KILL_PASSWORD_READ_WRITE: u16 = 1 << 9;
pub const LOCK_KILL_PASSWORD_PERMALOCK: u16 = 1 << 8;
pub const LOCK_ACCESS_PASSWORD_READ_WRITE: u16 = 1 << 7;
pub const LOCK_ACCESS_PASSWORD_PERMALOCK: u16 = 1 << 6;
pub const LOCK_EPC_WRITE: u16 = 1 << 5;
pub const LOCK_EPC_PERMALOCK: u16 = 1 << 4;
pub const LOCK_TID_WRITE: u16 = 1 << 3;
pub const LOCK_TID_PERMALOCK: u16 = 1 << 2;
pub const LOCK_FILE_0_WRITE: u16 = 1 << 1;
pub const LOCK_FILE_0_PERMALOCK: u16 = 1;

/// Lock payload: which fields to change (`mask`) and what to set them to (`action`), using
/// the `LOCK_*` bit constants.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct LockCommand {
    pub mask: u16,
    pub action: u16,
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct AccessCommand {
    pub password: u16,
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct BlockWriteCommand {
    pub memory_bank: MemoryBank,
    pub word_pointer: u32,
    /// Word count on the air is the length of this vector
    pub data: Vec<u16>,
}

#[derive(Copy, Clone, PartialEq, Eq, Debug, TryFromPrimitive)]
#[repr(u8)]
pub enum BlockPermalockReadLock {
    Read = 0,
    Permalock = 1,
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct BlockPermalockCommand {
    pub read_lock: BlockPermalockReadLock,
    pub memory_bank: MemoryBank,
    pub block_pointer: u32,
    pub block_range: u8,
    /// Empty when reading the permalock status
    pub mask: BitSpan,
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct AuthenticateCommand {
    pub send_rep: bool,
    pub inc_rep_len: bool,
    pub csi: u8,
    /// Sent with its bit length in the 12-bit Length field
    pub message: BitSpan,
    /// Expected length of the tag's response when `send_rep` is set. Only used to size the
    /// receive window; it does not appear on the air.
    pub rep_len_bits: u16,
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Gen2Command {
    Select(SelectCommand),
    Read(ReadCommand),
    Write(WriteCommand),
    Kill1(KillCommand),
    Kill2(KillCommand),
    Lock(LockCommand),
    Access(AccessCommand),
    BlockWrite(BlockWriteCommand),
    BlockPermalock(BlockPermalockCommand),
    Authenticate(AuthenticateCommand),
}

/// Device register settings describing how to run a command and receive its reply
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct TransactionControls {
    pub response_type: ResponseType,
    pub has_header_bit: bool,
    pub use_cover_code: bool,
    pub append_handle: bool,
    pub append_crc16: bool,
    pub is_kill_command: bool,
    /// Expected reply length in bits
    pub rx_length: u16,
}

impl TransactionControls {
    const fn new(
        response_type: ResponseType,
        has_header_bit: bool,
        use_cover_code: bool,
        append_handle: bool,
        is_kill_command: bool,
        rx_length: u16,
    ) -> TransactionControls {
        TransactionControls {
            response_type,
            has_header_bit,
            use_cover_code,
            append_handle,
            append_crc16: true,
            is_kill_command,
            rx_length,
        }
    }

    /// Register layout: bits 0-2 response type, then one bit each for header, cover code,
    /// handle, CRC16 and kill, and the receive length in the top 16 bits.
    pub fn to_register(&self) -> u32 {
        u32::from(self.response_type as u8)
            | u32::from(self.has_header_bit) << 3
            | u32::from(self.use_cover_code) << 4
            | u32::from(self.append_handle) << 5
            | u32::from(self.append_crc16) << 6
            | u32::from(self.is_kill_command) << 7
            | u32::from(self.rx_length) << 16
    }
}

impl Gen2Command {
    pub fn kind(&self) -> Gen2CommandKind {
        match self {
            Gen2Command::Select(_) => Gen2CommandKind::Select,
            Gen2Command::Read(_) => Gen2CommandKind::Read,
            Gen2Command::Write(_) => Gen2CommandKind::Write,
            Gen2Command::Kill1(_) => Gen2CommandKind::Kill1,
            Gen2Command::Kill2(_) => Gen2CommandKind::Kill2,
            Gen2Command::Lock(_) => Gen2CommandKind::Lock,
            Gen2Command::Access(_) => Gen2CommandKind::Access,
            Gen2Command::BlockWrite(_) => Gen2CommandKind::BlockWrite,
            Gen2Command::BlockPermalock(_) => Gen2CommandKind::BlockPermalock,
            Gen2Command::Authenticate(_) => Gen2CommandKind::Authenticate,
        }
    }

    pub fn is_select(&self) -> bool {
        self.kind() == Gen2CommandKind::Select
    }

    /// Pack the command into its on-air bit form (CRC and handle are appended by the device).
    pub fn encode(&self) -> Result<BitSpan> {
        let mut w = BitWriter::new();
        match self {
            Gen2Command::Select(c) => {
                if c.mask.bit_len() > 0xFF {
                    return Err(Error::Encode(format!(
                        "Select mask of {} bits exceeds 255",
                        c.mask.bit_len()
                    )));
                }
                w.write(SELECT_OPCODE, 4)?;
                w.write(u32::from(c.target as u8), 3)?;
                w.write(u32::from(c.action as u8), 3)?;
                w.write(u32::from(c.memory_bank as u8), 2)?;
                w.write_ebv(c.bit_pointer, EBV_14_MAX)?;
                w.write(c.mask.bit_len() as u32, 8)?;
                w.write_bits(c.mask.bytes(), c.mask.bit_len())?;
                w.write_bool(c.truncate);
            }
            Gen2Command::Read(c) => {
                w.write(u32::from(READ_OPCODE), 8)?;
                w.write(u32::from(c.memory_bank as u8), 2)?;
                w.write_ebv(c.word_pointer, EBV_21_MAX)?;
                w.write(u32::from(c.word_count), 8)?;
            }
            Gen2Command::Write(c) => {
                w.write(u32::from(WRITE_OPCODE), 8)?;
                w.write(u32::from(c.memory_bank as u8), 2)?;
                w.write_ebv(c.word_pointer, EBV_21_MAX)?;
                w.write(u32::from(c.data), 16)?;
            }
            Gen2Command::Kill1(c) | Gen2Command::Kill2(c) => {
                w.write(u32::from(KILL_OPCODE), 8)?;
                w.write(u32::from(c.password), 16)?;
                w.write(0, 3)?;
            }
            Gen2Command::Lock(c) => {
                w.write(u32::from(LOCK_OPCODE), 8)?;
                w.write(u32::from(c.mask), 10)?;
                w.write(u32::from(c.action), 10)?;
            }
            Gen2Command::Access(c) => {
                w.write(u32::from(ACCESS_OPCODE), 8)?;
                w.write(u32::from(c.password), 16)?;
            }
            Gen2Command::BlockWrite(c) => {
                if c.data.len() > 0xFF {
                    return Err(Error::Encode(format!(
                        "Block write of {} words exceeds 255",
                        c.data.len()
                    )));
                }
                w.write(u32::from(BLOCK_WRITE_OPCODE), 8)?;
                w.write(u32::from(c.memory_bank as u8), 2)?;
                w.write_ebv(c.word_pointer, EBV_21_MAX)?;
                w.write(c.data.len() as u32, 8)?;
                for word in &c.data {
                    w.write(u32::from(*word), 16)?;
                }
            }
            Gen2Command::BlockPermalock(c) => {
                w.write(u32::from(BLOCK_PERMALOCK_OPCODE), 8)?;
                w.write(0, 8)?;
                w.write(u32::from(c.read_lock as u8), 1)?;
                w.write(u32::from(c.memory_bank as u8), 2)?;
                w.write_ebv(c.block_pointer, EBV_7_MAX)?;
                w.write(u32::from(c.block_range), 8)?;
                w.write_bits(c.mask.bytes(), c.mask.bit_len())?;
            }
            Gen2Command::Authenticate(c) => {
                if c.message.bit_len() > 0xFFF {
                    return Err(Error::Encode(format!(
                        "Authenticate message of {} bits exceeds 4095",
                        c.message.bit_len()
                    )));
                }
                w.write(u32::from(AUTHENTICATE_OPCODE), 8)?;
                w.write(0, 2)?;
                w.write_bool(c.send_rep);
                w.write_bool(c.inc_rep_len);
                w.write(u32::from(c.csi), 8)?;
                w.write(c.message.bit_len() as u32, 12)?;
                w.write_bits(c.message.bytes(), c.message.bit_len())?;
            }
        }
        let encoded = BitSpan::from_writer(w);
        if encoded.byte_len() > MAX_COMMAND_BYTES {
            return Err(Error::Encode(format!(
                "{:?} encodes to {} bytes, limit is {}",
                self.kind(),
                encoded.byte_len(),
                MAX_COMMAND_BYTES
            )));
        }
        Ok(encoded)
    }

    /// Recover a command from its on-air form.
    ///
    /// Both kill phases share a wire form and decode as [`Gen2Command::Kill1`]; an
    /// authenticate command decodes with `rep_len_bits` of zero.
    pub fn decode(encoded: &BitSpan) -> Result<Gen2Command> {
        let total = encoded.bit_len() as u64;
        let mut r = BitReader::new(encoded.bytes());
        if total < 8 {
            return Err(Error::Decode(format!("{} bit command is too short", total)));
        }
        if encoded.bytes()[0] >> 4 == SELECT_OPCODE as u8 {
            r.skip(4)?;
            let target = SelectTarget::try_from(r.read_u8(3)?)?;
            let action = SelectAction::try_from(r.read_u8(3)?)?;
            let memory_bank = MemoryBank::try_from(r.read_u8(2)?)?;
            let bit_pointer = read_ebv(&mut r)?;
            let declared = usize::from(r.read_u8(8)?);
            // Whatever precedes the truncate bit is mask
            let mask_len = total
                .checked_sub(r.position() + 1)
                .ok_or_else(|| Error::Decode("Select command truncated".to_string()))?
                as usize;
            if mask_len != declared {
                return Err(Error::Decode(format!(
                    "Select mask length {} does not match {} remaining bits",
                    declared, mask_len
                )));
            }
            let mask = BitSpan::new(&read_bits(&mut r, mask_len)?, mask_len)?;
            let truncate = r.read_bool()?;
            return Ok(Gen2Command::Select(SelectCommand {
                target,
                action,
                memory_bank,
                bit_pointer,
                mask,
                truncate,
            }));
        }

        let opcode = r.read_u8(8)?;
        let command = match opcode {
            READ_OPCODE => Gen2Command::Read(ReadCommand {
                memory_bank: MemoryBank::try_from(r.read_u8(2)?)?,
                word_pointer: read_ebv(&mut r)?,
                word_count: r.read_u8(8)?,
            }),
            WRITE_OPCODE => Gen2Command::Write(WriteCommand {
                memory_bank: MemoryBank::try_from(r.read_u8(2)?)?,
                word_pointer: read_ebv(&mut r)?,
                data: r.read_u16(16)?,
            }),
            KILL_OPCODE => {
                let password = r.read_u16(16)?;
                r.skip(3)?;
                Gen2Command::Kill1(KillCommand { password })
            }
            LOCK_OPCODE => Gen2Command::Lock(LockCommand {
                mask: r.read_u16(10)?,
                action: r.read_u16(10)?,
            }),
            ACCESS_OPCODE => Gen2Command::Access(AccessCommand {
                password: r.read_u16(16)?,
            }),
            BLOCK_WRITE_OPCODE => {
                let memory_bank = MemoryBank::try_from(r.read_u8(2)?)?;
                let word_pointer = read_ebv(&mut r)?;
                let word_count = r.read_u8(8)?;
                let data = (0..word_count)
                    .map(|_| r.read_u16(16).map_err(Error::from))
                    .collect::<Result<Vec<u16>>>()?;
                Gen2Command::BlockWrite(BlockWriteCommand {
                    memory_bank,
                    word_pointer,
                    data,
                })
            }
            BLOCK_PERMALOCK_OPCODE => {
                r.skip(8)?;
                let read_lock = match r.read_u8(1)? {
                    0 => BlockPermalockReadLock::Read,
                    _ => BlockPermalockReadLock::Permalock,
                };
                let memory_bank = MemoryBank::try_from(r.read_u8(2)?)?;
                let block_pointer = read_ebv(&mut r)?;
                let block_range = r.read_u8(8)?;
                let mask_len = total
                    .checked_sub(r.position())
                    .ok_or_else(|| Error::Decode("BlockPermalock command truncated".to_string()))?
                    as usize;
                let mask = BitSpan::new(&read_bits(&mut r, mask_len)?, mask_len)?;
                Gen2Command::BlockPermalock(BlockPermalockCommand {
                    read_lock,
                    memory_bank,
                    block_pointer,
                    block_range,
                    mask,
                })
            }
            AUTHENTICATE_OPCODE => {
                r.skip(2)?;
                let send_rep = r.read_bool()?;
                let inc_rep_len = r.read_bool()?;
                let csi = r.read_u8(8)?;
                let length = usize::from(r.read_u16(12)?);
                let message = BitSpan::new(&read_bits(&mut r, length)?, length)?;
                Gen2Command::Authenticate(AuthenticateCommand {
                    send_rep,
                    inc_rep_len,
                    csi,
                    message,
                    rep_len_bits: 0,
                })
            }
            other => {
                return Err(Error::Decode(format!(
                    "Unknown Gen2 opcode {:#04x}",
                    other
                )))
            }
        };
        if r.position() != total {
            return Err(Error::Decode(format!(
                "{:?} decoded {} of {} bits",
                command.kind(),
                r.position(),
                total
            )));
        }
        Ok(command)
    }

    /// Encoded length in bits, computed without encoding
    pub fn bit_len(&self) -> usize {
        match self {
            Gen2Command::Select(c) => 4 + 3 + 3 + 2 + ebv_bit_len(c.bit_pointer) + 8 + c.mask.bit_len() + 1,
            Gen2Command::Read(c) => 8 + 2 + ebv_bit_len(c.word_pointer) + 8,
            Gen2Command::Write(c) => 8 + 2 + ebv_bit_len(c.word_pointer) + 16,
            Gen2Command::Kill1(_) | Gen2Command::Kill2(_) => 8 + 16 + 3,
            Gen2Command::Lock(_) => 8 + 20,
            Gen2Command::Access(_) => 8 + 16,
            Gen2Command::BlockWrite(c) => 8 + 2 + ebv_bit_len(c.word_pointer) + 8 + 16 * c.data.len(),
            Gen2Command::BlockPermalock(c) => {
                8 + 8 + 1 + 2 + ebv_bit_len(c.block_pointer) + 8 + c.mask.bit_len()
            }
            Gen2Command::Authenticate(c) => 8 + 2 + 1 + 1 + 8 + 12 + c.message.bit_len(),
        }
    }

    /// Transaction controls for running this command
    pub fn transaction_controls(&self) -> TransactionControls {
        use ResponseType::{Delayed, Immediate, InProcess};
        match self {
            Gen2Command::Select(_) => TransactionControls {
                response_type: ResponseType::None,
                has_header_bit: false,
                use_cover_code: false,
                append_handle: false,
                append_crc16: true,
                is_kill_command: false,
                rx_length: 0,
            },
            Gen2Command::Read(c) => {
                TransactionControls::new(Immediate, true, false, true, false, 33 + 16 * u16::from(c.word_count))
            }
            Gen2Command::Write(_) => TransactionControls::new(Delayed, true, true, true, false, 33),
            Gen2Command::Kill1(_) => TransactionControls::new(Immediate, false, false, true, true, 32),
            Gen2Command::Kill2(_) => TransactionControls::new(Delayed, true, false, true, true, 33),
            Gen2Command::Lock(_) => TransactionControls::new(Delayed, true, false, true, false, 33),
            Gen2Command::Access(_) => TransactionControls::new(Immediate, false, true, true, false, 32),
            Gen2Command::BlockWrite(_) => TransactionControls::new(Delayed, true, false, true, false, 33),
            Gen2Command::BlockPermalock(c) => match c.read_lock {
                BlockPermalockReadLock::Read => TransactionControls::new(
                    Immediate,
                    true,
                    false,
                    true,
                    false,
                    33 + 16 * u16::from(c.block_range),
                ),
                BlockPermalockReadLock::Permalock => {
                    TransactionControls::new(Delayed, true, false, true, false, 33)
                }
            },
            Gen2Command::Authenticate(c) => {
                let mut rx_length = 41;
                if c.send_rep {
                    rx_length += c.rep_len_bits;
                    if c.inc_rep_len {
                        rx_length += 16;
                    }
                }
                TransactionControls::new(InProcess, false, false, true, false, rx_length)
            }
        }
    }
}

/// A successfully decoded tag reply
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Gen2Reply {
    pub kind: Gen2CommandKind,
    /// Reply bits after the error header
    pub bit_len: usize,
    /// Reply bits as big-endian words, the last one zero padded
    pub words: Vec<u16>,
}

impl Gen2Reply {
    /// Tag handle from an access or kill reply
    pub fn tag_handle(&self) -> Option<u16> {
        match self.kind {
            Gen2CommandKind::Access | Gen2CommandKind::Kill1 | Gen2CommandKind::Kill2 => {
                self.words.first().cloned()
            }
            _ => None,
        }
    }
}

/// Interpret the reply carried by a `Gen2Transaction` packet for a command of `kind`.
pub fn decode_reply(kind: Gen2CommandKind, packet: &Packet<'_>) -> Result<Gen2Reply> {
    let transaction = match packet.data {
        PacketData::Gen2Transaction(t) => t,
        _ => {
            return Err(Error::Decode(format!(
                "Expected a Gen2Transaction packet, got {:?}",
                packet.packet_type
            )))
        }
    };
    let status = Gen2TransactionStatus::try_from(transaction.status)?;
    if status != Gen2TransactionStatus::Ok {
        return Err(Error::Transaction(status));
    }
    if kind == Gen2CommandKind::Select {
        return Err(Error::Decode("Select commands have no reply".to_string()));
    }

    let mut data = packet.payload();
    let mut bit_len = usize::from(transaction.num_bits);
    if kind.has_error_header() {
        if bit_len < 9 || data.len() < 2 {
            return Err(Error::Decode(format!(
                "{:?} reply of {} bits is too short",
                kind, bit_len
            )));
        }
        if data[0] & 0x01 != 0 {
            let code = TagErrorCode::try_from(data[1])?;
            if code != TagErrorCode::NoError {
                return Err(Error::Tag(code));
            }
        }
        bit_len -= 1;
        data = &data[1..];
    }
    if kind == Gen2CommandKind::Authenticate {
        // Barker code bits of an in-process reply
        bit_len += 7;
    }

    let byte = |i: usize| data.get(i).cloned().unwrap_or(0);
    let words = (0..(bit_len + 15) / 16)
        .map(|i| u16::from_be_bytes([byte(2 * i), byte(2 * i + 1)]))
        .collect();
    Ok(Gen2Reply {
        kind,
        bit_len,
        words,
    })
}
