///! Error types
use failure::Fail;

use crate::gen2::{Gen2TransactionStatus, MemoryBank, SelectAction, SelectTarget, TagErrorCode};
use crate::ops::OpCompletionStatus;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Fail)]
pub enum Error {
    /// All command slots hold a command
    #[fail(display = "No free Gen2 command slot")]
    NoFreeSlot,
    /// The buffer pool free list is empty
    #[fail(display = "No free FIFO buffer")]
    NoFreeBuffer,
    /// Encoded commands do not fit the device tx buffer
    #[fail(display = "Gen2 tx buffer overflow: {} bytes needed, {} available", needed, capacity)]
    BufferOverflow { needed: usize, capacity: usize },
    /// A buffer handed to the pool cannot hold a full EventFifo read after alignment
    #[fail(display = "FIFO buffer too small: {} usable bytes, {} required", usable, required)]
    BufferTooSmall { usable: usize, required: usize },
    #[fail(display = "Unable to encode Gen2 command: {}", _0)]
    Encode(String),
    #[fail(display = "Unable to decode: {}", _0)]
    Decode(String),
    /// An enable bit references a slot with no command in it
    #[fail(display = "Enable bit set for empty command slot {}", _0)]
    EnabledEmptySlot(usize),
    #[fail(display = "Command slot {} out of range", _0)]
    SlotOutOfRange(usize),
    #[fail(display = "At least one stop condition must be set")]
    NoStopConditions,
    #[fail(display = "Continuous inventory already in progress")]
    InventoryActive,
    #[fail(display = "Target changed between rounds while tag focus is enabled")]
    TagFocusTargetChanged,
    /// The device reported a failed op or command
    #[fail(display = "Operation failed: {:?}", _0)]
    Op(OpCompletionStatus),
    #[fail(display = "Timed out waiting for the reader")]
    Timeout,
    /// Error communicating with the tag - usually transient and may be retried
    #[fail(display = "Gen2 transaction failed: {:?}", _0)]
    Transaction(Gen2TransactionStatus),
    /// Error returned from the tag
    #[fail(display = "Tag returned error: {:?}", _0)]
    Tag(TagErrorCode),
    /// Incorrect parameters, or internal library error
    #[fail(display = "{}", _0)]
    Program(String),
}

impl From<String> for Error {
    fn from(e: String) -> Error {
        Error::Program(e)
    }
}

impl From<bitreader::BitReaderError> for Error {
    fn from(e: bitreader::BitReaderError) -> Error {
        Error::Decode(format!("Bitwise parsing error: {:?}", e))
    }
}

impl From<num_enum::TryFromPrimitiveError<MemoryBank>> for Error {
    fn from(e: num_enum::TryFromPrimitiveError<MemoryBank>) -> Error {
        Error::Decode(format!("Error parsing memory bank: {:?}", e))
    }
}

impl From<num_enum::TryFromPrimitiveError<SelectTarget>> for Error {
    fn from(e: num_enum::TryFromPrimitiveError<SelectTarget>) -> Error {
        Error::Decode(format!("Error parsing select target: {:?}", e))
    }
}

impl From<num_enum::TryFromPrimitiveError<SelectAction>> for Error {
    fn from(e: num_enum::TryFromPrimitiveError<SelectAction>) -> Error {
        Error::Decode(format!("Error parsing select action: {:?}", e))
    }
}

impl From<num_enum::TryFromPrimitiveError<Gen2TransactionStatus>> for Error {
    fn from(e: num_enum::TryFromPrimitiveError<Gen2TransactionStatus>) -> Error {
        Error::Decode(format!("Error parsing transaction status: {:?}", e))
    }
}

impl From<num_enum::TryFromPrimitiveError<TagErrorCode>> for Error {
    fn from(e: num_enum::TryFromPrimitiveError<TagErrorCode>) -> Error {
        Error::Decode(format!("Error parsing tag error code: {:?}", e))
    }
}

impl From<Gen2TransactionStatus> for Error {
    fn from(e: Gen2TransactionStatus) -> Error {
        Error::Transaction(e)
    }
}

impl From<TagErrorCode> for Error {
    fn from(e: TagErrorCode) -> Error {
        Error::Tag(e)
    }
}
