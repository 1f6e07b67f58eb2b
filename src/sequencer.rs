//! Gen2 tx command sequencer.
//!
//! Holds up to [`MAX_TX_COMMAND_COUNT`] encoded commands and the three enable masks that tell
//! the device which slots to send as selects, to halted tags, and to tags during auto access.
use log::{debug, warn};

use crate::error::{Error, Result};
use crate::gen2::{BitSpan, Gen2Command, MAX_COMMAND_BYTES};

pub const MAX_TX_COMMAND_COUNT: usize = 10;
/// Size of the device's Gen2 tx buffer
pub const GEN2_TX_BUFFER_LENGTH: usize = 128;

#[derive(Copy, Clone, PartialEq, Eq, Debug, Hash)]
pub enum EnableContext {
    Select,
    HaltedAccess,
    AutoAccess,
}

/// A command held in a slot
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct TxCommand {
    pub command: Gen2Command,
    pub encoded: BitSpan,
    /// Opaque caller id, echoed in `Gen2Transaction` packets
    pub transaction_id: u8,
}

/// Outcome of a successful [`Gen2Sequencer::set_enables`]
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct EnableReport {
    pub enables: u16,
    /// Slots enabled in a context that does not match their command kind
    pub mismatched: Vec<usize>,
}

/// Everything the device needs to run the sequenced commands
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Gen2TxImage {
    pub buffer: [u8; GEN2_TX_BUFFER_LENGTH],
    /// Byte offset of each slot within `buffer`
    pub offsets: [u8; MAX_TX_COMMAND_COUNT],
    /// Bit length of each slot, zero for an empty slot
    pub lengths: [u16; MAX_TX_COMMAND_COUNT],
    pub transaction_ids: [u8; MAX_TX_COMMAND_COUNT],
    /// Transaction controls in register form
    pub controls: [u32; MAX_TX_COMMAND_COUNT],
}

impl Default for Gen2TxImage {
    fn default() -> Gen2TxImage {
        Gen2TxImage {
            buffer: [0; GEN2_TX_BUFFER_LENGTH],
            offsets: [0; MAX_TX_COMMAND_COUNT],
            lengths: [0; MAX_TX_COMMAND_COUNT],
            transaction_ids: [0; MAX_TX_COMMAND_COUNT],
            controls: [0; MAX_TX_COMMAND_COUNT],
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct Gen2Sequencer {
    slots: [Option<TxCommand>; MAX_TX_COMMAND_COUNT],
    select_enables: u16,
    halted_enables: u16,
    auto_access_enables: u16,
}

impl Gen2Sequencer {
    pub fn new() -> Gen2Sequencer {
        Gen2Sequencer::default()
    }

    /// Empty every slot and clear all enables.
    pub fn clear_all(&mut self) {
        for slot in self.slots.iter_mut() {
            *slot = None;
        }
        self.select_enables = 0;
        self.halted_enables = 0;
        self.auto_access_enables = 0;
    }

    /// Empty one slot, dropping it from every enable mask.
    pub fn clear_slot(&mut self, index: usize) -> Result<()> {
        if index >= MAX_TX_COMMAND_COUNT {
            return Err(Error::SlotOutOfRange(index));
        }
        self.slots[index] = None;
        let keep = !(1u16 << index);
        self.select_enables &= keep;
        self.halted_enables &= keep;
        self.auto_access_enables &= keep;
        Ok(())
    }

    fn free_slot(&self) -> Result<usize> {
        self.slots
            .iter()
            .position(|slot| slot.is_none())
            .ok_or(Error::NoFreeSlot)
    }

    /// Encode `command` into the first empty slot and return its index.
    pub fn append(&mut self, command: Gen2Command, transaction_id: u8) -> Result<usize> {
        let index = self.free_slot()?;
        let encoded = command.encode()?;
        debug!(
            "Slot {}: {:?} ({} bits, id {})",
            index,
            command.kind(),
            encoded.bit_len(),
            transaction_id
        );
        self.slots[index] = Some(TxCommand {
            command,
            encoded,
            transaction_id,
        });
        Ok(index)
    }

    /// Store an already encoded command in the first empty slot.
    pub fn append_encoded(&mut self, encoded: BitSpan, transaction_id: u8) -> Result<usize> {
        let index = self.free_slot()?;
        if encoded.byte_len() > MAX_COMMAND_BYTES {
            return Err(Error::Encode(format!(
                "Encoded command of {} bytes exceeds {}",
                encoded.byte_len(),
                MAX_COMMAND_BYTES
            )));
        }
        let command = Gen2Command::decode(&encoded)?;
        self.slots[index] = Some(TxCommand {
            command,
            encoded,
            transaction_id,
        });
        Ok(index)
    }

    pub fn slot(&self, index: usize) -> Option<&TxCommand> {
        self.slots.get(index).and_then(|slot| slot.as_ref())
    }

    /// Number of slots holding a command
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Find the command a `Gen2Transaction` packet answers.
    pub fn find_transaction(&self, transaction_id: u8) -> Option<&TxCommand> {
        self.slots
            .iter()
            .filter_map(|slot| slot.as_ref())
            .find(|c| c.transaction_id == transaction_id)
    }

    pub fn enables(&self, context: EnableContext) -> u16 {
        match context {
            EnableContext::Select => self.select_enables,
            EnableContext::HaltedAccess => self.halted_enables,
            EnableContext::AutoAccess => self.auto_access_enables,
        }
    }

    /// Replace the enable mask for `context`.
    ///
    /// A bit for an empty slot fails the whole call and leaves the mask untouched. Selects
    /// enabled for access, or access commands enabled as selects, are still applied but are
    /// listed in the report.
    pub fn set_enables(&mut self, context: EnableContext, bits: u16) -> Result<EnableReport> {
        let mut mismatched = Vec::new();
        for index in 0..16 {
            if bits & (1 << index) == 0 {
                continue;
            }
            if index >= MAX_TX_COMMAND_COUNT {
                return Err(Error::SlotOutOfRange(index));
            }
            let slot = match self.slots[index] {
                Some(ref slot) => slot,
                None => return Err(Error::EnabledEmptySlot(index)),
            };
            let is_select = slot.command.is_select();
            let expects_select = context == EnableContext::Select;
            if is_select != expects_select {
                warn!(
                    "Slot {} holds {:?} but is enabled for {:?}",
                    index,
                    slot.command.kind(),
                    context
                );
                mismatched.push(index);
            }
        }
        match context {
            EnableContext::Select => self.select_enables = bits,
            EnableContext::HaltedAccess => self.halted_enables = bits,
            EnableContext::AutoAccess => self.auto_access_enables = bits,
        }
        Ok(EnableReport {
            enables: bits,
            mismatched,
        })
    }

    /// Lay every command out in a device tx buffer image.
    pub fn materialize(&self) -> Result<Gen2TxImage> {
        let mut image = Gen2TxImage::default();
        let mut offset = 0;
        for (index, slot) in self.slots.iter().enumerate() {
            let slot = match slot {
                Some(slot) => slot,
                None => continue,
            };
            let bytes = slot.encoded.bytes();
            let end = offset + bytes.len();
            if end > GEN2_TX_BUFFER_LENGTH {
                return Err(Error::BufferOverflow {
                    needed: end,
                    capacity: GEN2_TX_BUFFER_LENGTH,
                });
            }
            image.buffer[offset..end].copy_from_slice(bytes);
            image.offsets[index] = offset as u8;
            image.lengths[index] = slot.encoded.bit_len() as u16;
            image.transaction_ids[index] = slot.transaction_id;
            image.controls[index] = slot.command.transaction_controls().to_register();
            offset = end;
        }
        Ok(image)
    }

    /// Rebuild the slots from a device image, e.g. one read back from the chip.
    ///
    /// Enable masks are cleared; write them again with [`Gen2Sequencer::set_enables`].
    pub fn load_image(&mut self, image: &Gen2TxImage) -> Result<()> {
        let mut slots: [Option<TxCommand>; MAX_TX_COMMAND_COUNT] = Default::default();
        for index in 0..MAX_TX_COMMAND_COUNT {
            let bit_len = usize::from(image.lengths[index]);
            if bit_len == 0 {
                continue;
            }
            let start = usize::from(image.offsets[index]);
            let end = start + (bit_len + 7) / 8;
            if end > GEN2_TX_BUFFER_LENGTH {
                return Err(Error::Decode(format!(
                    "Slot {} extends past the tx buffer",
                    index
                )));
            }
            let encoded = BitSpan::new(&image.buffer[start..end], bit_len)?;
            slots[index] = Some(TxCommand {
                command: Gen2Command::decode(&encoded)?,
                encoded,
                transaction_id: image.transaction_ids[index],
            });
        }
        self.clear_all();
        self.slots = slots;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gen2::*;

    fn read(word_count: u8) -> Gen2Command {
        Gen2Command::Read(ReadCommand {
            memory_bank: MemoryBank::Tid,
            word_pointer: 0,
            word_count,
        })
    }

    fn select() -> Gen2Command {
        Gen2Command::Select(SelectCommand {
            target: SelectTarget::SelectedFlag,
            action: SelectAction::Action000,
            memory_bank: MemoryBank::Epc,
            bit_pointer: 32,
            mask: BitSpan::from_bytes(&[0xE2, 0x80]),
            truncate: false,
        })
    }

    #[test]
    fn test_append_fills_first_free_slot() {
        let mut seq = Gen2Sequencer::new();
        assert_eq!(seq.append(select(), 1).unwrap(), 0);
        assert_eq!(seq.append(read(2), 2).unwrap(), 1);
        assert_eq!(seq.append(read(4), 3).unwrap(), 2);
        seq.clear_slot(1).unwrap();
        assert_eq!(seq.append(read(6), 4).unwrap(), 1);
        assert_eq!(seq.find_transaction(4).unwrap().command, read(6));
    }

    #[test]
    fn test_no_free_slot() {
        let mut seq = Gen2Sequencer::new();
        for id in 0..MAX_TX_COMMAND_COUNT {
            seq.append(read(1), id as u8).unwrap();
        }
        assert!(matches!(seq.append(read(1), 99), Err(Error::NoFreeSlot)));
        seq.clear_all();
        assert!(seq.is_empty());
    }

    #[test]
    fn test_encode_failure_leaves_slot_free() {
        let mut seq = Gen2Sequencer::new();
        let bad = Gen2Command::Read(ReadCommand {
            memory_bank: MemoryBank::User,
            word_pointer: u32::max_value(),
            word_count: 1,
        });
        assert!(matches!(seq.append(bad, 0), Err(Error::Encode(_))));
        assert_eq!(seq.append(read(1), 0).unwrap(), 0);
    }

    #[test]
    fn test_enables_on_empty_slot_fail() {
        let mut seq = Gen2Sequencer::new();
        seq.append(read(1), 0).unwrap();
        seq.set_enables(EnableContext::HaltedAccess, 0b1).unwrap();
        match seq.set_enables(EnableContext::HaltedAccess, 0b11) {
            Err(Error::EnabledEmptySlot(1)) => (),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(seq.enables(EnableContext::HaltedAccess), 0b1);
        assert!(matches!(
            seq.set_enables(EnableContext::Select, 1 << 12),
            Err(Error::SlotOutOfRange(12))
        ));
    }

    #[test]
    fn test_context_mismatch_is_applied() {
        let mut seq = Gen2Sequencer::new();
        seq.append(select(), 0).unwrap();
        seq.append(read(1), 0).unwrap();

        let report = seq.set_enables(EnableContext::Select, 0b11).unwrap();
        assert_eq!(report.mismatched, vec![1]);
        assert_eq!(seq.enables(EnableContext::Select), 0b11);

        let report = seq.set_enables(EnableContext::AutoAccess, 0b11).unwrap();
        assert_eq!(report.mismatched, vec![0]);
        assert_eq!(seq.enables(EnableContext::AutoAccess), 0b11);
        assert_eq!(seq.enables(EnableContext::HaltedAccess), 0);
    }

    #[test]
    fn test_materialize_layout() {
        let mut seq = Gen2Sequencer::new();
        seq.append(select(), 7).unwrap();
        seq.append(read(2), 8).unwrap();
        let image = seq.materialize().unwrap();

        let select_bits = select().bit_len();
        assert_eq!(image.offsets[0], 0);
        assert_eq!(usize::from(image.lengths[0]), select_bits);
        assert_eq!(usize::from(image.offsets[1]), (select_bits + 7) / 8);
        assert_eq!(image.lengths[1], 26);
        assert_eq!(image.transaction_ids[..2], [7, 8]);
        assert_eq!(image.lengths[2], 0);
        assert_eq!(image.controls[1], read(2).transaction_controls().to_register());

        let mut reloaded = Gen2Sequencer::new();
        reloaded.load_image(&image).unwrap();
        assert_eq!(reloaded.slot(0), seq.slot(0));
        assert_eq!(reloaded.slot(1), seq.slot(1));
        assert_eq!(reloaded.len(), 2);
    }

    #[test]
    fn test_materialize_overflow() {
        let mut seq = Gen2Sequencer::new();
        let block_write = Gen2Command::BlockWrite(BlockWriteCommand {
            memory_bank: MemoryBank::User,
            word_pointer: 0,
            data: vec![0xAAAA; 12],
        });
        for id in 0..5 {
            seq.append(block_write.clone(), id).unwrap();
        }
        match seq.materialize() {
            Err(Error::BufferOverflow { needed, capacity }) => {
                assert_eq!(capacity, GEN2_TX_BUFFER_LENGTH);
                assert!(needed > capacity);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_append_encoded() {
        let mut seq = Gen2Sequencer::new();
        let encoded = read(3).encode().unwrap();
        let index = seq.append_encoded(encoded.clone(), 5).unwrap();
        assert_eq!(seq.slot(index).unwrap().command, read(3));
        assert_eq!(seq.slot(index).unwrap().encoded, encoded);
        assert!(seq
            .append_encoded(BitSpan::from_bytes(&[0xFF, 0xFF]), 6)
            .is_err());
    }
}
