//! Host-side engine for Impinj Ex10 series UHF RFID reader chips.
//!
//! The chip reports everything it does as a stream of EventFifo packets. This crate takes that
//! stream from the transport, keeps continuous inventory going by starting each new round as
//! the previous one completes, and hands the packets on to the application. It also builds the
//! Gen2 command sequences the chip sends to singulated tags.
//!
//! The transport and the chip's op interface are supplied by the caller as a [`Transactor`].
//!
//! ## Threads
//!
//! Two contexts share a [`Reader`]:
//!
//!   * the transport's interrupt or reader thread, which gets a [`FifoDataHandler`] from
//!     [`Reader::data_handler`], fills buffers with device bytes and passes them to
//!     [`FifoDataHandler::handle`];
//!   * the application thread, which owns the `Reader` and pulls packets with
//!     [`Reader::packet_peek`] and [`Reader::packet_remove`].
//!
//! Buffers move between the two by ownership, so a buffer is only ever touched by one side.
//!
//! ## Example Code
//!
//! A simulated device driving a full continuous inventory run can be found in the `demos`
//! directory.

extern crate bitreader;
extern crate bitvec;
extern crate byteorder;
extern crate crossbeam;
extern crate failure;
extern crate log;
extern crate num_enum;
extern crate parking_lot;

pub mod bits;
pub mod buffer_pool;
pub mod error;
pub mod gen2;
pub mod inventory;
pub mod ops;
pub mod packet;
pub mod sequencer;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use log::{debug, error, warn};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub use crate::buffer_pool::{BufferPool, FifoBuffer, EVENT_FIFO_SIZE, FIFO_ALIGNMENT_SLACK};
pub use crate::error::{Error, Result};
pub use crate::gen2::{decode_reply, Gen2Command, Gen2Reply};
pub use crate::inventory::{
    ContinuousInventoryParams, InventoryRoundControl, InventoryRoundControl2, InventoryState,
    RunState, StopConditions,
};
pub use crate::ops::{OpCompletionStatus, RfBand, RfSettings, RssiCompensator, Transactor};
pub use crate::packet::{ContinuousInventorySummary, Packet, PacketData, PacketType, StopReason};
pub use crate::sequencer::{EnableContext, EnableReport, Gen2Sequencer};

use crate::inventory::ContinuousInventory;
use crate::packet::{encode_packet, packets, parse};

/// Reader settings
#[derive(Clone, Debug)]
pub struct Config {
    /// Number of EventFifo buffers in the pool
    pub buffer_count: usize,
    /// Bytes allocated per buffer
    pub buffer_size: usize,
    /// How long [`Reader::run_continuous_inventory`] waits when the run has no duration limit
    pub default_failsafe: Duration,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            buffer_count: 8,
            buffer_size: EVENT_FIFO_SIZE + FIFO_ALIGNMENT_SLACK,
            default_failsafe: Duration::from_secs(60),
        }
    }
}

struct Shared<T> {
    transactor: T,
    pool: BufferPool,
    queue: Sender<FifoBuffer>,
    inventory: Mutex<ContinuousInventory>,
}

/// Ingestion side of a [`Reader`], for the transport's fifo interrupt path.
pub struct FifoDataHandler<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for FifoDataHandler<T> {
    fn clone(&self) -> FifoDataHandler<T> {
        FifoDataHandler {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Transactor> FifoDataHandler<T> {
    pub fn transactor(&self) -> &T {
        &self.shared.transactor
    }

    /// Take a free buffer to read device bytes into. `None` means the host has fallen behind;
    /// the transport should stop reading until it is re-armed.
    pub fn acquire(&self) -> Option<FifoBuffer> {
        self.shared.pool.acquire()
    }

    /// Run every packet in a filled buffer through the inventory state machine, then queue the
    /// buffer for the host.
    ///
    /// A malformed packet ends processing of the buffer.
    pub fn handle(&self, buffer: FifoBuffer) -> Result<()> {
        let mut result = Ok(());
        {
            let mut inventory = self.shared.inventory.lock();
            for packet in packets(buffer.data()) {
                if !packet.is_valid() {
                    error!(
                        "Invalid packet in EventFifo buffer {}, discarding remainder",
                        buffer.id()
                    );
                    break;
                }
                if let Some(summary) = inventory.process(&packet, &self.shared.transactor) {
                    let bytes = encode_packet(
                        PacketType::ContinuousInventorySummary,
                        packet.us_counter,
                        &summary.to_bytes(),
                        &[],
                    );
                    let status = self.shared.transactor.insert_fifo_event(true, Some(&bytes));
                    if !status.is_ok() {
                        error!("Failed to insert inventory summary: {:?}", status);
                        result = status.into_result();
                    }
                }
            }
        }
        debug!("Queueing buffer {} ({} bytes)", buffer.id(), buffer.len());
        if let Err(e) = self.shared.queue.try_send(buffer) {
            self.shared.pool.release(e.into_inner());
            return Err(Error::Program(
                "EventFifo queue closed, buffer returned to pool".to_string(),
            ));
        }
        result
    }
}

pub struct Reader<T: Transactor> {
    shared: Arc<Shared<T>>,
    queue: Receiver<FifoBuffer>,
    /// Buffer being read by the host and the offset of its next packet
    current: Option<(FifoBuffer, usize)>,
    sequencer: Gen2Sequencer,
    rssi: Option<Box<dyn RssiCompensator>>,
    config: Config,
}

impl<T: Transactor> Reader<T> {
    /// Create a reader around a transactor, allocating the buffer pool.
    pub fn new(transactor: T, config: Config) -> Result<Reader<T>> {
        let pool = BufferPool::with_buffers(config.buffer_count, config.buffer_size)?;
        let (tx, rx) = channel::bounded(pool.capacity());
        Ok(Reader {
            shared: Arc::new(Shared {
                transactor,
                pool,
                queue: tx,
                inventory: Mutex::new(ContinuousInventory::new()),
            }),
            queue: rx,
            current: None,
            sequencer: Gen2Sequencer::new(),
            rssi: None,
            config,
        })
    }

    pub fn data_handler(&self) -> FifoDataHandler<T> {
        FifoDataHandler {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn transactor(&self) -> &T {
        &self.shared.transactor
    }

    pub fn set_rssi_compensator(&mut self, compensator: Box<dyn RssiCompensator>) {
        self.rssi = Some(compensator);
    }

    /// Make `current` point at an unread packet if one is available without blocking.
    fn advance(&mut self) -> bool {
        loop {
            let unread = self
                .current
                .as_ref()
                .map(|(buffer, cursor)| *cursor < buffer.len());
            match unread {
                Some(true) => return true,
                Some(false) => self.release_current(),
                None => match self.queue.try_recv() {
                    Ok(buffer) => self.current = Some((buffer, 0)),
                    Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => return false,
                },
            }
        }
    }

    fn release_current(&mut self) {
        if let Some((buffer, _)) = self.current.take() {
            if self.shared.pool.release(buffer) {
                debug!("Free list was empty, re-arming EventFifo interrupt");
                let status = self.shared.transactor.insert_fifo_event(true, None);
                if !status.is_ok() {
                    warn!("Failed to re-arm EventFifo interrupt: {:?}", status);
                }
            }
        }
    }

    /// Whether a packet can be read without waiting
    pub fn packets_available(&mut self) -> bool {
        self.advance()
    }

    /// The next packet, without consuming it. Malformed data shows up as an invalid packet;
    /// removing it discards the rest of its buffer.
    pub fn packet_peek(&mut self) -> Option<Packet<'_>> {
        if !self.advance() {
            return None;
        }
        let (buffer, cursor) = self.current.as_ref()?;
        Some(parse(&buffer.data()[*cursor..]).0)
    }

    /// Consume the packet returned by [`Reader::packet_peek`].
    pub fn packet_remove(&mut self) {
        if !self.advance() {
            return;
        }
        let mut exhausted = false;
        if let Some((ref buffer, ref mut cursor)) = self.current {
            let remaining = parse(&buffer.data()[*cursor..]).1.len();
            *cursor = buffer.len() - remaining;
            exhausted = remaining == 0;
        }
        if exhausted {
            self.release_current();
        }
    }

    /// Like [`Reader::packet_peek`], but wait up to `timeout` for a packet to arrive.
    pub fn wait_packet(&mut self, timeout: Duration) -> Option<Packet<'_>> {
        if !self.advance() {
            match self.queue.recv_timeout(timeout) {
                Ok(buffer) => self.current = Some((buffer, 0)),
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                    return None
                }
            }
        }
        self.packet_peek()
    }

    /// Start continuous inventory. Returns once the first round has been started; the run
    /// then continues from the ingestion path.
    pub fn continuous_inventory(&self, params: ContinuousInventoryParams) -> Result<()> {
        self.shared
            .inventory
            .lock()
            .start(params, &self.shared.transactor)
    }

    /// Stop the current op and ramp the transmitter down. A running continuous inventory ends
    /// with a host stop reason.
    pub fn stop_transmitting(&self) -> Result<()> {
        if self.shared.inventory.lock().request_stop() {
            debug!("Continuous inventory stop requested");
        }
        let transactor = &self.shared.transactor;
        transactor.stop_op().into_result()?;
        transactor.wait_completion().into_result()?;
        transactor.cw_off().into_result()?;
        transactor.wait_completion().into_result()
    }

    /// Snapshot of the continuous inventory state
    pub fn inventory_state(&self) -> InventoryState {
        *self.shared.inventory.lock().state()
    }

    /// Upper bound on how long a run with these stop conditions may take.
    pub fn failsafe(&self, conditions: &StopConditions) -> Duration {
        if conditions.max_duration_us > 0 {
            Duration::from_micros(2 * u64::from(conditions.max_duration_us)) + Duration::from_secs(1)
        } else {
            self.config.default_failsafe
        }
    }

    /// Run continuous inventory to completion, passing every packet to `on_packet`.
    ///
    /// Packets already queued when the call is made are handed to `on_packet` before the run
    /// starts, so a summary left over from an earlier run is never mistaken for this one.
    ///
    /// Returns the run summary, or [`Error::Timeout`] if it did not arrive within
    /// [`Reader::failsafe`]. On timeout the run is abandoned and transmission is stopped.
    pub fn run_continuous_inventory<F>(
        &mut self,
        params: ContinuousInventoryParams,
        mut on_packet: F,
    ) -> Result<ContinuousInventorySummary>
    where
        F: FnMut(&Packet<'_>),
    {
        let failsafe = self.failsafe(&params.stop_conditions);
        let mut stale = 0;
        while let Some(packet) = self.packet_peek() {
            on_packet(&packet);
            self.packet_remove();
            stale += 1;
        }
        if stale > 0 {
            debug!("Flushed {} queued packets before starting inventory", stale);
        }
        self.continuous_inventory(params)?;
        let deadline = Instant::now() + failsafe;
        loop {
            let now = Instant::now();
            if now >= deadline {
                warn!("No inventory summary within {:?}, stopping", failsafe);
                self.shared.inventory.lock().abort();
                self.stop_transmitting()?;
                return Err(Error::Timeout);
            }
            let summary = match self.wait_packet(deadline - now) {
                Some(packet) => {
                    on_packet(&packet);
                    match packet.data {
                        PacketData::ContinuousInventorySummary(summary) => Some(summary),
                        _ => None,
                    }
                }
                None => continue,
            };
            self.packet_remove();
            if let Some(summary) = summary {
                return Ok(summary);
            }
        }
    }

    pub fn gen2_sequencer(&self) -> &Gen2Sequencer {
        &self.sequencer
    }

    /// Edit the local command sequence. Push it with [`Reader::write_gen2_sequence`].
    pub fn gen2_sequencer_mut(&mut self) -> &mut Gen2Sequencer {
        &mut self.sequencer
    }

    /// Write the command sequence to the device.
    pub fn write_gen2_sequence(&self) -> Result<()> {
        let image = self.sequencer.materialize()?;
        self.shared.transactor.write_gen2_image(&image).into_result()
    }

    /// Set an enable mask locally and on the device.
    pub fn set_gen2_enables(&mut self, context: EnableContext, bits: u16) -> Result<EnableReport> {
        let report = self.sequencer.set_enables(context, bits)?;
        self.shared
            .transactor
            .write_gen2_enables(context, report.enables)
            .into_result()?;
        Ok(report)
    }

    /// Decode a `Gen2Transaction` packet using the sequenced command with its transaction id.
    pub fn decode_gen2_reply(&self, packet: &Packet<'_>) -> Result<Gen2Reply> {
        let transaction_id = match packet.data {
            PacketData::Gen2Transaction(t) => t.transaction_id,
            _ => return Err(Error::Program("Not a Gen2Transaction packet".to_string())),
        };
        let command = self.sequencer.find_transaction(transaction_id).ok_or_else(|| {
            Error::Program(format!("No command with transaction id {}", transaction_id))
        })?;
        decode_reply(command.command.kind(), packet)
    }

    /// Calibrated RSSI of a tag read in cdBm, if a compensator is installed.
    pub fn compensated_rssi(
        &self,
        packet: &Packet<'_>,
        band: RfBand,
        temperature_adc: u16,
    ) -> Option<i16> {
        let tag_read = match packet.data {
            PacketData::TagRead(t) => t,
            _ => return None,
        };
        let rf = self.shared.inventory.lock().params().rf;
        self.rssi.as_ref().map(|compensator| {
            compensator.compensate_rssi(
                tag_read.rssi,
                rf.rf_mode,
                tag_read.rx_gain_settings,
                rf.antenna,
                band,
                temperature_adc,
            )
        })
    }
}
