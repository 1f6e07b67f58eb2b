//! Interfaces to the device-facing collaborators: the op/command transactor that talks to the
//! chip, and the calibration service used to annotate tag reads.
use crate::error::{Error, Result};
use crate::inventory::{InventoryRoundControl, InventoryRoundControl2};
use crate::sequencer::{EnableContext, Gen2TxImage};

/// Failing op and its error code
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub struct OpsStatus {
    pub op_id: u8,
    pub error: u8,
}

/// Outcome of a device op or command
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub struct OpCompletionStatus {
    pub error_occurred: bool,
    pub ops_status: OpsStatus,
    /// Device command response code, zero on success
    pub command_error: u8,
    pub timeout_error: bool,
    pub aggregate_buffer_overflow: bool,
}

impl OpCompletionStatus {
    pub fn ok() -> OpCompletionStatus {
        OpCompletionStatus::default()
    }

    pub fn is_ok(&self) -> bool {
        !self.error_occurred
    }

    pub fn into_result(self) -> Result<()> {
        if self.error_occurred {
            Err(Error::Op(self))
        } else {
            Ok(())
        }
    }
}

/// Radio settings for an inventory round
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub struct RfSettings {
    pub antenna: u8,
    pub rf_mode: u16,
    pub tx_power_cdbm: u16,
    /// Zero lets the device hop according to the region
    pub frequency_khz: u32,
    /// Keep the carrier on between rounds
    pub remain_on: bool,
}

/// Runs ops and commands on the reader chip.
///
/// Implementations wrap the transport; the engine calls them from both the host and the
/// ingestion context, so every method takes `&self`.
pub trait Transactor: Send + Sync {
    /// Start an inventory round with the given round control registers
    fn start_round(
        &self,
        rf: &RfSettings,
        round_control: &InventoryRoundControl,
        round_control_2: &InventoryRoundControl2,
        send_selects: bool,
    ) -> OpCompletionStatus;

    /// Block until the running op completes
    fn wait_completion(&self) -> OpCompletionStatus;

    /// Abort the running op
    fn stop_op(&self) -> OpCompletionStatus;

    /// Ramp the transmitter down
    fn cw_off(&self) -> OpCompletionStatus;

    fn cw_is_on(&self) -> bool;

    /// Free-running device microsecond counter
    fn device_time_us(&self) -> u32;

    /// Insert a packet into the device EventFifo, or with `None` just raise the fifo
    /// interrupt so the transport resumes reading.
    fn insert_fifo_event(&self, trigger_irq: bool, packet: Option<&[u8]>) -> OpCompletionStatus;

    /// Write the Gen2 tx buffer and its tables
    fn write_gen2_image(&self, image: &Gen2TxImage) -> OpCompletionStatus;

    fn write_gen2_enables(&self, context: EnableContext, enables: u16) -> OpCompletionStatus;
}

/// Receiver filter band
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum RfBand {
    Lower,
    Upper,
}

/// Calibration service converting raw modem RSSI into a calibrated level.
pub trait RssiCompensator: Send + Sync {
    /// Returns the compensated RSSI in cdBm
    fn compensate_rssi(
        &self,
        rssi_raw: u16,
        rf_mode: u16,
        rx_gain_settings: u16,
        antenna: u8,
        band: RfBand,
        temperature_adc: u16,
    ) -> i16;
}

#[test]
fn test_status_into_result() {
    assert!(OpCompletionStatus::ok().into_result().is_ok());
    let failed = OpCompletionStatus {
        error_occurred: true,
        timeout_error: true,
        ..OpCompletionStatus::default()
    };
    match failed.into_result() {
        Err(Error::Op(status)) => assert!(status.timeout_error),
        other => panic!("unexpected {:?}", other),
    }
}
