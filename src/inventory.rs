//! Continuous inventory.
//!
//! A continuous inventory run starts one round and then, every time the device reports an
//! `InventoryRoundSummary`, either starts the next round or ends the run. Rounds that were
//! paused by the regulatory dwell timer resume the Q algorithm where it stopped. When the run
//! ends a `ContinuousInventorySummary` is produced for the host.
use log::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::ops::{OpCompletionStatus, RfSettings, Transactor};
use crate::packet::{
    ContinuousInventorySummary, InventoryRoundSummary, Packet, PacketData, RoundSummaryReason,
    StopReason,
};

/// Inventory round control register
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub struct InventoryRoundControl {
    pub initial_q: u8,
    pub max_q: u8,
    pub min_q: u8,
    pub num_min_q_cycles: u8,
    pub fixed_q_mode: bool,
    pub q_increase_use_query: bool,
    pub q_decrease_use_query: bool,
    /// Gen2 session, 0-3
    pub session: u8,
    pub select: u8,
    /// Inventoried flag to singulate, 0 for A and 1 for B
    pub target: u8,
    pub halt_on_all_tags: bool,
    pub fast_id_enable: bool,
    pub tag_focus_enable: bool,
    pub auto_access: bool,
    pub abort_on_fail: bool,
    pub halt_on_fail: bool,
    pub always_ack: bool,
}

impl InventoryRoundControl {
    /// Pack into the register word, first field in the least significant bits.
    pub fn to_register(&self) -> u32 {
        u32::from(self.initial_q & 0xF)
            | u32::from(self.max_q & 0xF) << 4
            | u32::from(self.min_q & 0xF) << 8
            | u32::from(self.num_min_q_cycles & 0xF) << 12
            | u32::from(self.fixed_q_mode) << 16
            | u32::from(self.q_increase_use_query) << 17
            | u32::from(self.q_decrease_use_query) << 18
            | u32::from(self.session & 0x3) << 19
            | u32::from(self.select & 0x3) << 21
            | u32::from(self.target & 0x1) << 23
            | u32::from(self.halt_on_all_tags) << 24
            | u32::from(self.fast_id_enable) << 25
            | u32::from(self.tag_focus_enable) << 26
            | u32::from(self.auto_access) << 27
            | u32::from(self.abort_on_fail) << 28
            | u32::from(self.halt_on_fail) << 29
            | u32::from(self.always_ack) << 30
    }

    pub fn from_register(value: u32) -> InventoryRoundControl {
        let field = |shift: u32, width: u32| ((value >> shift) & ((1 << width) - 1)) as u8;
        let flag = |shift: u32| (value >> shift) & 1 == 1;
        InventoryRoundControl {
            initial_q: field(0, 4),
            max_q: field(4, 4),
            min_q: field(8, 4),
            num_min_q_cycles: field(12, 4),
            fixed_q_mode: flag(16),
            q_increase_use_query: flag(17),
            q_decrease_use_query: flag(18),
            session: field(19, 2),
            select: field(21, 2),
            target: field(23, 1),
            halt_on_all_tags: flag(24),
            fast_id_enable: flag(25),
            tag_focus_enable: flag(26),
            auto_access: flag(27),
            abort_on_fail: flag(28),
            halt_on_fail: flag(29),
            always_ack: flag(30),
        }
    }
}

/// Second inventory round control register: Q algorithm progress counters
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub struct InventoryRoundControl2 {
    pub max_queries_since_valid_epc: u8,
    pub starting_min_q_count: u8,
    pub starting_max_queries_since_valid_epc_count: u8,
}

impl InventoryRoundControl2 {
    pub fn to_register(&self) -> u32 {
        u32::from(self.max_queries_since_valid_epc)
            | u32::from(self.starting_min_q_count) << 8
            | u32::from(self.starting_max_queries_since_valid_epc_count) << 16
    }
}

/// Limits that end a continuous inventory run. Zero means no limit.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub struct StopConditions {
    pub max_number_of_rounds: u32,
    pub max_number_of_tags: u32,
    pub max_duration_us: u32,
}

impl StopConditions {
    pub fn is_unbounded(&self) -> bool {
        self.max_number_of_rounds == 0 && self.max_number_of_tags == 0 && self.max_duration_us == 0
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub struct ContinuousInventoryParams {
    pub rf: RfSettings,
    pub round_control: InventoryRoundControl,
    pub round_control_2: InventoryRoundControl2,
    pub send_selects: bool,
    pub stop_conditions: StopConditions,
    /// Alternate between the A and B populations after every completed round
    pub dual_target: bool,
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum RunState {
    Idle,
    Ongoing,
    StopRequested,
}

impl Default for RunState {
    fn default() -> RunState {
        RunState::Idle
    }
}

/// Cross-round state of a continuous inventory run
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub struct InventoryState {
    pub run_state: RunState,
    pub stop_reason: Option<StopReason>,
    /// Reason code of the last round summary
    pub done_reason: u8,
    /// Round control the run was started with
    pub initial_round_control: InventoryRoundControl,
    /// Q the last regulatory-paused round ended on
    pub previous_q: u8,
    pub min_q_count: u8,
    pub queries_since_valid_epc_count: u8,
    pub round_count: u32,
    pub tag_count: u32,
    pub target: u8,
    pub start_time_us: u32,
}

/// The continuous inventory state machine.
///
/// Fed with every packet the device produces; talks to the device only through the
/// [`Transactor`] passed in.
#[derive(Debug, Default)]
pub struct ContinuousInventory {
    state: InventoryState,
    params: ContinuousInventoryParams,
    /// Target latched by the first round run with tag focus
    tag_focus_target: Option<u8>,
}

impl ContinuousInventory {
    pub fn new() -> ContinuousInventory {
        ContinuousInventory::default()
    }

    pub fn state(&self) -> &InventoryState {
        &self.state
    }

    pub fn params(&self) -> &ContinuousInventoryParams {
        &self.params
    }

    pub fn is_idle(&self) -> bool {
        self.state.run_state == RunState::Idle
    }

    /// Begin a run and start its first round.
    pub fn start<T: Transactor + ?Sized>(
        &mut self,
        params: ContinuousInventoryParams,
        transactor: &T,
    ) -> Result<()> {
        if !self.is_idle() {
            return Err(Error::InventoryActive);
        }
        if params.stop_conditions.is_unbounded() {
            return Err(Error::NoStopConditions);
        }
        self.params = params;
        self.state = InventoryState {
            run_state: RunState::Ongoing,
            initial_round_control: params.round_control,
            previous_q: params.round_control.initial_q,
            target: params.round_control.target,
            start_time_us: transactor.device_time_us(),
            ..InventoryState::default()
        };
        info!(
            "Starting continuous inventory: {:?}",
            params.stop_conditions
        );
        let result = self.start_round(
            params.round_control,
            params.round_control_2,
            transactor,
        );
        if result.is_err() {
            self.state.run_state = RunState::Idle;
        }
        result
    }

    /// Ask the run to end after the current round. Returns false if no run was active.
    pub fn request_stop(&mut self) -> bool {
        match self.state.run_state {
            RunState::Idle => false,
            _ => {
                self.state.run_state = RunState::StopRequested;
                true
            }
        }
    }

    /// Drop the run without waiting for a round summary. The run is left stopped with
    /// [`StopReason::SdkTimeoutError`]; a summary that arrives afterwards is ignored.
    pub fn abort(&mut self) -> bool {
        if self.is_idle() {
            return false;
        }
        warn!(
            "Abandoning continuous inventory after {} rounds",
            self.state.round_count
        );
        self.state.stop_reason = Some(StopReason::SdkTimeoutError);
        self.state.run_state = RunState::Idle;
        true
    }

    /// Update the machine with one packet from the device.
    ///
    /// Returns the run summary when this packet ended the run.
    pub fn process<T: Transactor + ?Sized>(
        &mut self,
        packet: &Packet<'_>,
        transactor: &T,
    ) -> Option<ContinuousInventorySummary> {
        if self.is_idle() {
            return None;
        }
        match packet.data {
            PacketData::TagRead(_) => {
                self.state.tag_count = self.state.tag_count.wrapping_add(1);
                None
            }
            PacketData::InventoryRoundSummary(ref summary) => {
                self.round_done(summary, packet.us_counter, transactor)
            }
            _ => None,
        }
    }

    fn round_done<T: Transactor + ?Sized>(
        &mut self,
        summary: &InventoryRoundSummary,
        timestamp_us: u32,
        transactor: &T,
    ) -> Option<ContinuousInventorySummary> {
        self.state.round_count += 1;
        if summary.round_reason() == Some(RoundSummaryReason::Regulatory) {
            self.state.previous_q = summary.final_q;
        }
        self.state.min_q_count = summary.min_q_count;
        self.state.queries_since_valid_epc_count = summary.queries_since_valid_epc_count;
        self.state.done_reason = summary.reason;

        if self.check_stop_conditions(timestamp_us) {
            return Some(self.finish(timestamp_us, None));
        }
        match self.continue_inventory(transactor) {
            Ok(()) => None,
            Err(e) => {
                error!("Failed to start inventory round: {}", e);
                Some(self.finish(timestamp_us, Some(&e)))
            }
        }
    }

    /// Latch the first satisfied stop condition. Checked in order rounds, tags, duration,
    /// host request; a reason already latched is kept.
    fn check_stop_conditions(&mut self, timestamp_us: u32) -> bool {
        if self.state.stop_reason.is_some() {
            return true;
        }
        let conditions = &self.params.stop_conditions;
        let elapsed_us = timestamp_us.wrapping_sub(self.state.start_time_us);
        let reason = if conditions.max_number_of_rounds > 0
            && self.state.round_count >= conditions.max_number_of_rounds
        {
            StopReason::MaxNumberOfRounds
        } else if conditions.max_number_of_tags > 0
            && self.state.tag_count >= conditions.max_number_of_tags
        {
            StopReason::MaxNumberOfTags
        } else if conditions.max_duration_us > 0 && elapsed_us >= conditions.max_duration_us {
            StopReason::MaxDuration
        } else if self.state.run_state == RunState::StopRequested {
            StopReason::Host
        } else {
            return false;
        };
        self.state.stop_reason = Some(reason);
        true
    }

    fn continue_inventory<T: Transactor + ?Sized>(&mut self, transactor: &T) -> Result<()> {
        let done = self.state.done_reason == RoundSummaryReason::Done as u8;
        let mut reset_q = false;
        if self.params.dual_target {
            if done {
                self.state.target ^= 1;
                reset_q = true;
            }
            // Session 0 flags do not survive the carrier dropping
            if !transactor.cw_is_on() && self.params.round_control.session == 0 {
                self.state.target = 0;
                reset_q = true;
            }
        } else if done {
            reset_q = true;
        }

        let mut round_control = self.params.round_control;
        round_control.target = self.state.target;
        let mut round_control_2 = self.params.round_control_2;
        if reset_q {
            round_control.initial_q = self.state.initial_round_control.initial_q;
            round_control_2.starting_min_q_count = 0;
            round_control_2.starting_max_queries_since_valid_epc_count = 0;
        } else if self.state.done_reason == RoundSummaryReason::Regulatory as u8 {
            round_control.initial_q = self.state.previous_q;
            round_control_2.starting_min_q_count = self.state.min_q_count;
            round_control_2.starting_max_queries_since_valid_epc_count =
                self.state.queries_since_valid_epc_count;
        }
        debug!(
            "Round {}: target {}, initial Q {}",
            self.state.round_count + 1,
            round_control.target,
            round_control.initial_q
        );
        self.start_round(round_control, round_control_2, transactor)
    }

    fn start_round<T: Transactor + ?Sized>(
        &mut self,
        round_control: InventoryRoundControl,
        round_control_2: InventoryRoundControl2,
        transactor: &T,
    ) -> Result<()> {
        if round_control.tag_focus_enable {
            match self.tag_focus_target {
                None => self.tag_focus_target = Some(round_control.target),
                Some(target) if target != round_control.target => {
                    return Err(Error::TagFocusTargetChanged)
                }
                Some(_) => (),
            }
        } else {
            self.tag_focus_target = None;
        }
        transactor
            .start_round(
                &self.params.rf,
                &round_control,
                &round_control_2,
                self.params.send_selects,
            )
            .into_result()
    }

    /// End the run and build its summary. A failed round start overrides the stop reason.
    fn finish(&mut self, timestamp_us: u32, failure: Option<&Error>) -> ContinuousInventorySummary {
        self.state.run_state = RunState::Idle;
        let mut summary = ContinuousInventorySummary {
            duration_us: timestamp_us.wrapping_sub(self.state.start_time_us),
            number_of_inventory_rounds: self.state.round_count,
            number_of_tags: self.state.tag_count,
            reason: self.state.stop_reason.unwrap_or(StopReason::None) as u8,
            last_op_id: 0,
            last_op_error: 0,
        };
        // Only the summary reports the failure; the latched stop reason is left as it was
        match failure {
            Some(Error::Op(status)) => {
                let reason = failure_reason(status);
                if reason == StopReason::OpError {
                    summary.last_op_id = status.ops_status.op_id;
                    summary.last_op_error = status.ops_status.error;
                }
                summary.reason = reason as u8;
            }
            Some(_) => summary.reason = StopReason::OpError as u8,
            None => (),
        }
        info!(
            "Continuous inventory finished: {:?} after {} rounds, {} tags",
            summary.stop_reason(),
            summary.number_of_inventory_rounds,
            summary.number_of_tags
        );
        summary
    }
}

fn failure_reason(status: &OpCompletionStatus) -> StopReason {
    if status.timeout_error {
        StopReason::SdkTimeoutError
    } else if status.command_error != 0 {
        StopReason::DeviceCommandError
    } else {
        StopReason::OpError
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{encode_packet, parse, PacketType, TagRead};
    use crate::sequencer::{EnableContext, Gen2TxImage};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    #[derive(Default)]
    struct Device {
        rounds: Mutex<Vec<(InventoryRoundControl, InventoryRoundControl2)>>,
        cw_on: AtomicBool,
        now_us: AtomicU32,
        fail_next: Mutex<Option<OpCompletionStatus>>,
    }

    impl Transactor for Device {
        fn start_round(
            &self,
            _rf: &RfSettings,
            round_control: &InventoryRoundControl,
            round_control_2: &InventoryRoundControl2,
            _send_selects: bool,
        ) -> OpCompletionStatus {
            if let Some(status) = self.fail_next.lock().take() {
                return status;
            }
            self.rounds.lock().push((*round_control, *round_control_2));
            OpCompletionStatus::ok()
        }
        fn wait_completion(&self) -> OpCompletionStatus {
            OpCompletionStatus::ok()
        }
        fn stop_op(&self) -> OpCompletionStatus {
            OpCompletionStatus::ok()
        }
        fn cw_off(&self) -> OpCompletionStatus {
            OpCompletionStatus::ok()
        }
        fn cw_is_on(&self) -> bool {
            self.cw_on.load(Ordering::SeqCst)
        }
        fn device_time_us(&self) -> u32 {
            self.now_us.load(Ordering::SeqCst)
        }
        fn insert_fifo_event(&self, _: bool, _: Option<&[u8]>) -> OpCompletionStatus {
            OpCompletionStatus::ok()
        }
        fn write_gen2_image(&self, _: &Gen2TxImage) -> OpCompletionStatus {
            OpCompletionStatus::ok()
        }
        fn write_gen2_enables(&self, _: EnableContext, _: u16) -> OpCompletionStatus {
            OpCompletionStatus::ok()
        }
    }

    fn device() -> Device {
        let device = Device::default();
        device.cw_on.store(true, Ordering::SeqCst);
        device.now_us.store(1_000, Ordering::SeqCst);
        device
    }

    fn params(max_rounds: u32, dual_target: bool) -> ContinuousInventoryParams {
        ContinuousInventoryParams {
            round_control: InventoryRoundControl {
                initial_q: 6,
                max_q: 15,
                session: 1,
                ..InventoryRoundControl::default()
            },
            stop_conditions: StopConditions {
                max_number_of_rounds: max_rounds,
                ..StopConditions::default()
            },
            dual_target,
            ..ContinuousInventoryParams::default()
        }
    }

    fn round_summary(reason: RoundSummaryReason, final_q: u8, at: u32) -> Vec<u8> {
        let summary = InventoryRoundSummary {
            reason: reason as u8,
            final_q,
            min_q_count: 3,
            queries_since_valid_epc_count: 9,
            ..InventoryRoundSummary::default()
        };
        encode_packet(PacketType::InventoryRoundSummary, at, &summary.to_bytes(), &[])
    }

    fn feed(machine: &mut ContinuousInventory, bytes: &[u8], device: &Device) -> Option<ContinuousInventorySummary> {
        let (packet, _) = parse(bytes);
        machine.process(&packet, device)
    }

    #[test]
    fn test_rejects_unbounded_run() {
        let mut machine = ContinuousInventory::new();
        let device = device();
        assert!(matches!(
            machine.start(params(0, false), &device),
            Err(Error::NoStopConditions)
        ));
        assert!(machine.is_idle());
        assert!(device.rounds.lock().is_empty());
    }

    #[test]
    fn test_rejects_second_start() {
        let mut machine = ContinuousInventory::new();
        let device = device();
        machine.start(params(3, false), &device).unwrap();
        assert!(matches!(
            machine.start(params(3, false), &device),
            Err(Error::InventoryActive)
        ));
    }

    #[test]
    fn test_q_preserved_after_regulatory_pause() {
        let mut machine = ContinuousInventory::new();
        let device = device();
        machine.start(params(10, false), &device).unwrap();
        assert!(feed(&mut machine, &round_summary(RoundSummaryReason::Regulatory, 9, 2_000), &device).is_none());
        assert!(feed(&mut machine, &round_summary(RoundSummaryReason::Done, 4, 3_000), &device).is_none());

        let rounds = device.rounds.lock();
        assert_eq!(rounds.len(), 3);
        assert_eq!(rounds[0].0.initial_q, 6);
        assert_eq!(rounds[1].0.initial_q, 9);
        assert_eq!(rounds[1].1.starting_min_q_count, 3);
        assert_eq!(rounds[1].1.starting_max_queries_since_valid_epc_count, 9);
        assert_eq!(rounds[2].0.initial_q, 6);
        assert_eq!(rounds[2].1.starting_min_q_count, 0);
    }

    #[test]
    fn test_dual_target_flips_only_on_done() {
        let mut machine = ContinuousInventory::new();
        let device = device();
        machine.start(params(10, true), &device).unwrap();
        feed(&mut machine, &round_summary(RoundSummaryReason::Done, 5, 2_000), &device);
        feed(&mut machine, &round_summary(RoundSummaryReason::Regulatory, 7, 3_000), &device);
        feed(&mut machine, &round_summary(RoundSummaryReason::Done, 5, 4_000), &device);

        let targets: Vec<u8> = device.rounds.lock().iter().map(|r| r.0.target).collect();
        assert_eq!(targets, vec![0, 1, 1, 0]);
    }

    #[test]
    fn test_session_zero_target_reset_when_cw_off() {
        let mut machine = ContinuousInventory::new();
        let device = device();
        let mut p = params(10, true);
        p.round_control.session = 0;
        machine.start(p, &device).unwrap();
        feed(&mut machine, &round_summary(RoundSummaryReason::Done, 5, 2_000), &device);
        device.cw_on.store(false, Ordering::SeqCst);
        feed(&mut machine, &round_summary(RoundSummaryReason::Regulatory, 8, 3_000), &device);

        let rounds = device.rounds.lock();
        assert_eq!(rounds[1].0.target, 1);
        assert_eq!(rounds[2].0.target, 0);
        assert_eq!(rounds[2].0.initial_q, 6);
    }

    #[test]
    fn test_rounds_beat_duration() {
        let mut machine = ContinuousInventory::new();
        let device = device();
        let mut p = params(2, false);
        p.stop_conditions.max_duration_us = 500;
        machine.start(p, &device).unwrap();
        feed(&mut machine, &round_summary(RoundSummaryReason::Done, 5, 1_100), &device);
        let summary = feed(&mut machine, &round_summary(RoundSummaryReason::Done, 5, 1_600), &device).unwrap();
        assert_eq!(summary.stop_reason(), Some(StopReason::MaxNumberOfRounds));
        assert_eq!(summary.duration_us, 600);
        assert!(machine.is_idle());
    }

    #[test]
    fn test_duration_wraps() {
        let mut machine = ContinuousInventory::new();
        let device = device();
        device.now_us.store(u32::max_value() - 999, Ordering::SeqCst);
        let mut p = params(0, false);
        p.stop_conditions.max_duration_us = 2_000;
        machine.start(p, &device).unwrap();
        // 1000 us to the wrap, then 400 more
        assert!(feed(&mut machine, &round_summary(RoundSummaryReason::Done, 5, 400), &device).is_none());
        let summary = feed(&mut machine, &round_summary(RoundSummaryReason::Done, 5, 1_200), &device).unwrap();
        assert_eq!(summary.stop_reason(), Some(StopReason::MaxDuration));
    }

    #[test]
    fn test_tag_count_and_host_stop() {
        let mut machine = ContinuousInventory::new();
        let device = device();
        let mut p = params(0, false);
        p.stop_conditions.max_number_of_tags = 100;
        machine.start(p, &device).unwrap();
        let tag = encode_packet(PacketType::TagRead, 1_500, &TagRead::default().to_bytes(), &[]);
        feed(&mut machine, &tag, &device);
        feed(&mut machine, &tag, &device);
        assert!(machine.request_stop());
        let summary = feed(&mut machine, &round_summary(RoundSummaryReason::Host, 5, 2_000), &device).unwrap();
        assert_eq!(summary.stop_reason(), Some(StopReason::Host));
        assert_eq!(summary.number_of_tags, 2);
        assert!(!machine.request_stop());
    }

    #[test]
    fn test_failed_round_ends_run() {
        let mut machine = ContinuousInventory::new();
        let device = device();
        machine.start(params(10, false), &device).unwrap();
        *device.fail_next.lock() = Some(OpCompletionStatus {
            error_occurred: true,
            ops_status: crate::ops::OpsStatus { op_id: 0xA5, error: 3 },
            ..OpCompletionStatus::default()
        });
        let summary = feed(&mut machine, &round_summary(RoundSummaryReason::Done, 5, 2_000), &device).unwrap();
        assert_eq!(summary.stop_reason(), Some(StopReason::OpError));
        assert_eq!((summary.last_op_id, summary.last_op_error), (0xA5, 3));
        assert!(machine.is_idle());
        // No retry
        assert_eq!(device.rounds.lock().len(), 1);
    }

    #[test]
    fn test_command_error_leaves_op_fields_clear() {
        let mut machine = ContinuousInventory::new();
        let device = device();
        machine.start(params(10, false), &device).unwrap();
        *device.fail_next.lock() = Some(OpCompletionStatus {
            error_occurred: true,
            command_error: 2,
            ops_status: crate::ops::OpsStatus { op_id: 0xA5, error: 3 },
            ..OpCompletionStatus::default()
        });
        let summary = feed(&mut machine, &round_summary(RoundSummaryReason::Done, 5, 2_000), &device).unwrap();
        assert_eq!(summary.stop_reason(), Some(StopReason::DeviceCommandError));
        assert_eq!((summary.last_op_id, summary.last_op_error), (0, 0));
        assert_eq!(machine.state().stop_reason, None);
    }

    #[test]
    fn test_abort_returns_to_idle() {
        let mut machine = ContinuousInventory::new();
        let device = device();
        assert!(!machine.abort());
        machine.start(params(3, false), &device).unwrap();
        machine.request_stop();
        assert!(machine.abort());
        assert!(machine.is_idle());
        assert_eq!(machine.state().stop_reason, Some(StopReason::SdkTimeoutError));

        // A late summary from the abandoned run changes nothing
        assert!(feed(&mut machine, &round_summary(RoundSummaryReason::Host, 5, 2_000), &device).is_none());
        assert_eq!(machine.state().round_count, 0);

        machine.start(params(3, false), &device).unwrap();
        assert_eq!(machine.state().run_state, RunState::Ongoing);
        assert_eq!(machine.state().stop_reason, None);
        assert_eq!(device.rounds.lock().len(), 2);
    }

    #[test]
    fn test_timeout_reason() {
        let status = OpCompletionStatus {
            error_occurred: true,
            timeout_error: true,
            command_error: 4,
            ..OpCompletionStatus::default()
        };
        assert_eq!(failure_reason(&status), StopReason::SdkTimeoutError);
        let status = OpCompletionStatus {
            timeout_error: false,
            ..status
        };
        assert_eq!(failure_reason(&status), StopReason::DeviceCommandError);
    }

    #[test]
    fn test_tag_focus_rejects_target_change() {
        let mut machine = ContinuousInventory::new();
        let device = device();
        let mut p = params(10, true);
        p.round_control.tag_focus_enable = true;
        machine.start(p, &device).unwrap();
        let summary = feed(&mut machine, &round_summary(RoundSummaryReason::Done, 5, 2_000), &device).unwrap();
        assert_eq!(summary.stop_reason(), Some(StopReason::OpError));
    }

    #[test]
    fn test_round_control_register() {
        let control = InventoryRoundControl {
            initial_q: 4,
            max_q: 15,
            session: 2,
            target: 1,
            fast_id_enable: true,
            always_ack: true,
            ..InventoryRoundControl::default()
        };
        let register = control.to_register();
        assert_eq!(register & 0xFF, 0xF4);
        assert_eq!((register >> 19) & 0x3, 2);
        assert_eq!(InventoryRoundControl::from_register(register), control);
    }
}
