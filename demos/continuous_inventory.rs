extern crate crossbeam;
extern crate env_logger;
extern crate ex10_reader;
extern crate log;
extern crate parking_lot;

use crossbeam::channel::{self, Receiver, Sender};
use ex10_reader::packet::{encode_packet, InventoryRoundSummary, RoundSummaryReason, TagRead};
use ex10_reader::sequencer::Gen2TxImage;
use ex10_reader::*;
use log::info;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Stand-in for a chip on the other end of a transport. Every started round is handed to the
/// device thread, which answers with a few tag reads and a round summary.
struct SimulatedChip {
    started: Sender<InventoryRoundControl>,
    inserted: Mutex<Vec<Vec<u8>>>,
    epoch: Instant,
    rounds: AtomicU32,
}

impl Transactor for SimulatedChip {
    fn start_round(
        &self,
        _rf: &RfSettings,
        round_control: &InventoryRoundControl,
        _round_control_2: &InventoryRoundControl2,
        _send_selects: bool,
    ) -> OpCompletionStatus {
        self.rounds.fetch_add(1, Ordering::SeqCst);
        match self.started.send(*round_control) {
            Ok(()) => OpCompletionStatus::ok(),
            Err(_) => OpCompletionStatus {
                error_occurred: true,
                command_error: 1,
                ..OpCompletionStatus::default()
            },
        }
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
        true
    }
    fn device_time_us(&self) -> u32 {
        self.epoch.elapsed().as_micros() as u32
    }
    fn insert_fifo_event(&self, _trigger_irq: bool, packet: Option<&[u8]>) -> OpCompletionStatus {
        if let Some(bytes) = packet {
            self.inserted.lock().push(bytes.to_vec());
        }
        OpCompletionStatus::ok()
    }
    fn write_gen2_image(&self, _image: &Gen2TxImage) -> OpCompletionStatus {
        OpCompletionStatus::ok()
    }
    fn write_gen2_enables(&self, _context: EnableContext, _enables: u16) -> OpCompletionStatus {
        OpCompletionStatus::ok()
    }
}

fn round_bytes(chip: &SimulatedChip, round: &InventoryRoundControl, number: u32) -> Vec<u8> {
    let mut bytes = Vec::new();
    for tag in 0..(number % 3 + 1) {
        let mut payload = vec![0x30, 0x00];
        payload.extend((0..12).map(|i| if i == 11 { tag as u8 } else { 0xE2 }));
        let read = TagRead {
            rssi: 0x0300 + tag as u16,
            payload_len: payload.len() as u8,
            ..TagRead::default()
        };
        let at = chip.device_time_us();
        bytes.extend(encode_packet(PacketType::TagRead, at, &read.to_bytes(), &payload));
    }
    let reason = if number % 4 == 3 {
        RoundSummaryReason::Regulatory
    } else {
        RoundSummaryReason::Done
    };
    let summary = InventoryRoundSummary {
        reason: reason as u8,
        final_q: round.initial_q.saturating_sub(1),
        ..InventoryRoundSummary::default()
    };
    let at = chip.device_time_us();
    bytes.extend(encode_packet(
        PacketType::InventoryRoundSummary,
        at,
        &summary.to_bytes(),
        &[],
    ));
    bytes
}

fn deliver(handler: &FifoDataHandler<SimulatedChip>, bytes: &[u8]) -> Result<()> {
    let mut buffer = handler.acquire().ok_or(Error::NoFreeBuffer)?;
    buffer.fill(bytes)?;
    handler.handle(buffer)
}

fn run_device(handler: FifoDataHandler<SimulatedChip>, rounds: Receiver<InventoryRoundControl>) {
    let mut number = 0;
    while let Ok(round) = rounds.recv_timeout(Duration::from_secs(2)) {
        thread::sleep(Duration::from_millis(5));
        let bytes = round_bytes(handler.transactor(), &round, number);
        number += 1;
        if let Err(e) = deliver(&handler, &bytes) {
            eprintln!("Device delivery failed: {}", e);
            return;
        }
        let inserted: Vec<u8> = handler.transactor().inserted.lock().drain(..).flatten().collect();
        if !inserted.is_empty() {
            if let Err(e) = deliver(&handler, &inserted) {
                eprintln!("Device delivery failed: {}", e);
            }
            return;
        }
    }
}

fn main() {
    env_logger::init();
    let (tx, rx) = channel::unbounded();
    let chip = SimulatedChip {
        started: tx,
        inserted: Mutex::new(Vec::new()),
        epoch: Instant::now(),
        rounds: AtomicU32::new(0),
    };
    let mut reader = Reader::new(chip, Config::default()).unwrap();
    let handler = reader.data_handler();
    let device = thread::spawn(move || run_device(handler, rx));

    let params = ContinuousInventoryParams {
        round_control: InventoryRoundControl {
            initial_q: 4,
            max_q: 15,
            session: 2,
            ..InventoryRoundControl::default()
        },
        stop_conditions: StopConditions {
            max_number_of_rounds: 10,
            max_duration_us: 2_000_000,
            ..StopConditions::default()
        },
        dual_target: true,
        ..ContinuousInventoryParams::default()
    };

    println!("Running continuous inventory...");
    let summary = reader
        .run_continuous_inventory(params, |packet| {
            if let Some(fields) = packet.tag_read_fields() {
                println!("{:?} EPC {:02X?}", packet.packet_type, fields.epc);
            }
        })
        .unwrap();
    device.join().unwrap();
    info!(
        "Device started {} rounds",
        reader.transactor().rounds.load(Ordering::SeqCst)
    );
    println!("{:?}: {:?}", summary.stop_reason(), summary);
}
