mod common;

use common::*;
use duocan::bus::{Can, CanConfigurable, Error, ErrorCounters, Fault};
use duocan::config::{BufferConfig, CanConfig, RxNumbering};
use duocan::embedded_can::{ExtendedId, Id, StandardId};
use duocan::interrupt::Diagnostics;
use duocan::message::{tx, FrameKind};
use duocan::prelude::*;
use duocan::transport::mcp2515::{Mcp2515, SpiError};
use duocan::transport::Mode;
use duocan::tx_buffers::BufferSet;
use fugit::RateExtU32;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

type Driver = Can<Mcp2515<SimSpi, SimCs>, Board, Recorder>;

fn config(rx: u8, tx: u8) -> CanConfig {
    let mut config = CanConfig::new(125.kHz());
    config.buffers = BufferConfig { rx, tx };
    config
}

fn start(config: CanConfig) -> (Driver, Rc<RefCell<Chip>>, Rc<Cell<bool>>) {
    let (spi, cs, chip) = sim_mcp2515();
    let (board, transceiver) = Board::new(16.MHz());
    let can = Can::new(Mcp2515::new(spi, cs), board, config, Recorder::default()).unwrap();
    (can, chip, transceiver)
}

fn std_id(raw: u16) -> StandardId {
    StandardId::new(raw).unwrap()
}

#[test]
fn init_writes_timing_and_enters_normal() {
    let (can, chip, transceiver) = start(config(2, 3));
    let chip = chip.borrow();
    assert_eq!(can.mode(), Mode::Normal);
    assert_eq!(chip.opmod(), 0);
    assert!(transceiver.get());
    // 16 MHz / (2 * 4 * 16) = 125 kHz
    assert_eq!(chip.reg(CNF1), 0x03);
    assert_eq!(chip.reg(CNF2), 0xB1);
    assert_eq!(chip.reg(CNF3), 0x05);
    // Both receive buffers accept everything, with rollover
    assert_eq!(chip.reg(RXB0CTRL), 0x64);
    assert_eq!(chip.reg(rxb_ctrl(1)), 0x60);
    assert_eq!(chip.reg(CANINTE), 0xFF);
    assert_eq!(can.free_buffers(), BufferSet(0b111));
}

#[test]
fn single_receive_buffer_does_not_roll_over() {
    let (_can, chip, _) = start(config(1, 1));
    let chip = chip.borrow();
    assert_eq!(chip.reg(RXB0CTRL), 0x60);
    assert_eq!(chip.reg(CANINTE), 0b1110_0101);
}

#[test]
fn wake_filter_is_configurable() {
    let mut config = config(1, 1);
    config.wake_filter = true;
    let (_can, chip, _) = start(config);
    assert_eq!(chip.borrow().reg(CNF3), 0x45);
}

#[test]
fn configuration_can_change_before_finalize() {
    let (spi, cs, chip) = sim_mcp2515();
    let (board, _) = Board::new(16.MHz());
    let mut can = CanConfigurable::new(Mcp2515::new(spi, cs), board, config(1, 1)).unwrap();
    assert_eq!(chip.borrow().opmod(), 4);
    can.config().timing.bitrate = 250.kHz();
    let can = can.finalize(Recorder::default()).unwrap();
    assert_eq!(chip.borrow().reg(CNF1), 0x01);
    assert_eq!(can.config().timing.bitrate, 250.kHz::<1, 1>());
}

#[test]
fn too_many_buffers_are_rejected_before_reset() {
    let (spi, cs, chip) = sim_mcp2515();
    let (board, _) = Board::new(16.MHz());
    let result = CanConfigurable::new(Mcp2515::new(spi, cs), board, config(1, 4));
    assert!(matches!(result, Err(Error::InvalidArgument)));
    assert_eq!(chip.borrow().transactions, 0);
}

#[test]
fn bad_timing_is_rejected() {
    let (spi, cs, _) = sim_mcp2515();
    let (board, _) = Board::new(16.MHz());
    let mut config = config(1, 1);
    config.timing.phase_seg_2 = 1;
    let result = CanConfigurable::new(Mcp2515::new(spi, cs), board, config);
    assert!(matches!(result, Err(Error::InvalidTiming(_))));
}

#[test]
fn silent_chip_fails_reset_check() {
    let (spi, cs, chip) = sim_mcp2515();
    chip.borrow_mut().unresponsive = true;
    let (board, transceiver) = Board::new(16.MHz());
    let result = CanConfigurable::new(Mcp2515::new(spi, cs), board, config(1, 1));
    assert!(matches!(result, Err(Error::HardwareFault(Fault::Reset))));
    assert!(!transceiver.get());
}

#[test]
fn send_loads_buffer_and_requests_transmission() {
    let (mut can, chip, _) = start(config(2, 1));
    can.send(0, std_id(0x123), &[0xAA, 0xBB]).unwrap();

    let sent = chip.borrow().sent.clone();
    assert_eq!(sent.len(), 1);
    let (buffer, image) = sent[0];
    assert_eq!(buffer, 0);
    assert_eq!(image[..7], [0x24, 0x60, 0x00, 0x00, 0x02, 0xAA, 0xBB]);
    assert!(can.in_flight(0).is_some());
    assert_eq!(can.free_buffers(), BufferSet(0));
}

#[test]
fn transmit_complete_frees_buffer_once() {
    let (mut can, chip, _) = start(config(2, 1));
    can.send(0, std_id(0x123), &[0xAA, 0xBB]).unwrap();
    assert!(matches!(
        can.send(0, std_id(0x124), &[]),
        Err(Error::Busy)
    ));

    chip.borrow_mut().complete_tx(0);
    can.on_interrupt();
    can.on_interrupt();

    assert_eq!(can.handlers().transmitted, [0]);
    assert_eq!(can.free_buffers(), BufferSet(0b1));
    assert!(can.in_flight(0).is_none());
    assert_eq!(chip.borrow().reg(CANINTF), 0);
    can.send(0, std_id(0x124), &[]).unwrap();
}

#[test]
fn receive_complete_reaches_handler() {
    let (mut can, chip, _) = start(config(2, 1));
    chip.borrow_mut()
        .inject_rx(0, &[0x00, 0xE0, 0x00, 0x00, 0x01, 0x01]);
    can.on_interrupt();

    let received = &can.handlers().received;
    assert_eq!(received.len(), 1);
    let (buffer, message) = received[0];
    assert_eq!(buffer, 0);
    assert_eq!(message.kind(), FrameKind::Data);
    assert_eq!(message.id(), Id::Standard(std_id(0x7)));
    assert_eq!(message.data(), [0x01]);
    assert_eq!(chip.borrow().reg(CANINTF), 0);
}

#[test]
fn both_receive_buffers_in_order() {
    let (mut can, chip, _) = start(config(2, 1));
    {
        let mut chip = chip.borrow_mut();
        chip.inject_rx(1, &[0x00, 0x40, 0x00, 0x00, 0x00]);
        chip.inject_rx(0, &[0x00, 0x20, 0x00, 0x00, 0x00]);
    }
    can.on_interrupt();
    let buffers: Vec<_> = can
        .handlers()
        .received
        .iter()
        .map(|(buffer, message)| (*buffer, message.id()))
        .collect();
    assert_eq!(
        buffers,
        [
            (0, Id::Standard(std_id(1))),
            (1, Id::Standard(std_id(2)))
        ]
    );
}

#[test]
fn slot_numbering_matches_relative_on_serial_controller() {
    let mut config = config(2, 1);
    config.rx_numbering = RxNumbering::Slot;
    let (mut can, chip, _) = start(config);
    chip.borrow_mut()
        .inject_rx(1, &[0x00, 0x20, 0x00, 0x00, 0x00]);
    can.on_interrupt();
    assert_eq!(can.handlers().received[0].0, 1);
}

#[test]
fn extended_remote_request_is_received() {
    let (mut can, chip, _) = start(config(1, 1));
    // 0x12345678, remote, requesting 4 bytes
    chip.borrow_mut()
        .inject_rx(0, &[0x91, 0xA8, 0x56, 0x78, 0x44]);
    can.on_interrupt();
    let (_, message) = can.handlers().received[0];
    assert_eq!(
        message.id(),
        Id::Extended(ExtendedId::new(0x1234_5678).unwrap())
    );
    assert_eq!(message.kind(), FrameKind::Remote);
    assert_eq!(message.decoded_dlc(), 4);
    assert!(message.data().is_empty());
}

#[test]
fn send_any_takes_lowest_free_buffer() {
    let (mut can, chip, _) = start(config(1, 3));
    assert_eq!(can.send_any(std_id(1), &[1]).unwrap(), 0);
    assert_eq!(can.send_any(std_id(2), &[2]).unwrap(), 1);
    assert_eq!(can.send_any(std_id(3), &[3]).unwrap(), 2);
    assert!(matches!(can.send_any(std_id(4), &[4]), Err(Error::Busy)));

    chip.borrow_mut().complete_tx(1);
    can.on_interrupt();
    assert_eq!(can.send_any(std_id(5), &[5]).unwrap(), 1);
}

#[test]
fn invalid_sends_are_rejected() {
    let (mut can, chip, _) = start(config(1, 1));
    assert!(matches!(
        can.send(1, std_id(1), &[]),
        Err(Error::InvalidArgument)
    ));
    assert!(matches!(
        can.send(0, std_id(1), &[0; 9]),
        Err(Error::InvalidArgument)
    ));
    assert!(matches!(can.abort(0), Err(Error::NotSupported)));
    assert!(chip.borrow().sent.is_empty());
    assert_eq!(can.free_buffers(), BufferSet(0b1));
}

#[test]
fn pending_hardware_buffer_is_busy_and_released() {
    let (mut can, chip, _) = start(config(1, 1));
    chip.borrow_mut().set_reg(txb_ctrl(0), TXREQ);
    assert!(matches!(can.send(0, std_id(1), &[]), Err(Error::Busy)));
    assert_eq!(can.free_buffers(), BufferSet(0b1));
}

#[test]
fn priority_lands_in_transmit_control() {
    let (mut can, chip, _) = start(config(1, 2));
    let message = tx::MessageBuilder {
        id: Id::Standard(std_id(0x10)),
        frame_type: tx::FrameType::Data(&[]),
        priority: tx::Priority::Highest,
    }
    .build()
    .unwrap();
    can.send_message(1, &message).unwrap();
    assert_eq!(chip.borrow().reg(txb_ctrl(1)) & 0x03, 3);
    assert_eq!(can.in_flight(1).map(|m| m.priority()), Some(tx::Priority::Highest));
}

#[test]
fn remote_request_has_no_data() {
    let (mut can, chip, _) = start(config(1, 1));
    can.send_remote(0, std_id(0x7FF)).unwrap();
    let (_, image) = chip.borrow().sent[0];
    assert_eq!(image[..5], [0xFF, 0xF0, 0x00, 0x00, 0x40]);
}

#[test]
fn loopback_returns_own_frames() {
    let mut config = config(1, 1);
    config.loopback = true;
    let (mut can, chip, _) = start(config);
    assert_eq!(can.mode(), Mode::Loopback);
    assert_eq!(chip.borrow().opmod(), 2);

    can.send(0, std_id(0x321), &[1, 2, 3]).unwrap();
    can.on_interrupt();
    assert_eq!(can.handlers().transmitted, [0]);
    let (_, message) = can.handlers().received[0];
    assert_eq!(message.id(), Id::Standard(std_id(0x321)));
    assert_eq!(message.data(), [1, 2, 3]);
}

#[test]
fn sleep_and_wake_keep_timing() {
    let (mut can, chip, transceiver) = start(config(1, 1));
    let timing_writes = chip.borrow().timing_writes;

    can.sleep().unwrap();
    assert_eq!(can.mode(), Mode::Sleep);
    assert_eq!(chip.borrow().opmod(), 1);
    assert!(!transceiver.get());
    assert!(matches!(can.send(0, std_id(1), &[]), Err(Error::Busy)));

    can.wake().unwrap();
    assert_eq!(can.mode(), Mode::Normal);
    assert_eq!(chip.borrow().opmod(), 0);
    assert!(transceiver.get());
    assert_eq!(chip.borrow().timing_writes, timing_writes);
    assert_eq!(chip.borrow().reg(CANINTF) & WAKIF, 0);
    can.send(0, std_id(1), &[]).unwrap();
}

#[test]
fn refused_sleep_is_reported() {
    let (mut can, chip, transceiver) = start(config(1, 1));
    chip.borrow_mut().stuck = true;
    assert!(matches!(can.sleep(), Err(Error::HardwareFault(Fault::Mode))));
    assert_eq!(can.mode(), Mode::Normal);
    assert!(transceiver.get());
}

#[test]
fn wake_without_sleep_does_nothing() {
    let (mut can, chip, _) = start(config(1, 1));
    let transactions = chip.borrow().transactions;
    can.wake().unwrap();
    assert_eq!(chip.borrow().transactions, transactions);
}

#[test]
fn overflow_and_wake_are_counted() {
    let (mut can, chip, _) = start(config(1, 1));
    {
        let mut chip = chip.borrow_mut();
        chip.set_reg(EFLG, 0x40);
        chip.set_reg(CANINTF, ERRIF | WAKIF);
    }
    can.on_interrupt();
    assert_eq!(
        can.diagnostics(),
        Diagnostics {
            overflows: 1,
            wakeups: 1,
            ..Default::default()
        }
    );
    assert_eq!(chip.borrow().reg(CANINTF), 0);
    assert_eq!(chip.borrow().reg(EFLG), 0);
}

#[test]
fn message_error_is_a_bus_error() {
    let (mut can, chip, _) = start(config(1, 1));
    chip.borrow_mut().set_reg(CANINTF, 0x80);
    can.on_interrupt();
    assert_eq!(can.diagnostics().bus_errors, 1);
    assert!(can.handlers().received.is_empty());
}

#[test]
fn error_counters_are_read() {
    let (mut can, chip, _) = start(config(1, 1));
    {
        let mut chip = chip.borrow_mut();
        chip.set_reg(TEC, 100);
        chip.set_reg(REC, 3);
    }
    let counters = can.error_counters().unwrap();
    assert_eq!(
        counters,
        ErrorCounters {
            transmit: 100,
            receive: 3
        }
    );
    assert_eq!(counters.state(), duocan::bus::ErrorState::Warning);
}

#[test]
fn broken_link_is_counted_in_interrupt_and_reported_on_send() {
    let (mut can, chip, _) = start(config(1, 1));
    chip.borrow_mut().broken = true;
    can.on_interrupt();
    assert_eq!(can.diagnostics().transport_faults, 1);

    assert_eq!(
        can.send(0, std_id(1), &[]),
        Err(Error::Transport(SpiError::Bus(SpiFault)))
    );
    assert_eq!(can.free_buffers(), BufferSet(0b1));
    assert!(can.in_flight(0).is_none());
}

#[test]
fn release_returns_parts() {
    let (can, _, _) = start(config(1, 1));
    let (controller, board) = can.release();
    assert_eq!(board.clock, 16.MHz::<1, 1>());
    let (_spi, _cs) = controller.release();
}
