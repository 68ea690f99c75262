#![allow(dead_code)]

use duocan::bus::Handlers;
use duocan::core::fugit::HertzU32;
use duocan::message::rx;
use embedded_hal::{digital::v2::OutputPin, spi::FullDuplex};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

pub const CANSTAT: u8 = 0x0E;
pub const CANCTRL: u8 = 0x0F;
pub const TEC: u8 = 0x1C;
pub const REC: u8 = 0x1D;
pub const CNF3: u8 = 0x28;
pub const CNF2: u8 = 0x29;
pub const CNF1: u8 = 0x2A;
pub const CANINTE: u8 = 0x2B;
pub const CANINTF: u8 = 0x2C;
pub const EFLG: u8 = 0x2D;
pub const RXB0CTRL: u8 = 0x60;

pub const WAKIF: u8 = 1 << 6;
pub const ERRIF: u8 = 1 << 5;
pub const TXREQ: u8 = 1 << 3;

const SLEEP: u8 = 1;
const LOOPBACK: u8 = 2;
const LISTEN_ONLY: u8 = 3;
const CONFIGURATION: u8 = 4;

pub const fn txb_ctrl(n: u8) -> u8 {
    0x30 + 0x10 * n
}

pub const fn rxb_ctrl(n: u8) -> u8 {
    0x60 + 0x10 * n
}

/// Register file and SPI command interpreter of an MCP2515
pub struct Chip {
    regs: [u8; 128],
    selected: bool,
    transaction: Vec<u8>,
    last: u8,
    /// Buffer images at the time `RTS` was issued
    pub sent: Vec<(u8, [u8; 13])>,
    /// Number of writes to `CNF1..3`
    pub timing_writes: usize,
    /// Number of transactions
    pub transactions: usize,
    /// `OPMOD` stays put when a mode is requested
    pub stuck: bool,
    /// Every transfer fails
    pub broken: bool,
    /// Nothing answers on the bus; every byte reads back as `0xFF`
    pub unresponsive: bool,
}

impl Chip {
    fn new() -> Self {
        Self {
            regs: [0; 128],
            selected: false,
            transaction: Vec::new(),
            last: 0,
            sent: Vec::new(),
            timing_writes: 0,
            transactions: 0,
            stuck: false,
            broken: false,
            unresponsive: false,
        }
    }

    pub fn reg(&self, address: u8) -> u8 {
        self.regs[usize::from(address)]
    }

    /// Change a register the way the controller itself would
    pub fn set_reg(&mut self, address: u8, value: u8) {
        self.regs[usize::from(address)] = value;
    }

    /// Operation mode reported in `CANSTAT`
    pub fn opmod(&self) -> u8 {
        self.reg(CANSTAT) >> 5
    }

    /// Image of transmit buffer `n`
    pub fn tx_image(&self, n: u8) -> [u8; 13] {
        let start = usize::from(txb_ctrl(n)) + 1;
        self.regs[start..start + 13].try_into().unwrap()
    }

    /// Transmit buffer `n` finished sending
    pub fn complete_tx(&mut self, n: u8) {
        self.regs[usize::from(txb_ctrl(n))] &= !TXREQ;
        self.regs[usize::from(CANINTF)] |= 1 << (2 + n);
    }

    /// A frame arrives in receive buffer `n`
    pub fn inject_rx(&mut self, n: u8, image: &[u8]) {
        let start = usize::from(rxb_ctrl(n)) + 1;
        self.regs[start..start + image.len()].copy_from_slice(image);
        self.regs[usize::from(CANINTF)] |= 1 << n;
    }

    fn reset(&mut self) {
        self.regs = [0; 128];
        self.regs[usize::from(CANSTAT)] = CONFIGURATION << 5;
        self.regs[usize::from(CANCTRL)] = (CONFIGURATION << 5) | 0x07;
    }

    fn write_reg(&mut self, address: u8, value: u8) {
        match address {
            CANSTAT => {}
            CANCTRL => {
                self.regs[usize::from(CANCTRL)] = value;
                if !self.stuck && self.opmod() != SLEEP {
                    self.set_opmod(value >> 5);
                }
            }
            CANINTF => {
                let rising = value & !self.reg(CANINTF);
                self.regs[usize::from(CANINTF)] = value;
                let wake_enabled = self.reg(CANINTE) & WAKIF != 0;
                if rising & WAKIF != 0 && wake_enabled && self.opmod() == SLEEP {
                    self.set_opmod(LISTEN_ONLY);
                }
            }
            CNF3 | CNF2 | CNF1 => {
                self.timing_writes += 1;
                // CNF3 bits 5..3 are not implemented
                let value = if address == CNF3 { value & 0xC7 } else { value };
                self.regs[usize::from(address)] = value;
            }
            _ => self.regs[usize::from(address)] = value,
        }
    }

    fn set_opmod(&mut self, opmod: u8) {
        let canstat = &mut self.regs[usize::from(CANSTAT)];
        *canstat = (*canstat & 0x1F) | (opmod << 5);
    }

    /// Consume one byte of the current transaction, returning the byte the
    /// controller shifts out meanwhile
    fn clock(&mut self, byte: u8) -> u8 {
        let position = self.transaction.len();
        self.transaction.push(byte);
        let instruction = self.transaction[0];
        match instruction {
            0x03 if position >= 2 => {
                let address = self.transaction[1] as usize + position - 2;
                self.regs[address % 128]
            }
            0x02 if position >= 2 => {
                let address = (self.transaction[1] as usize + position - 2) as u8;
                self.write_reg(address, byte);
                0
            }
            0x05 if position == 3 => {
                let (address, mask) = (self.transaction[1], self.transaction[2]);
                let value = (self.reg(address) & !mask) | (byte & mask);
                self.write_reg(address, value);
                0
            }
            0x40..=0x45 if position >= 1 => {
                let buffer = (instruction >> 1) & 0x03;
                let offset = if instruction & 1 == 0 { 1 } else { 6 };
                let address = usize::from(txb_ctrl(buffer)) + offset + position - 1;
                self.regs[address] = byte;
                0
            }
            0x90..=0x96 if position >= 1 => {
                let buffer = (instruction >> 2) & 0x01;
                let offset = if instruction & 0x02 == 0 { 1 } else { 6 };
                let address = usize::from(rxb_ctrl(buffer)) + offset + position - 1;
                self.regs[address % 128]
            }
            _ => 0,
        }
    }

    fn deselect(&mut self) {
        let transaction = std::mem::take(&mut self.transaction);
        self.selected = false;
        if transaction.is_empty() {
            return;
        }
        self.transactions += 1;
        match transaction[0] {
            0xC0 => self.reset(),
            rts @ 0x81..=0x87 => {
                for n in (0..3).filter(|&n| rts & (1 << n) != 0) {
                    self.regs[usize::from(txb_ctrl(n))] |= TXREQ;
                    let image = self.tx_image(n);
                    self.sent.push((n, image));
                    if self.opmod() == LOOPBACK {
                        self.complete_tx(n);
                        self.inject_rx(0, &image);
                    }
                }
            }
            read_rx @ 0x90..=0x96 => {
                let buffer = (read_rx >> 2) & 0x01;
                self.regs[usize::from(CANINTF)] &= !(1 << buffer);
            }
            _ => {}
        }
    }
}

/// Failure injected into the simulated SPI bus
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SpiFault;

/// The SPI side of a simulated MCP2515
pub struct SimSpi(Rc<RefCell<Chip>>);

/// The chip select side of a simulated MCP2515
pub struct SimCs(Rc<RefCell<Chip>>);

/// A simulated MCP2515, split into its SPI bus and chip select pin
pub fn sim_mcp2515() -> (SimSpi, SimCs, Rc<RefCell<Chip>>) {
    let chip = Rc::new(RefCell::new(Chip::new()));
    (SimSpi(chip.clone()), SimCs(chip.clone()), chip)
}

impl FullDuplex<u8> for SimSpi {
    type Error = SpiFault;

    fn read(&mut self) -> nb::Result<u8, SpiFault> {
        let chip = self.0.borrow();
        if chip.broken {
            return Err(nb::Error::Other(SpiFault));
        }
        Ok(chip.last)
    }

    fn send(&mut self, byte: u8) -> nb::Result<(), SpiFault> {
        let mut chip = self.0.borrow_mut();
        if chip.broken {
            return Err(nb::Error::Other(SpiFault));
        }
        chip.last = if chip.selected && !chip.unresponsive {
            chip.clock(byte)
        } else {
            0xFF
        };
        Ok(())
    }
}

impl OutputPin for SimCs {
    type Error = core::convert::Infallible;

    fn set_low(&mut self) -> Result<(), Self::Error> {
        let mut chip = self.0.borrow_mut();
        chip.selected = true;
        chip.transaction.clear();
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        let mut chip = self.0.borrow_mut();
        if chip.selected {
            chip.deselect();
        }
        Ok(())
    }
}

/// Clock and transceiver line of a test board
pub struct Board {
    pub clock: HertzU32,
    pub transceiver: Rc<Cell<bool>>,
}

impl Board {
    pub fn new(clock: HertzU32) -> (Self, Rc<Cell<bool>>) {
        let transceiver = Rc::new(Cell::new(false));
        (
            Self {
                clock,
                transceiver: transceiver.clone(),
            },
            transceiver,
        )
    }
}

unsafe impl duocan::core::Dependencies for Board {
    fn can_clock(&self) -> HertzU32 {
        self.clock
    }

    fn set_transceiver(&mut self, enabled: bool) {
        self.transceiver.set(enabled);
    }
}

/// Handlers that keep everything they are given
#[derive(Default)]
pub struct Recorder {
    pub received: Vec<(u8, rx::Message)>,
    pub transmitted: Vec<u8>,
}

impl Handlers for Recorder {
    fn on_receive(&mut self, buffer: u8, message: &rx::Message) {
        self.received.push((buffer, *message));
    }

    fn on_transmit(&mut self, buffer: u8) {
        self.transmitted.push(buffer);
    }
}
