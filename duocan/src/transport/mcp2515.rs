//! MCP2515 stand-alone controller on an SPI bus
//!
//! Every access is one SPI transaction framed by the chip select line: an
//! instruction byte, its arguments, then as many dummy bytes as there are
//! bytes to read. Transactions block until the last byte is clocked out.
//!
//! The controller has three transmit buffers and two receive buffers. Both
//! receive buffers accept every frame; with two in use, a frame arriving
//! while the first one is full rolls over into the second.

use super::{BufferLayout, Controller, Mode, Transport};
use crate::bus::ErrorCounters;
use crate::config::{BitTimingRanges, BufferConfig, CanConfig, TimingFields};
use crate::interrupt::Status;
use crate::message::{
    rx,
    serial::{RawFrame, IMAGE_LEN},
    tx, WireFormat,
};
use crate::tx_buffers::BufferSet;
use bitfield::bitfield;
use embedded_hal::{digital::v2::OutputPin, spi::FullDuplex};

/// Bit timing limits of `CNF1..3`. One time quantum lasts two oscillator
/// periods per prescaler step.
pub(crate) const TIMING: BitTimingRanges = BitTimingRanges {
    sjw: 1..=4,
    prop_seg: 1..=8,
    phase_seg_1: 1..=8,
    phase_seg_2: 2..=8,
    prescaler: 0..=63,
    clock_divisor: 2,
};

const TX_BUFFERS: u8 = 3;
const RX_BUFFERS: u8 = 2;

mod instruction {
    pub const RESET: u8 = 0xC0;
    pub const READ: u8 = 0x03;
    pub const WRITE: u8 = 0x02;
    pub const BIT_MODIFY: u8 = 0x05;
    /// Ored with the buffer number shifted left by one
    pub const LOAD_TX: u8 = 0x40;
    /// Ored with the mask of buffers to send
    pub const RTS: u8 = 0x80;
    /// Ored with the buffer number shifted left by two
    pub const READ_RX: u8 = 0x90;
}

/// Address of a controller register
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Register(pub u8);

#[allow(missing_docs)]
impl Register {
    pub const CANSTAT: Self = Self(0x0E);
    pub const CANCTRL: Self = Self(0x0F);
    pub const TEC: Self = Self(0x1C);
    pub const REC: Self = Self(0x1D);
    pub const CNF3: Self = Self(0x28);
    pub const CNF2: Self = Self(0x29);
    pub const CNF1: Self = Self(0x2A);
    pub const CANINTE: Self = Self(0x2B);
    pub const CANINTF: Self = Self(0x2C);
    pub const EFLG: Self = Self(0x2D);
    pub const RXB0CTRL: Self = Self(0x60);
    pub const RXB1CTRL: Self = Self(0x70);

    /// Control register of transmit buffer `n`
    pub const fn txb_ctrl(n: u8) -> Self {
        Self(0x30 + 0x10 * n)
    }
}

/// Failure of an SPI transaction
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SpiError<S, P> {
    /// The SPI peripheral reported an error
    Bus(S),
    /// The chip select pin could not be driven
    ChipSelect(P),
    /// Buffer number the controller does not have
    OutOfBounds,
}

bitfield! {
    /// Configuration register 1
    #[derive(Copy, Clone, Default, PartialEq, Eq)]
    pub struct Cnf1(u8);
    impl Debug;
    /// Synchronization jump width, minus one
    pub u8, sjw, set_sjw: 7, 6;
    /// Baud rate prescaler, minus one
    pub u8, brp, set_brp: 5, 0;
}

bitfield! {
    /// Configuration register 2
    #[derive(Copy, Clone, Default, PartialEq, Eq)]
    pub struct Cnf2(u8);
    impl Debug;
    /// Phase segment 2 is taken from `CNF3`
    pub btlmode, set_btlmode: 7;
    /// Sample the bit three times
    pub sam, set_sam: 6;
    /// Phase segment 1, minus one
    pub u8, phseg1, set_phseg1: 5, 3;
    /// Propagation segment, minus one
    pub u8, prseg, set_prseg: 2, 0;
}

bitfield! {
    /// Configuration register 3
    #[derive(Copy, Clone, Default, PartialEq, Eq)]
    pub struct Cnf3(u8);
    impl Debug;
    /// Start-of-frame signal on the clock output
    pub sof, set_sof: 7;
    /// Low-pass filter on the wake-up input
    pub wakfil, set_wakfil: 6;
    /// Phase segment 2, minus one
    pub u8, phseg2, set_phseg2: 2, 0;
}

bitfield! {
    /// Interrupt enable and interrupt flag registers
    #[derive(Copy, Clone, Default, PartialEq, Eq)]
    pub struct Interrupts(u8);
    impl Debug;
    /// Receive buffer 0 full
    pub rx0, set_rx0: 0;
    /// Receive buffer 1 full
    pub rx1, set_rx1: 1;
    /// Transmit buffer 0 empty
    pub tx0, set_tx0: 2;
    /// Transmit buffer 1 empty
    pub tx1, set_tx1: 3;
    /// Transmit buffer 2 empty
    pub tx2, set_tx2: 4;
    /// Change in `EFLG`
    pub err, set_err: 5;
    /// Bus activity while asleep
    pub wak, set_wak: 6;
    /// Error while sending or receiving a frame
    pub merr, set_merr: 7;
}

bitfield! {
    /// Error flag register
    #[derive(Copy, Clone, Default, PartialEq, Eq)]
    pub struct Eflg(u8);
    impl Debug;
    /// One of the error counters reached 96
    pub ewarn, _: 0;
    /// Receive error counter reached 96
    pub rxwar, _: 1;
    /// Transmit error counter reached 96
    pub txwar, _: 2;
    /// Receive error counter reached 128
    pub rxep, _: 3;
    /// Transmit error counter reached 128
    pub txep, _: 4;
    /// Transmit error counter reached 255
    pub txbo, _: 5;
    /// Receive buffer 0 overflowed
    pub rx0ovr, set_rx0ovr: 6;
    /// Receive buffer 1 overflowed
    pub rx1ovr, set_rx1ovr: 7;
}

impl Eflg {
    fn overflows() -> Self {
        let mut eflg = Self(0);
        eflg.set_rx0ovr(true);
        eflg.set_rx1ovr(true);
        eflg
    }
}

/// Receive buffer accepts any frame
const RXM_ANY: u8 = 0b11 << 5;
/// Receive buffer 0 rolls over into buffer 1
const BUKT: u8 = 1 << 2;
/// Transmission pending in `TXBnCTRL`
const TXREQ: u8 = 1 << 3;
/// Priority field of `TXBnCTRL`
const TXP: u8 = 0b11;
/// Operation mode fields of `CANCTRL` and `CANSTAT`
const OPMOD_SHIFT: u8 = 5;
const OPMOD_MASK: u8 = 0b111 << OPMOD_SHIFT;

/// Receive buffers occupy the first interrupt flags, transmit buffers
/// start at flag 2
fn layout(buffers: &BufferConfig) -> Option<BufferLayout> {
    if buffers.tx > TX_BUFFERS || buffers.rx > RX_BUFFERS {
        return None;
    }
    Some(BufferLayout {
        tx: buffers.tx,
        rx: buffers.rx,
        tx_shift: 2,
        rx_shift: 0,
        rx_slot: 0,
    })
}

/// MCP2515 behind an SPI bus and its chip select pin
pub struct Mcp2515<SPI, CS> {
    spi: SPI,
    cs: CS,
    /// Mirror of `CANINTE`
    enabled: u8,
}

type Error<SPI, CS> = SpiError<<SPI as FullDuplex<u8>>::Error, <CS as OutputPin>::Error>;

impl<SPI, CS> Mcp2515<SPI, CS>
where
    SPI: FullDuplex<u8>,
    CS: OutputPin,
{
    /// Wraps the SPI bus and the chip select pin. The pin should already be
    /// high.
    pub fn new(spi: SPI, cs: CS) -> Self {
        Self { spi, cs, enabled: 0 }
    }

    /// Gives back the SPI bus and the chip select pin
    pub fn release(self) -> (SPI, CS) {
        (self.spi, self.cs)
    }

    /// Sends `command`, then clocks in `response`. The chip select line is
    /// released even if the transfer fails.
    fn exchange(&mut self, command: &[u8], response: &mut [u8]) -> Result<(), Error<SPI, CS>> {
        self.cs.set_low().map_err(SpiError::ChipSelect)?;
        let transferred = self.transfer(command, response);
        let released = self.cs.set_high().map_err(SpiError::ChipSelect);
        transferred.map_err(SpiError::Bus)?;
        released
    }

    fn transfer(&mut self, command: &[u8], response: &mut [u8]) -> Result<(), SPI::Error> {
        for &byte in command {
            nb::block!(self.spi.send(byte))?;
            nb::block!(self.spi.read())?;
        }
        for byte in response {
            nb::block!(self.spi.send(0))?;
            *byte = nb::block!(self.spi.read())?;
        }
        Ok(())
    }
}

impl<SPI, CS> Transport for Mcp2515<SPI, CS>
where
    SPI: FullDuplex<u8>,
    CS: OutputPin,
{
    type Error = Error<SPI, CS>;
    type Register = Register;
    type Word = u8;

    fn read(&mut self, register: Register) -> Result<u8, Self::Error> {
        let mut value = [0];
        self.exchange(&[instruction::READ, register.0], &mut value)?;
        Ok(value[0])
    }

    fn write(&mut self, register: Register, value: u8) -> Result<(), Self::Error> {
        self.exchange(&[instruction::WRITE, register.0, value], &mut [])
    }

    fn bit_modify(&mut self, register: Register, mask: u8, value: u8) -> Result<(), Self::Error> {
        self.exchange(&[instruction::BIT_MODIFY, register.0, mask, value], &mut [])
    }

    fn read_buffer(&mut self, slot: u8, out: &mut [u8]) -> Result<(), Self::Error> {
        if slot >= RX_BUFFERS {
            return Err(SpiError::OutOfBounds);
        }
        let len = out.len().min(IMAGE_LEN);
        self.exchange(&[instruction::READ_RX | slot << 2], &mut out[..len])
    }

    fn write_buffer(&mut self, slot: u8, bytes: &[u8]) -> Result<(), Self::Error> {
        if slot >= TX_BUFFERS {
            return Err(SpiError::OutOfBounds);
        }
        let mut command = [0; 1 + IMAGE_LEN];
        let len = bytes.len().min(IMAGE_LEN);
        command[0] = instruction::LOAD_TX | slot << 1;
        command[1..=len].copy_from_slice(&bytes[..len]);
        self.exchange(&command[..=len], &mut [])
    }

    fn request_send(&mut self, buffers: BufferSet) -> Result<(), Self::Error> {
        let mask = buffers.0 & BufferSet::first(TX_BUFFERS).0;
        if mask == 0 {
            return Ok(());
        }
        self.exchange(&[instruction::RTS | mask], &mut [])
    }
}

impl<SPI, CS> Controller for Mcp2515<SPI, CS>
where
    SPI: FullDuplex<u8>,
    CS: OutputPin,
{
    const TIMING: BitTimingRanges = TIMING;

    const SUPPORTS_LOOPBACK: bool = true;

    fn layout(buffers: &BufferConfig) -> Option<BufferLayout> {
        layout(buffers)
    }

    fn reset(&mut self) -> Result<(), Self::Error> {
        self.enabled = 0;
        self.exchange(&[instruction::RESET], &mut [])
    }

    fn mode(&mut self) -> Result<Mode, Self::Error> {
        let canstat = self.read(Register::CANSTAT)?;
        Ok(match (canstat & OPMOD_MASK) >> OPMOD_SHIFT {
            0 => Mode::Normal,
            1 => Mode::Sleep,
            2 => Mode::Loopback,
            3 => Mode::ListenOnly,
            4 => Mode::Configuration,
            // Invalid encodings; never taken for configuration mode
            _ => Mode::Normal,
        })
    }

    fn request_mode(&mut self, mode: Mode) -> Result<(), Self::Error> {
        let reqop = match mode {
            Mode::Normal => 0,
            Mode::Sleep => 1,
            Mode::Loopback => 2,
            Mode::ListenOnly => 3,
            Mode::Configuration => 4,
        };
        self.bit_modify(Register::CANCTRL, OPMOD_MASK, reqop << OPMOD_SHIFT)
    }

    fn write_timing(&mut self, timing: &TimingFields, config: &CanConfig) -> Result<bool, Self::Error> {
        let mut cnf1 = Cnf1(0);
        cnf1.set_sjw(timing.sjw);
        cnf1.set_brp(timing.prescaler);
        let mut cnf2 = Cnf2(0);
        cnf2.set_btlmode(true);
        cnf2.set_phseg1(timing.phase_seg_1);
        cnf2.set_prseg(timing.prop_seg);
        let mut cnf3 = Cnf3(0);
        cnf3.set_wakfil(config.wake_filter);
        cnf3.set_phseg2(timing.phase_seg_2);

        let written = [
            (Register::CNF1, cnf1.0),
            (Register::CNF2, cnf2.0),
            (Register::CNF3, cnf3.0),
        ];
        for (register, value) in written {
            self.write(register, value)?;
        }
        let mut verified = true;
        for (register, value) in written {
            verified &= self.read(register)? == value;
        }
        Ok(verified)
    }

    fn configure_buffers(&mut self, layout: &BufferLayout) -> Result<bool, Self::Error> {
        let rollover = if layout.rx == RX_BUFFERS { BUKT } else { 0 };
        self.write(Register::RXB0CTRL, RXM_ANY | rollover)?;
        self.write(Register::RXB1CTRL, RXM_ANY)?;
        for n in 0..TX_BUFFERS {
            self.write(Register::txb_ctrl(n), 0)?;
        }

        let mut enabled = Interrupts(
            (layout.receive_bits(BufferSet::all()) | layout.transmit_bits(BufferSet::all())) as u8,
        );
        enabled.set_err(true);
        enabled.set_wak(true);
        enabled.set_merr(true);
        self.enabled = enabled.0;
        self.write(Register::CANINTE, enabled.0)?;
        self.write(Register::CANINTF, 0)?;
        Ok(self.read(Register::CANINTE)? == enabled.0)
    }

    fn tx_ready(&mut self, index: u8) -> Result<bool, Self::Error> {
        if index >= TX_BUFFERS {
            return Err(SpiError::OutOfBounds);
        }
        Ok(self.read(Register::txb_ctrl(index))? & TXREQ == 0)
    }

    fn load(&mut self, index: u8, message: &tx::Message) -> Result<(), Self::Error> {
        if index >= TX_BUFFERS {
            return Err(SpiError::OutOfBounds);
        }
        self.bit_modify(Register::txb_ctrl(index), TXP, message.priority() as u8)?;
        let image = RawFrame::encode(message);
        self.write_buffer(index, image.as_bytes())
    }

    fn status(&mut self, layout: &BufferLayout) -> Result<Status, Self::Error> {
        let flags = Interrupts(self.read(Register::CANINTF)? & self.enabled);
        let overflow = if flags.err() {
            Eflg(self.read(Register::EFLG)?).0 & Eflg::overflows().0 != 0
        } else {
            false
        };
        Ok(Status {
            transmitted: layout.transmitted(flags.0.into()),
            received: layout.received(flags.0.into()),
            bus_error: flags.merr() || (flags.err() && !overflow),
            overflow,
            wake: flags.wak(),
            raw: flags.0.into(),
        })
    }

    fn receive(&mut self, layout: &BufferLayout, index: u8) -> Result<rx::Message, Self::Error> {
        // Reading through READ_RX clears the buffer's interrupt flag
        let mut image = RawFrame::default();
        self.read_buffer(layout.rx_slot(index), &mut image.0)?;
        Ok(image.decode())
    }

    fn acknowledge(&mut self, layout: &BufferLayout, status: &Status) -> Result<(), Self::Error> {
        let clear = status.raw as u8 & !(layout.receive_bits(BufferSet::all()) as u8);
        if clear != 0 {
            self.bit_modify(Register::CANINTF, clear, 0)?;
        }
        if status.overflow {
            self.bit_modify(Register::EFLG, Eflg::overflows().0, 0)?;
        }
        Ok(())
    }

    fn error_counters(&mut self) -> Result<ErrorCounters, Self::Error> {
        Ok(ErrorCounters {
            transmit: self.read(Register::TEC)?,
            receive: self.read(Register::REC)?,
        })
    }

    fn leave_sleep(&mut self) -> Result<(), Self::Error> {
        // Setting the wake-up flag while its interrupt is enabled wakes the
        // controller into listen-only mode
        let mut wak = Interrupts(0);
        wak.set_wak(true);
        self.bit_modify(Register::CANINTF, wak.0, wak.0)?;
        self.bit_modify(Register::CANINTF, wak.0, 0)
    }
}
