//! Access to the CAN controller hardware
//!
//! [`Transport`] is the register-level contract every controller offers:
//! single register reads and writes, masked modification, bulk buffer
//! transfers and the request to start sending. [`Controller`] builds the
//! operations the driver needs on top of it. Two implementations exist:
//!
//! - [`mailbox::Mailboxes`] for on-chip controllers with memory-mapped
//!   mailboxes
//! - [`mcp2515::Mcp2515`] for the MCP2515 attached over SPI

pub mod mailbox;
pub mod mcp2515;

use crate::bus::ErrorCounters;
use crate::config::{BitTimingRanges, BufferConfig, CanConfig, TimingFields};
use crate::interrupt::Status;
use crate::message::{rx, tx};
use crate::tx_buffers::BufferSet;

/// Register-level access to a controller
pub trait Transport {
    /// Failure of the link to the controller
    type Error;
    /// Register address
    type Register: Copy;
    /// Width of a register
    type Word: Copy;

    /// Read a single register
    fn read(&mut self, register: Self::Register) -> Result<Self::Word, Self::Error>;

    /// Write a single register
    fn write(&mut self, register: Self::Register, value: Self::Word) -> Result<(), Self::Error>;

    /// Replace the bits of `register` selected by `mask` with those of
    /// `value`
    fn bit_modify(
        &mut self,
        register: Self::Register,
        mask: Self::Word,
        value: Self::Word,
    ) -> Result<(), Self::Error>;

    /// Read the frame image of receive buffer `slot` into `out`
    fn read_buffer(&mut self, slot: u8, out: &mut [u8]) -> Result<(), Self::Error>;

    /// Write `bytes` into transmit buffer `slot`. The write is complete when
    /// this returns.
    fn write_buffer(&mut self, slot: u8, bytes: &[u8]) -> Result<(), Self::Error>;

    /// Start transmission of the loaded transmit buffers in `buffers`
    fn request_send(&mut self, buffers: BufferSet) -> Result<(), Self::Error>;
}

/// Operating mode of a controller
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Mode {
    /// Bus activity is stopped and configuration registers are writable
    Configuration,
    /// Sending and receiving
    Normal,
    /// Low power mode, woken up by bus activity or by the driver
    Sleep,
    /// Receiving without acknowledging or sending. Entered by some
    /// controllers when they wake up.
    ListenOnly,
    /// Sent frames are received internally and not put on the bus
    Loopback,
}

/// Placement of the driver's buffers in a controller
///
/// Resolved once from the [`BufferConfig`] when the driver is configured.
/// Buffer indices are relative: transmit buffers `0..tx`, receive buffers
/// `0..rx`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BufferLayout {
    /// Transmit buffers in use
    pub tx: u8,
    /// Receive buffers in use
    pub rx: u8,
    /// Status bit of transmit buffer 0
    pub tx_shift: u8,
    /// Status bit of receive buffer 0
    pub rx_shift: u8,
    /// Hardware slot of receive buffer 0
    pub rx_slot: u8,
}

impl BufferLayout {
    /// Completed transmit buffers flagged in a status word
    pub fn transmitted(&self, raw: u32) -> BufferSet {
        BufferSet((raw >> self.tx_shift) as u8 & BufferSet::first(self.tx).0)
    }

    /// Filled receive buffers flagged in a status word
    pub fn received(&self, raw: u32) -> BufferSet {
        BufferSet((raw >> self.rx_shift) as u8 & BufferSet::first(self.rx).0)
    }

    /// Status bits of the transmit buffers in `set`
    pub fn transmit_bits(&self, set: BufferSet) -> u32 {
        u32::from(set.0 & BufferSet::first(self.tx).0) << self.tx_shift
    }

    /// Status bits of the receive buffers in `set`
    pub fn receive_bits(&self, set: BufferSet) -> u32 {
        u32::from(set.0 & BufferSet::first(self.rx).0) << self.rx_shift
    }

    /// Hardware slot of receive buffer `index`
    pub fn rx_slot(&self, index: u8) -> u8 {
        self.rx_slot + index
    }
}

/// Controller operations used by the driver
///
/// Methods returning `bool` report whether the controller read back what was
/// written.
pub trait Controller: Transport {
    /// Bit timing values the controller accepts
    const TIMING: BitTimingRanges;

    /// `true` if the controller can loop frames back internally
    const SUPPORTS_LOOPBACK: bool;

    /// Place the buffers of `buffers` in the controller. `None` if they do
    /// not fit.
    fn layout(buffers: &BufferConfig) -> Option<BufferLayout>;

    /// Reset the controller into configuration mode
    fn reset(&mut self) -> Result<(), Self::Error>;

    /// Mode the controller reports to be in
    fn mode(&mut self) -> Result<Mode, Self::Error>;

    /// Ask the controller to switch to `mode`
    fn request_mode(&mut self, mode: Mode) -> Result<(), Self::Error>;

    /// Write the bit timing registers
    fn write_timing(
        &mut self,
        timing: &TimingFields,
        config: &CanConfig,
    ) -> Result<bool, Self::Error>;

    /// Set up the buffers of `layout` to accept every frame and enable their
    /// interrupts
    fn configure_buffers(&mut self, layout: &BufferLayout) -> Result<bool, Self::Error>;

    /// `true` if transmit buffer `index` can be loaded
    fn tx_ready(&mut self, index: u8) -> Result<bool, Self::Error>;

    /// Put `message` in transmit buffer `index` without starting it
    fn load(&mut self, index: u8, message: &tx::Message) -> Result<(), Self::Error>;

    /// Read and decode the pending interrupt causes
    fn status(&mut self, layout: &BufferLayout) -> Result<Status, Self::Error>;

    /// Decode the frame in receive buffer `index` and re-arm the buffer
    fn receive(&mut self, layout: &BufferLayout, index: u8) -> Result<rx::Message, Self::Error>;

    /// Clear the interrupt causes of `status`
    fn acknowledge(&mut self, layout: &BufferLayout, status: &Status) -> Result<(), Self::Error>;

    /// Read the transmit and receive error counters
    fn error_counters(&mut self) -> Result<ErrorCounters, Self::Error>;

    /// Bring a sleeping controller into [`Mode::ListenOnly`]
    fn leave_sleep(&mut self) -> Result<(), Self::Error>;
}
