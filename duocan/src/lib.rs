#![no_std]
#![warn(missing_docs)]
//! # duocan
//!
//! ## Overview
//! This crate provides a platform-agnostic driver for classic CAN
//! controllers of two kinds:
//!
//! - on-chip controllers with eight memory-mapped mailboxes, each of which
//!   acts as a transmit or a receive buffer ([`Mailboxes`])
//! - the MCP2515 stand-alone controller reached over SPI ([`Mcp2515`])
//!
//! Both are driven through the same [`Can`] instance. It provides
//!
//! - bit timing derived from a bitrate and segment lengths, checked against
//!   what the controller accepts
//! - message transmission from numbered transmit buffers, with priorities
//! - interrupt driven completion of transmissions and receptions, reported
//!   to application [`Handlers`]
//! - sleep and wake-up of controller and transceiver
//! - error counters and counts of bus errors, overflows and wake-ups
//!
//! Every frame is accepted; there is no acceptance filtering.
//!
//! In order to use the driver, one has to instantiate [`CanConfigurable`]
//! and [`finalize`] it. Its constructor requires the controller and an
//! instance of a [`Dependencies`] implementing struct, and holds onto both
//! until they are [`released`].
//!
//! ## General usage example
//!
//! ```no_run
//! # use core::convert::Infallible;
//! # struct Spi;
//! # impl embedded_hal::spi::FullDuplex<u8> for Spi {
//! #     type Error = Infallible;
//! #     fn read(&mut self) -> nb::Result<u8, Infallible> { Ok(0) }
//! #     fn send(&mut self, _: u8) -> nb::Result<(), Infallible> { Ok(()) }
//! # }
//! # struct Pin;
//! # impl embedded_hal::digital::v2::OutputPin for Pin {
//! #     type Error = Infallible;
//! #     fn set_low(&mut self) -> Result<(), Infallible> { Ok(()) }
//! #     fn set_high(&mut self) -> Result<(), Infallible> { Ok(()) }
//! # }
//! # struct Board;
//! # unsafe impl duocan::core::Dependencies for Board {
//! #     fn can_clock(&self) -> fugit::HertzU32 { fugit::HertzU32::MHz(16) }
//! #     fn set_transceiver(&mut self, _: bool) {}
//! # }
//! use duocan::bus::CanConfigurable;
//! use duocan::config::CanConfig;
//! use duocan::embedded_can::StandardId;
//! use duocan::prelude::*;
//! use duocan::transport::mcp2515::Mcp2515;
//! use fugit::RateExtU32 as _;
//!
//! let controller = Mcp2515::new(Spi, Pin);
//! let mut can = CanConfigurable::new(controller, Board, CanConfig::new(125.kHz())).unwrap();
//!
//! // The controller waits in configuration mode and the config struct can
//! // still be changed. More information can be found in `duocan::config`.
//! can.config().buffers.rx = 2;
//! can.config().buffers.tx = 3;
//!
//! let mut can = can
//!     .finalize((
//!         |buffer: u8, message: &duocan::message::rx::Message| {
//!             let _ = (buffer, message.id(), message.data());
//!         },
//!         |_buffer: u8| {},
//!     ))
//!     .unwrap();
//!
//! let id = StandardId::new(0x123).unwrap();
//! can.send(0, id, &[0xAA, 0xBB]).unwrap();
//!
//! // In the interrupt handler of the CAN controller
//! can.on_interrupt();
//! ```
//!
//! [`Mailboxes`]: transport::mailbox::Mailboxes
//! [`Mcp2515`]: transport::mcp2515::Mcp2515
//! [`Can`]: bus::Can
//! [`Handlers`]: bus::Handlers
//! [`CanConfigurable`]: bus::CanConfigurable
//! [`finalize`]: bus::CanConfigurable::finalize
//! [`Dependencies`]: duocan_core::Dependencies
//! [`released`]: bus::Can::release

pub mod bus;
pub mod config;
pub mod interrupt;
pub mod message;
pub mod prelude;
pub mod reg;
pub mod transport;
pub mod tx_buffers;

pub use duocan_core as core;
pub use embedded_can;
