//! The CAN driver
//!
//! [`CanConfigurable`] holds a controller in configuration mode. Once
//! [`finalize`](CanConfigurable::finalize)d it turns into a [`Can`], which
//! sends frames, dispatches interrupts to the application's [`Handlers`] and
//! moves the controller between normal operation and sleep.

use crate::config::{BitTimingError, CanConfig, RxNumbering, TimingFields};
use crate::interrupt::{Diagnostics, Event};
use crate::message::{rx, tx};
use crate::transport::{BufferLayout, Controller, Mode};
use crate::tx_buffers::{BufferSet, TxBuffers, MAX_BUFFERS};
use duocan_core::Dependencies;
use embedded_can::Id;
use fugit::HertzU32;

/// Index is out of bounds
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct OutOfBounds;

/// Register read-back that did not match what was written
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Fault {
    /// The controller did not enter configuration mode after reset
    Reset,
    /// Bit timing registers
    Timing,
    /// Buffer or interrupt enable registers
    Buffers,
    /// The controller did not enter the requested mode
    Mode,
}

/// Errors reported by the driver
///
/// `E` is the error of the link to the controller.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error<E> {
    /// Bad buffer index, oversized payload or buffer counts the controller
    /// cannot provide
    InvalidArgument,
    /// Problems with the bit timing configuration
    InvalidTiming(BitTimingError),
    /// No free buffer, the buffer is still sending, or the controller is in
    /// a mode that does not transmit
    Busy,
    /// The controller lacks the requested feature
    NotSupported,
    /// The controller did not accept a configuration step
    HardwareFault(Fault),
    /// The link to the controller failed
    Transport(E),
}

impl<E> From<BitTimingError> for Error<E> {
    fn from(value: BitTimingError) -> Self {
        Self::InvalidTiming(value)
    }
}

fn fault<E>(fault: Fault) -> Error<E> {
    #[cfg(feature = "defmt")]
    defmt::warn!("CAN controller read-back mismatch: {}", fault);
    Error::HardwareFault(fault)
}

/// Transmit and receive error counters
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ErrorCounters {
    /// Transmit error counter
    pub transmit: u8,
    /// Receive error counter
    pub receive: u8,
}

/// Fault confinement state derived from the error counters
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ErrorState {
    /// Both counters below 96
    Active,
    /// A counter reached 96
    Warning,
    /// A counter exceeded 127; the node no longer sends active error frames
    Passive,
}

impl ErrorCounters {
    /// Classify the counters. The worse of the two decides.
    pub fn state(&self) -> ErrorState {
        match self.transmit.max(self.receive) {
            0..=95 => ErrorState::Active,
            96..=127 => ErrorState::Warning,
            _ => ErrorState::Passive,
        }
    }
}

/// Application callbacks, invoked from [`Can::on_interrupt`]
///
/// Both run in interrupt context and must not block.
///
/// Implemented for pairs of closures `(on_receive, on_transmit)`:
/// ```
/// use duocan::bus::Handlers;
/// use duocan::message::rx;
///
/// fn requires_handlers(_: impl Handlers) {}
///
/// let mut received = 0;
/// requires_handlers((
///     |_buffer: u8, _message: &rx::Message| received += 1,
///     |_buffer: u8| {},
/// ));
/// ```
pub trait Handlers {
    /// A frame arrived in receive buffer `buffer`. `message` is only valid
    /// for the duration of the call.
    fn on_receive(&mut self, buffer: u8, message: &rx::Message);

    /// Transmit buffer `buffer` finished sending and is free again
    fn on_transmit(&mut self, buffer: u8);
}

impl<R, T> Handlers for (R, T)
where
    R: FnMut(u8, &rx::Message),
    T: FnMut(u8),
{
    fn on_receive(&mut self, buffer: u8, message: &rx::Message) {
        (self.0)(buffer, message)
    }

    fn on_transmit(&mut self, buffer: u8) {
        (self.1)(buffer)
    }
}

/// Checks `config` against what the controller supports, without touching
/// it
fn validate<C: Controller>(
    config: &CanConfig,
    can_clock: HertzU32,
) -> Result<(BufferLayout, TimingFields), Error<C::Error>> {
    if config.buffers.rx > MAX_BUFFERS || config.buffers.tx > MAX_BUFFERS {
        return Err(Error::InvalidArgument);
    }
    let layout = C::layout(&config.buffers).ok_or(Error::InvalidArgument)?;
    if config.loopback && !C::SUPPORTS_LOOPBACK {
        return Err(Error::NotSupported);
    }
    let timing = config.timing.compute(can_clock, &C::TIMING)?;
    Ok((layout, timing))
}

/// A CAN controller in configuration mode. Before messages can be sent and
/// received, it needs to be [`Self::finalize`]d.
pub struct CanConfigurable<C, D> {
    controller: C,
    dependencies: D,
    config: CanConfig,
}

impl<C: Controller, D: Dependencies> CanConfigurable<C, D> {
    /// Reset the controller into configuration mode
    ///
    /// `config` is checked before the controller is touched, and again in
    /// [`Self::finalize`].
    pub fn new(controller: C, dependencies: D, config: CanConfig) -> Result<Self, Error<C::Error>> {
        validate::<C>(&config, dependencies.can_clock())?;
        let mut can = Self {
            controller,
            dependencies,
            config,
        };
        can.controller.reset().map_err(Error::Transport)?;
        if can.controller.mode().map_err(Error::Transport)? != Mode::Configuration {
            return Err(fault(Fault::Reset));
        }
        Ok(can)
    }

    /// Allows changing the configuration before it is applied
    pub fn config(&mut self) -> &mut CanConfig {
        &mut self.config
    }

    /// Apply the configuration and enter normal operation, or loopback mode
    /// if configured
    ///
    /// Every register written is read back. The transceiver is enabled once
    /// the controller is running.
    pub fn finalize<H: Handlers>(mut self, handlers: H) -> Result<Can<C, D, H>, Error<C::Error>> {
        let (layout, timing) = validate::<C>(&self.config, self.dependencies.can_clock())?;
        let controller = &mut self.controller;
        if !controller
            .write_timing(&timing, &self.config)
            .map_err(Error::Transport)?
        {
            return Err(fault(Fault::Timing));
        }
        if !controller
            .configure_buffers(&layout)
            .map_err(Error::Transport)?
        {
            return Err(fault(Fault::Buffers));
        }

        let mut can = Can {
            controller: self.controller,
            dependencies: self.dependencies,
            handlers,
            config: self.config,
            layout,
            buffers: TxBuffers::new(layout.tx),
            in_flight: [None; MAX_BUFFERS as usize],
            mode: Mode::Configuration,
            diagnostics: Diagnostics::default(),
        };
        let running = can.running_mode();
        can.enter(running)?;
        can.dependencies.set_transceiver(true);
        Ok(can)
    }

    /// Gives back the controller and its dependencies
    pub fn release(self) -> (C, D) {
        (self.controller, self.dependencies)
    }
}

/// A CAN controller in normal operation, loopback mode or asleep
///
/// Owns the controller, its dependencies and the application handlers. The
/// instance is meant to be shared between the application and the CAN
/// interrupt handler, for example as an RTIC resource or inside a
/// `critical_section::Mutex<RefCell<_>>`.
pub struct Can<C, D, H> {
    controller: C,
    dependencies: D,
    handlers: H,
    config: CanConfig,
    layout: BufferLayout,
    buffers: TxBuffers,
    in_flight: [Option<tx::Message>; MAX_BUFFERS as usize],
    mode: Mode,
    diagnostics: Diagnostics,
}

impl<C: Controller, D: Dependencies, H: Handlers> Can<C, D, H> {
    /// Reset, configure and start the controller in one go
    pub fn new(
        controller: C,
        dependencies: D,
        config: CanConfig,
        handlers: H,
    ) -> Result<Self, Error<C::Error>> {
        CanConfigurable::new(controller, dependencies, config)?.finalize(handlers)
    }

    fn running_mode(&self) -> Mode {
        if self.config.loopback {
            Mode::Loopback
        } else {
            Mode::Normal
        }
    }

    /// Request `mode` and check that the controller reports it right away
    fn enter(&mut self, mode: Mode) -> Result<(), Error<C::Error>> {
        self.controller
            .request_mode(mode)
            .map_err(Error::Transport)?;
        if self.controller.mode().map_err(Error::Transport)? != mode {
            return Err(fault(Fault::Mode));
        }
        self.mode = mode;
        Ok(())
    }

    /// Send `data` from transmit buffer `index`
    pub fn send(&mut self, index: u8, id: impl Into<Id>, data: &[u8]) -> Result<(), Error<C::Error>> {
        let message = tx::MessageBuilder {
            id: id.into(),
            frame_type: tx::FrameType::Data(data),
            priority: Default::default(),
        }
        .build()
        .map_err(|_| Error::InvalidArgument)?;
        self.send_message(index, &message)
    }

    /// Send a remote request without payload from transmit buffer `index`
    pub fn send_remote(&mut self, index: u8, id: impl Into<Id>) -> Result<(), Error<C::Error>> {
        let message = tx::MessageBuilder {
            id: id.into(),
            frame_type: tx::FrameType::Remote { desired_len: 0 },
            priority: Default::default(),
        }
        .build()
        .map_err(|_| Error::InvalidArgument)?;
        self.send_message(index, &message)
    }

    /// Send `message` from transmit buffer `index`
    ///
    /// The buffer stays reserved until the controller reports the frame as
    /// sent; [`Handlers::on_transmit`] is called then.
    pub fn send_message(&mut self, index: u8, message: &tx::Message) -> Result<(), Error<C::Error>> {
        if index >= self.layout.tx {
            return Err(Error::InvalidArgument);
        }
        self.check_transmitting()?;
        let index = self.buffers.try_allocate(index).ok_or(Error::Busy)?;
        self.start(index, message)
    }

    /// Send `data` from the free transmit buffer with the lowest index
    ///
    /// Returns the index of the buffer.
    pub fn send_any(&mut self, id: impl Into<Id>, data: &[u8]) -> Result<u8, Error<C::Error>> {
        let message = tx::MessageBuilder {
            id: id.into(),
            frame_type: tx::FrameType::Data(data),
            priority: Default::default(),
        }
        .build()
        .map_err(|_| Error::InvalidArgument)?;
        self.check_transmitting()?;
        let index = self.buffers.try_allocate_any().ok_or(Error::Busy)?;
        self.start(index, &message)?;
        Ok(index)
    }

    fn check_transmitting(&self) -> Result<(), Error<C::Error>> {
        match self.mode {
            Mode::Normal | Mode::Loopback => Ok(()),
            _ => Err(Error::Busy),
        }
    }

    /// Load and start the allocated buffer `index`. The buffer is given back
    /// if anything fails.
    fn start(&mut self, index: u8, message: &tx::Message) -> Result<(), Error<C::Error>> {
        let started = self.load_and_request(index, message);
        if started.is_err() {
            self.in_flight[usize::from(index)] = None;
            self.buffers.free(index);
        }
        started
    }

    fn load_and_request(&mut self, index: u8, message: &tx::Message) -> Result<(), Error<C::Error>> {
        if !self.controller.tx_ready(index).map_err(Error::Transport)? {
            return Err(Error::Busy);
        }
        self.controller
            .load(index, message)
            .map_err(Error::Transport)?;
        self.in_flight[usize::from(index)] = Some(*message);
        self.controller
            .request_send(BufferSet(1 << index))
            .map_err(Error::Transport)
    }

    /// Cancel a pending transmission
    ///
    /// Neither controller is driven in a way that allows taking a frame
    /// back once it was requested.
    pub fn abort(&mut self, index: u8) -> Result<(), Error<C::Error>> {
        if index >= self.layout.tx {
            return Err(Error::InvalidArgument);
        }
        Err(Error::NotSupported)
    }

    /// Message waiting for completion in transmit buffer `index`
    pub fn in_flight(&self, index: u8) -> Option<&tx::Message> {
        self.in_flight.get(usize::from(index))?.as_ref()
    }

    /// Transmit buffers that can be sent from
    pub fn free_buffers(&self) -> BufferSet {
        self.buffers.free_set()
    }

    /// Put the controller to sleep, then the transceiver
    ///
    /// If the controller does not confirm, it is asked to return to the
    /// previous mode and [`Fault::Mode`] is reported.
    pub fn sleep(&mut self) -> Result<(), Error<C::Error>> {
        if self.mode == Mode::Sleep {
            return Ok(());
        }
        let previous = self.mode;
        self.controller
            .request_mode(Mode::Sleep)
            .map_err(Error::Transport)?;
        if self.controller.mode().map_err(Error::Transport)? != Mode::Sleep {
            self.controller
                .request_mode(previous)
                .map_err(Error::Transport)?;
            return Err(fault(Fault::Mode));
        }
        self.dependencies.set_transceiver(false);
        self.mode = Mode::Sleep;
        Ok(())
    }

    /// Wake the transceiver, then the controller
    ///
    /// The controller passes through listen-only mode before it returns to
    /// the mode it was finalized in. Bit timing is kept.
    pub fn wake(&mut self) -> Result<(), Error<C::Error>> {
        if self.mode != Mode::Sleep {
            return Ok(());
        }
        self.dependencies.set_transceiver(true);
        self.controller.leave_sleep().map_err(Error::Transport)?;
        if self.controller.mode().map_err(Error::Transport)? != Mode::ListenOnly {
            return Err(fault(Fault::Mode));
        }
        self.mode = Mode::ListenOnly;
        let running = self.running_mode();
        self.enter(running)
    }

    /// Read the error counters
    ///
    /// Never fails on controllers whose link cannot fail.
    pub fn error_counters(&mut self) -> Result<ErrorCounters, Error<C::Error>> {
        self.controller.error_counters().map_err(Error::Transport)
    }

    /// Causes counted by the interrupt handler without reaching the
    /// [`Handlers`]
    pub fn diagnostics(&self) -> Diagnostics {
        self.diagnostics
    }

    /// Mode the driver left the controller in
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// The configuration the controller runs with
    pub fn config(&self) -> &CanConfig {
        &self.config
    }

    /// Buffer placement resolved from the configuration
    pub fn layout(&self) -> &BufferLayout {
        &self.layout
    }

    /// Access to the application handlers
    pub fn handlers(&mut self) -> &mut H {
        &mut self.handlers
    }

    /// Handle a CAN interrupt
    ///
    /// Reads the pending causes once and walks through them: completed
    /// transmissions first, then received frames, then error, overflow and
    /// wake-up, which are only counted. The observed causes are
    /// acknowledged at the end. Link failures are counted in
    /// [`Diagnostics::transport_faults`].
    pub fn on_interrupt(&mut self) {
        let status = match self.controller.status(&self.layout) {
            Ok(status) => status,
            Err(_) => {
                self.transport_fault();
                return;
            }
        };
        for event in status {
            match event {
                Event::TransmitComplete(index) => {
                    self.in_flight[usize::from(index)] = None;
                    self.buffers.free(index);
                    self.handlers.on_transmit(index);
                }
                Event::ReceiveComplete(index) => match self.controller.receive(&self.layout, index) {
                    Ok(message) => {
                        let buffer = match self.config.rx_numbering {
                            RxNumbering::Relative => index,
                            RxNumbering::Slot => self.layout.rx_slot(index),
                        };
                        self.handlers.on_receive(buffer, &message);
                    }
                    Err(_) => self.transport_fault(),
                },
                other => {
                    #[cfg(feature = "defmt")]
                    defmt::warn!("CAN interrupt: {}", other);
                    self.diagnostics.record(other);
                }
            }
        }
        if self.controller.acknowledge(&self.layout, &status).is_err() {
            self.transport_fault();
        }
    }

    fn transport_fault(&mut self) {
        #[cfg(feature = "defmt")]
        defmt::warn!("CAN transport failed in interrupt handler");
        self.diagnostics.record_transport_fault();
    }

    /// Gives back the controller and its dependencies
    pub fn release(self) -> (C, D) {
        (self.controller, self.dependencies)
    }
}
