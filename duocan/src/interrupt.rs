//! Interrupt status of a controller
//!
//! Each controller reports its interrupt causes in a status word of its own
//! layout. The transport decodes that word into a [`Status`], which the
//! driver walks through as a sequence of [`Event`]s.

use crate::tx_buffers::{self, BufferSet};

/// Interrupt causes reported by a controller in one status read
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Status {
    /// Transmit buffers that finished sending, by transmit buffer index
    pub transmitted: BufferSet,
    /// Receive buffers holding a new frame, by receive buffer index
    pub received: BufferSet,
    /// The controller flagged a bus or protocol error
    pub bus_error: bool,
    /// A frame was lost because no receive buffer was free
    pub overflow: bool,
    /// Bus activity woke the controller up
    pub wake: bool,
    /// The status word as read from the controller. Used to acknowledge
    /// exactly the causes that were observed.
    pub raw: u32,
}

/// A single interrupt cause
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Event {
    /// Transmit buffer finished sending
    TransmitComplete(u8),
    /// Receive buffer holds a new frame
    ReceiveComplete(u8),
    /// Bus or protocol error
    BusError,
    /// Receive overflow
    Overflow,
    /// Wake-up on bus activity
    Wake,
}

impl Status {
    /// `true` if no cause is set
    pub fn is_empty(&self) -> bool {
        self.transmitted.is_empty()
            && self.received.is_empty()
            && !self.bus_error
            && !self.overflow
            && !self.wake
    }

    /// Iterates over the causes: completed transmit buffers in increasing
    /// index, then received buffers in increasing index, then error,
    /// overflow and wake-up.
    pub fn iter(&self) -> Iter {
        Iter {
            transmitted: self.transmitted.iter(),
            received: self.received.iter(),
            flags: [self.bus_error, self.overflow, self.wake],
            flag: 0,
        }
    }
}

impl IntoIterator for Status {
    type Item = Event;
    type IntoIter = Iter;

    fn into_iter(self) -> Iter {
        self.iter()
    }
}

/// An iterator over the [`Event`]s of a [`Status`].
///
/// This `struct` is created by [`Status::iter`].
pub struct Iter {
    transmitted: tx_buffers::Iter,
    received: tx_buffers::Iter,
    flags: [bool; 3],
    flag: usize,
}

impl Iterator for Iter {
    type Item = Event;

    fn next(&mut self) -> Option<Event> {
        if let Some(i) = self.transmitted.next() {
            return Some(Event::TransmitComplete(i));
        }
        if let Some(i) = self.received.next() {
            return Some(Event::ReceiveComplete(i));
        }
        while let Some(&set) = self.flags.get(self.flag) {
            let flag = self.flag;
            self.flag += 1;
            if set {
                return Some(match flag {
                    0 => Event::BusError,
                    1 => Event::Overflow,
                    _ => Event::Wake,
                });
            }
        }
        None
    }
}

/// Counters of interrupt causes that are not forwarded to the application
///
/// All counters wrap around.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Diagnostics {
    /// Interrupts that reported a bus or protocol error
    pub bus_errors: u16,
    /// Interrupts that reported a receive overflow
    pub overflows: u16,
    /// Wake-ups on bus activity
    pub wakeups: u16,
    /// Transport failures inside the interrupt handler
    pub transport_faults: u16,
}

impl Diagnostics {
    pub(crate) fn record(&mut self, event: Event) {
        let counter = match event {
            Event::BusError => &mut self.bus_errors,
            Event::Overflow => &mut self.overflows,
            Event::Wake => &mut self.wakeups,
            Event::TransmitComplete(_) | Event::ReceiveComplete(_) => return,
        };
        *counter = counter.wrapping_add(1);
    }

    pub(crate) fn record_transport_fault(&mut self) {
        self.transport_faults = self.transport_faults.wrapping_add(1);
    }
}
