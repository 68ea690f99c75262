//! CAN bus configuration

use core::ops::RangeInclusive;
use fugit::HertzU32;

/// Configuration for the CAN bus
#[derive(Copy, Clone, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CanConfig {
    /// Bit timing parameters
    pub timing: BitTiming,
    /// Number of receive and transmit buffers to use
    pub buffers: BufferConfig,
    /// How receive buffers are numbered towards the receive handler
    pub rx_numbering: RxNumbering,
    /// Modes of testing
    ///
    /// Transmitted frames are looped back internally and not driven onto the
    /// bus. Only available on controllers that support it.
    pub loopback: bool,
    /// Enable the low-pass filter on the wake-up input, where the controller
    /// has one
    pub wake_filter: bool,
}

impl CanConfig {
    /// Create an instance
    ///
    /// Bitrate value must be provided, all other settings come pre-populated
    /// with default values.
    pub fn new(bitrate: HertzU32) -> Self {
        Self {
            timing: BitTiming::new(bitrate),
            buffers: Default::default(),
            rx_numbering: Default::default(),
            loopback: false,
            wake_filter: false,
        }
    }
}

/// Number of buffers, in each direction, the driver manages
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BufferConfig {
    /// Receive buffers, at most 8
    pub rx: u8,
    /// Transmit buffers, at most 8
    pub tx: u8,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self { rx: 1, tx: 1 }
    }
}

/// Numbering of receive buffers as reported to
/// [`Handlers::on_receive`](crate::bus::Handlers::on_receive)
#[derive(Default, Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RxNumbering {
    /// Receive buffers are numbered `0..rx`, independent of where the
    /// controller keeps them
    #[default]
    Relative,
    /// Receive buffers are reported by their hardware slot. On controllers
    /// where transmit and receive share one pool of mailboxes the first
    /// receive buffer follows the last transmit buffer.
    Slot,
}

/// Bit-timing parameters
///
/// The bit time is determined by
/// - the time quantum `t_q`, which is a fraction of the controller clock
/// - the number of time quanta in a bit time: the synchronization segment (1)
///   plus `prop_seg`, `phase_seg_1` and `phase_seg_2`
///
/// This struct expects *real* values, the subtractions expected by the
/// registers are handled within the driver.
///
/// Default values are:
/// - sjw: 1
/// - prop_seg: 2
/// - phase_seg_1: 7
/// - phase_seg_2: 6
///
/// for 16 time quanta in a bit time.
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BitTiming {
    /// Synchronization jump width
    pub sjw: u8,
    /// Propagation segment
    pub prop_seg: u8,
    /// Phase time before the sample point
    pub phase_seg_1: u8,
    /// Time after the sample point
    pub phase_seg_2: u8,
    /// The bitrate of the bus. This needs to be chosen so that the clock to
    /// the controller is divisible into time quanta such that the bit time
    /// is a whole number of time quanta.
    ///
    /// In bits per second: 84 MHz with `BRP` 41 and 16 quanta is
    /// `125.kHz()`.
    pub bitrate: HertzU32,
}

impl BitTiming {
    /// Create an instance
    ///
    /// Bitrate value must be provided, all other settings come pre-populated
    /// with default values.
    pub fn new(bitrate: HertzU32) -> Self {
        Self {
            sjw: 1,
            prop_seg: 2,
            phase_seg_1: 7,
            phase_seg_2: 6,
            bitrate,
        }
    }
}

/// Misconfigurations of [`BitTiming`].
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BitTimingError {
    /// SJW is outside the wrapped `RangeInclusive`
    SynchronizationJumpWidthOutOfRange(RangeInclusive<u32>),
    /// Propagation segment is outside the wrapped `RangeInclusive`
    PropagationSegmentOutOfRange(RangeInclusive<u32>),
    /// Phase segment 1 is outside the wrapped `RangeInclusive`
    PhaseSeg1OutOfRange(RangeInclusive<u32>),
    /// Phase segment 2 is outside the wrapped `RangeInclusive`
    PhaseSeg2OutOfRange(RangeInclusive<u32>),
    /// `prop_seg + phase_seg_1` is shorter than `phase_seg_2`
    SamplePointTooEarly,
    /// `phase_seg_2` is not longer than `sjw`
    JumpWidthTooLong,
    /// Prescaler register value is outside the wrapped `RangeInclusive`
    PrescalerOutOfRange(RangeInclusive<u32>),
    /// No valid prescaler could be found
    ///
    /// The following requirement must be met:
    /// - `can_clock` must be divisible by `bitrate * bit_time_quanta` (times
    ///   two on controllers whose time quantum is two clock periods)
    NoValidPrescaler {
        /// Provided controller clock
        can_clock: HertzU32,
        /// Bitrate requested in [`BitTiming`]
        bitrate: HertzU32,
        /// Time quanta per bit selected by [`BitTiming`]
        bit_time_quanta: u32,
    },
}

/// Valid values of a [`BitTiming`] struct on a given controller
#[derive(Clone, Debug)]
pub struct BitTimingRanges {
    pub(crate) sjw: RangeInclusive<u32>,
    pub(crate) prop_seg: RangeInclusive<u32>,
    pub(crate) phase_seg_1: RangeInclusive<u32>,
    pub(crate) phase_seg_2: RangeInclusive<u32>,
    /// Register value of the baud rate prescaler, that is the prescaler minus
    /// one
    pub(crate) prescaler: RangeInclusive<u32>,
    /// Controller clock periods per prescaler step
    pub(crate) clock_divisor: u32,
}

/// Register values derived from a [`BitTiming`]
///
/// All values are as written to the registers: the prescaler and every
/// segment length minus one.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TimingFields {
    /// Baud rate prescaler
    pub prescaler: u8,
    /// Synchronization jump width
    pub sjw: u8,
    /// Propagation segment
    pub prop_seg: u8,
    /// Phase segment 1
    pub phase_seg_1: u8,
    /// Phase segment 2
    pub phase_seg_2: u8,
}

impl TimingFields {
    /// Bitrate that these register values produce with `can_clock`
    pub fn bitrate(&self, can_clock: HertzU32, valid: &BitTimingRanges) -> HertzU32 {
        let quanta = 4
            + u32::from(self.prop_seg)
            + u32::from(self.phase_seg_1)
            + u32::from(self.phase_seg_2);
        can_clock / ((u32::from(self.prescaler) + 1) * valid.clock_divisor * quanta)
    }
}

impl BitTiming {
    /// Returns the number of time quanta that make up one bit time, `t_bit /
    /// t_q`
    pub fn time_quanta_per_bit(&self) -> u32 {
        1 + u32::from(self.prop_seg) + u32::from(self.phase_seg_1) + u32::from(self.phase_seg_2)
    }

    fn check(&self, valid: &BitTimingRanges) -> Result<(), BitTimingError> {
        if !valid.sjw.contains(&self.sjw.into()) {
            Err(BitTimingError::SynchronizationJumpWidthOutOfRange(
                valid.sjw.clone(),
            ))
        } else if !valid.prop_seg.contains(&self.prop_seg.into()) {
            Err(BitTimingError::PropagationSegmentOutOfRange(
                valid.prop_seg.clone(),
            ))
        } else if !valid.phase_seg_1.contains(&self.phase_seg_1.into()) {
            Err(BitTimingError::PhaseSeg1OutOfRange(
                valid.phase_seg_1.clone(),
            ))
        } else if !valid.phase_seg_2.contains(&self.phase_seg_2.into()) {
            Err(BitTimingError::PhaseSeg2OutOfRange(
                valid.phase_seg_2.clone(),
            ))
        } else if self.prop_seg + self.phase_seg_1 < self.phase_seg_2 {
            Err(BitTimingError::SamplePointTooEarly)
        } else if self.phase_seg_2 <= self.sjw {
            Err(BitTimingError::JumpWidthTooLong)
        } else {
            Ok(())
        }
    }

    /// Derive the register values for a controller clocked at `can_clock`
    ///
    /// The result only depends on the arguments.
    pub fn compute(
        &self,
        can_clock: HertzU32,
        valid: &BitTimingRanges,
    ) -> Result<TimingFields, BitTimingError> {
        self.check(valid)?;
        let f_out = self.bitrate;
        let bit_time_quanta = self.time_quanta_per_bit();
        let no_prescaler = BitTimingError::NoValidPrescaler {
            can_clock,
            bitrate: f_out,
            bit_time_quanta,
        };
        let f_q = f_out
            .to_Hz()
            .checked_mul(bit_time_quanta)
            .and_then(|f| f.checked_mul(valid.clock_divisor))
            .ok_or_else(|| no_prescaler.clone())?;
        match can_clock.to_Hz().checked_rem(f_q) {
            Some(0) => {
                let prescaler = can_clock.to_Hz() / f_q;
                if prescaler == 0 {
                    return Err(no_prescaler);
                }
                let field = prescaler - 1;
                if !valid.prescaler.contains(&field) {
                    Err(BitTimingError::PrescalerOutOfRange(valid.prescaler.clone()))
                } else {
                    Ok(TimingFields {
                        prescaler: field as u8,
                        sjw: self.sjw - 1,
                        prop_seg: self.prop_seg - 1,
                        phase_seg_1: self.phase_seg_1 - 1,
                        phase_seg_2: self.phase_seg_2 - 1,
                    })
                }
            }
            _ => Err(no_prescaler),
        }
    }
}
