#![no_std]
#![warn(missing_docs)]

//! `duocan-core` provides a set of essential abstractions that serve as a thin
//! integration layer between the platform independent [`duocan`] crate and
//! platform specific HAL crates (in documentation also referred to as _target
//! HALs_).
//!
//! Traits from this crate are not supposed to be implemented by the
//! application developer; implementations should be provided by target HALs
//! or board support crates.
//!
//! Integrators of this crate into any given target HAL are responsible for
//! soundness of trait implementations and conforming to their respective safety
//! prerequisites.
//!
//! [`duocan`]: <https://docs.rs/crate/duocan/>

pub use fugit;

/// Trait representing the identity of a memory-mapped CAN controller
///
/// Types implementing this trait are expected to be used as marker types
/// identifying a specific instance of an on-chip mailbox CAN controller (as
/// there might be more than one). It only conveys *where* the register block
/// is located, not that it can be accessed. The latter is expressed by the
/// [`Dependencies`] trait.
///
/// Controllers reached over a serial link do not have an address and do not
/// need this trait.
///
/// # Safety
/// `CanId::ADDRESS` points to the start of a valid register block of a
/// mailbox CAN controller
///
/// # Examples
/// ```no_run
/// use duocan_core::CanId;
///
/// pub enum Can0 {}
///
/// unsafe impl CanId for Can0 {
///     const ADDRESS: *const () = 0x400B_4000 as *const _;
/// }
///
/// pub enum Can1 {}
///
/// unsafe impl CanId for Can1 {
///     const ADDRESS: *const () = 0x400B_8000 as *const _;
/// }
/// ```
pub unsafe trait CanId {
    /// Static address of the register block of the controller
    const ADDRESS: *const ();
}

/// Trait representing CAN controller dependencies
///
/// Structs implementing [`Dependencies`] should
/// - enclose all object representable dependencies of the controller (clock
///   tokens, pins, the transceiver control line) and release them upon
///   destruction
/// - be constructible only when it is safe and sound to interact with the
///   controller (respective clocks and pins have been already configured)
/// - be a singleton per controller
///
/// in order to prevent aliasing and guarantee that the abstractions provided
/// by [`duocan`] are sole owners of the controller.
///
/// # Safety
/// While [`Dependencies`] type instance exists
/// - the clock feeding the CAN controller must not change
/// - CAN related pin modes must not change
/// - the controller must not be accessible by other parts of the application
///
/// # Example
/// ```no_run
/// use duocan_core::fugit::HertzU32;
///
/// # struct Pin;
/// # impl Pin {
/// #     fn set_high(&mut self) {}
/// #     fn set_low(&mut self) {}
/// # }
/// pub struct Board {
///     // Oscillator of the companion controller
///     oscillator: HertzU32,
///     // Standby input of the bus transceiver, active high
///     standby: Pin,
/// }
///
/// unsafe impl duocan_core::Dependencies for Board {
///     fn can_clock(&self) -> HertzU32 {
///         self.oscillator
///     }
///
///     fn set_transceiver(&mut self, enabled: bool) {
///         if enabled {
///             self.standby.set_low()
///         } else {
///             self.standby.set_high()
///         }
///     }
/// }
/// ```
/// [`duocan`]: <https://docs.rs/crate/duocan/>
pub unsafe trait Dependencies {
    /// Frequency of the clock that the bit timing of the controller is
    /// derived from.
    ///
    /// For on-chip controllers this is usually the peripheral clock, for a
    /// companion chip it is the frequency of its oscillator.
    fn can_clock(&self) -> fugit::HertzU32;

    /// Drive the transceiver enable signal.
    ///
    /// `false` puts the transceiver in its low-power state; the driver does
    /// this after the controller confirmed it is sleeping.
    fn set_transceiver(&mut self, enabled: bool);
}
