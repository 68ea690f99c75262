//! Register block of a memory-mapped mailbox CAN controller
//!
//! Eight mailboxes, each of which is configured as a transmit or a receive
//! buffer, plus a handful of global registers. The layout is that of the CAN
//! controllers of the SAM3X family.

use bitfield::bitfield;
use vcell::VolatileCell;

/// Number of mailboxes
pub const MAILBOXES: usize = 8;

/// Register block
#[repr(C)]
pub struct RegisterBlock {
    /// 0x00 - Mode
    pub mr: VolatileCell<u32>,
    /// 0x04 - Interrupt enable
    pub ier: VolatileCell<u32>,
    /// 0x08 - Interrupt disable
    pub idr: VolatileCell<u32>,
    /// 0x0c - Interrupt mask
    pub imr: VolatileCell<u32>,
    /// 0x10 - Status
    pub sr: VolatileCell<u32>,
    /// 0x14 - Baudrate
    pub br: VolatileCell<u32>,
    /// 0x18 - Timer
    pub tim: VolatileCell<u32>,
    /// 0x1c - Timestamp
    pub timestp: VolatileCell<u32>,
    /// 0x20 - Error counter
    pub ecr: VolatileCell<u32>,
    /// 0x24 - Transfer command
    pub tcr: VolatileCell<u32>,
    /// 0x28 - Abort command
    pub acr: VolatileCell<u32>,
    _reserved: [VolatileCell<u32>; 117],
    /// 0x200 - Mailboxes
    pub mb: [Mailbox; MAILBOXES],
}

/// Registers of one mailbox
#[repr(C)]
pub struct Mailbox {
    /// 0x00 - Mailbox mode
    pub mmr: VolatileCell<u32>,
    /// 0x04 - Acceptance mask
    pub mam: VolatileCell<u32>,
    /// 0x08 - Identifier
    pub mid: VolatileCell<u32>,
    /// 0x0c - Family identifier
    pub mfid: VolatileCell<u32>,
    /// 0x10 - Status
    pub msr: VolatileCell<u32>,
    /// 0x14 - Data low
    pub mdl: VolatileCell<u32>,
    /// 0x18 - Data high
    pub mdh: VolatileCell<u32>,
    /// 0x1c - Control
    pub mcr: VolatileCell<u32>,
}

const ZERO: VolatileCell<u32> = VolatileCell::new(0);
const EMPTY_MAILBOX: Mailbox = Mailbox {
    mmr: ZERO,
    mam: ZERO,
    mid: ZERO,
    mfid: ZERO,
    msr: ZERO,
    mdl: ZERO,
    mdh: ZERO,
    mcr: ZERO,
};

impl RegisterBlock {
    /// A register block in ordinary memory with every register cleared
    ///
    /// The controller's side of the registers has to be played by whoever
    /// owns the block, which makes it useful for simulation.
    pub const fn new() -> Self {
        Self {
            mr: ZERO,
            ier: ZERO,
            idr: ZERO,
            imr: ZERO,
            sr: ZERO,
            br: ZERO,
            tim: ZERO,
            timestp: ZERO,
            ecr: ZERO,
            tcr: ZERO,
            acr: ZERO,
            _reserved: [ZERO; 117],
            mb: [EMPTY_MAILBOX; MAILBOXES],
        }
    }
}

impl Default for RegisterBlock {
    fn default() -> Self {
        Self::new()
    }
}

bitfield! {
    /// Mode register
    #[derive(Copy, Clone, Default, PartialEq, Eq)]
    pub struct Mr(u32);
    impl Debug;
    /// Controller enable
    pub canen, set_canen: 0;
    /// Low power mode
    pub lpm, set_lpm: 1;
    /// Autobaud/listen mode
    pub abm, set_abm: 2;
}

bitfield! {
    /// Baudrate register
    #[derive(Copy, Clone, Default, PartialEq, Eq)]
    pub struct Br(u32);
    impl Debug;
    /// Phase segment 2, minus one
    pub u8, phase2, set_phase2: 2, 0;
    /// Phase segment 1, minus one
    pub u8, phase1, set_phase1: 6, 4;
    /// Propagation segment, minus one
    pub u8, propag, set_propag: 10, 8;
    /// Synchronization jump width, minus one
    pub u8, sjw, set_sjw: 13, 12;
    /// Baudrate prescaler, minus one
    pub u8, brp, set_brp: 22, 16;
    /// Sample the bit three times
    pub smp, set_smp: 24;
}

bitfield! {
    /// Interrupt enable/disable/mask and status registers
    #[derive(Copy, Clone, Default, PartialEq, Eq)]
    pub struct Sr(u32);
    impl Debug;
    /// One flag per mailbox
    pub u8, mb, set_mb: 7, 0;
    /// Error passive mode
    pub errp, set_errp: 18;
    /// Bus off mode
    pub boff, set_boff: 19;
    /// The controller is in low-power mode
    pub sleep, set_sleep: 20;
    /// Wake-up
    pub wakeup, set_wakeup: 21;
    /// CRC error
    pub cerr, set_cerr: 24;
    /// Bit stuffing error
    pub serr, set_serr: 25;
    /// Acknowledgment error
    pub aerr, set_aerr: 26;
    /// Form error
    pub ferr, set_ferr: 27;
    /// Bit error
    pub berr, set_berr: 28;
}

impl Sr {
    /// Protocol error events, cleared by reading the status register
    pub fn protocol_errors() -> Self {
        let mut sr = Self(0);
        sr.set_cerr(true);
        sr.set_serr(true);
        sr.set_aerr(true);
        sr.set_ferr(true);
        sr.set_berr(true);
        sr
    }
}

bitfield! {
    /// Error counter register
    #[derive(Copy, Clone, Default, PartialEq, Eq)]
    pub struct Ecr(u32);
    impl Debug;
    /// Receive error counter
    pub u8, rec, _: 7, 0;
    /// Transmit error counter
    pub u8, tec, _: 23, 16;
}

/// Object type of a mailbox
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum MailboxType {
    /// Mailbox is disabled
    Disabled = 0,
    /// Receives frames, the first one is kept until the mailbox is re-armed
    Receive = 1,
    /// Transmits frames
    Transmit = 3,
}

bitfield! {
    /// Mailbox mode register
    #[derive(Copy, Clone, Default, PartialEq, Eq)]
    pub struct Mmr(u32);
    impl Debug;
    /// Transmission priority, 0 is the highest
    pub u8, prior, set_prior: 19, 16;
    /// Mailbox object type
    pub u8, mot, set_mot: 26, 24;
}

bitfield! {
    /// Mailbox status register
    #[derive(Copy, Clone, Default, PartialEq, Eq)]
    pub struct Msr(u32);
    impl Debug;
    /// Mailbox ready: a frame was received, or the mailbox can be loaded
    pub mrdy, set_mrdy: 23;
    /// A frame was received while the mailbox still held one
    pub mmi, set_mmi: 24;
}

/// Mailbox transfer command, in `MCR`
pub const MTCR: u32 = 1 << 23;
