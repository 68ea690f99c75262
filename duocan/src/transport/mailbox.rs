//! On-chip mailbox controller
//!
//! Transmit buffers occupy mailboxes `0..tx`, receive buffers the mailboxes
//! following them. Every register access is a single volatile load or store.

use super::{BufferLayout, Controller, Mode, Transport};
use crate::bus::{ErrorCounters, OutOfBounds};
use crate::config::{BitTimingRanges, BufferConfig, CanConfig, TimingFields};
use crate::interrupt::Status;
use crate::message::{mailbox::RawFrame, rx, tx, WireFormat, MAX_DATA_LEN};
use crate::reg::{self, Br, Ecr, MailboxType, Mmr, Mr, Msr, RegisterBlock, Sr, MAILBOXES, MTCR};
use crate::tx_buffers::BufferSet;
use vcell::VolatileCell;

/// Bit timing limits of the `BR` register. A prescaler of one is not
/// allowed.
pub(crate) const TIMING: BitTimingRanges = BitTimingRanges {
    sjw: 1..=4,
    prop_seg: 1..=8,
    phase_seg_1: 1..=8,
    phase_seg_2: 1..=8,
    prescaler: 1..=127,
    clock_divisor: 1,
};

/// Register of the mailbox controller
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Register {
    /// Mode
    Mr,
    /// Interrupt enable
    Ier,
    /// Interrupt disable
    Idr,
    /// Interrupt mask
    Imr,
    /// Status
    Sr,
    /// Baudrate
    Br,
    /// Error counters
    Ecr,
    /// Mode of a mailbox
    Mmr(u8),
    /// Acceptance mask of a mailbox
    Mam(u8),
    /// Identifier of a mailbox
    Mid(u8),
    /// Status of a mailbox
    Msr(u8),
    /// Control of a mailbox
    Mcr(u8),
}

/// Mailbox controller
pub struct Mailboxes<'a> {
    regs: &'a RegisterBlock,
    /// `MCR` value of each loaded transmit mailbox, written together with
    /// the transfer command
    staged: [u32; MAILBOXES],
    /// Mirror of the interrupt mask
    enabled: u32,
}

impl<'a> Mailboxes<'a> {
    /// # Safety
    /// The caller must be the owner of the controller whose registers are
    /// `regs`. Do not keep multiple instances for the same controller.
    pub unsafe fn new(regs: &'a RegisterBlock) -> Self {
        Self {
            regs,
            staged: [0; MAILBOXES],
            enabled: 0,
        }
    }
}

impl Mailboxes<'static> {
    /// Takes the controller identified by `Id`
    ///
    /// # Safety
    /// Same as [`Mailboxes::new`].
    pub unsafe fn from_id<Id: duocan_core::CanId>() -> Self {
        Self::new(&*(Id::ADDRESS as *const RegisterBlock))
    }
}

impl Mailboxes<'_> {
    fn mailbox(&self, slot: u8) -> Result<&reg::Mailbox, OutOfBounds> {
        self.regs.mb.get(usize::from(slot)).ok_or(OutOfBounds)
    }

    fn cell(&self, register: Register) -> Result<&VolatileCell<u32>, OutOfBounds> {
        let regs = self.regs;
        Ok(match register {
            Register::Mr => &regs.mr,
            Register::Ier => &regs.ier,
            Register::Idr => &regs.idr,
            Register::Imr => &regs.imr,
            Register::Sr => &regs.sr,
            Register::Br => &regs.br,
            Register::Ecr => &regs.ecr,
            Register::Mmr(n) => &self.mailbox(n)?.mmr,
            Register::Mam(n) => &self.mailbox(n)?.mam,
            Register::Mid(n) => &self.mailbox(n)?.mid,
            Register::Msr(n) => &self.mailbox(n)?.msr,
            Register::Mcr(n) => &self.mailbox(n)?.mcr,
        })
    }

    fn enable_interrupts(&mut self, bits: u32) {
        self.enabled |= bits;
        self.regs.ier.set(bits);
    }

    fn disable_interrupts(&mut self, bits: u32) {
        self.enabled &= !bits;
        self.regs.idr.set(bits);
    }
}

impl Transport for Mailboxes<'_> {
    type Error = OutOfBounds;
    type Register = Register;
    type Word = u32;

    fn read(&mut self, register: Register) -> Result<u32, OutOfBounds> {
        Ok(self.cell(register)?.get())
    }

    fn write(&mut self, register: Register, value: u32) -> Result<(), OutOfBounds> {
        self.cell(register)?.set(value);
        Ok(())
    }

    /// Not atomic with respect to the controller; only used on registers the
    /// controller does not modify.
    fn bit_modify(&mut self, register: Register, mask: u32, value: u32) -> Result<(), OutOfBounds> {
        let cell = self.cell(register)?;
        cell.set((cell.get() & !mask) | (value & mask));
        Ok(())
    }

    fn read_buffer(&mut self, slot: u8, out: &mut [u8]) -> Result<(), OutOfBounds> {
        let mailbox = self.mailbox(slot)?;
        let mut data = [0; MAX_DATA_LEN];
        data[..4].copy_from_slice(&mailbox.mdl.get().to_le_bytes());
        data[4..].copy_from_slice(&mailbox.mdh.get().to_le_bytes());
        let len = out.len().min(MAX_DATA_LEN);
        out[..len].copy_from_slice(&data[..len]);
        Ok(())
    }

    fn write_buffer(&mut self, slot: u8, bytes: &[u8]) -> Result<(), OutOfBounds> {
        let mailbox = self.mailbox(slot)?;
        let mut data = [0; MAX_DATA_LEN];
        let len = bytes.len().min(MAX_DATA_LEN);
        data[..len].copy_from_slice(&bytes[..len]);
        mailbox.mdl.set(u32::from_le_bytes([data[0], data[1], data[2], data[3]]));
        mailbox.mdh.set(u32::from_le_bytes([data[4], data[5], data[6], data[7]]));
        Ok(())
    }

    fn request_send(&mut self, buffers: BufferSet) -> Result<(), OutOfBounds> {
        for slot in buffers.iter() {
            let staged = *self.staged.get(usize::from(slot)).ok_or(OutOfBounds)?;
            self.mailbox(slot)?.mcr.set(staged | MTCR);
            self.enable_interrupts(1 << slot);
        }
        Ok(())
    }
}

impl Controller for Mailboxes<'_> {
    const TIMING: BitTimingRanges = TIMING;

    const SUPPORTS_LOOPBACK: bool = false;

    fn layout(buffers: &BufferConfig) -> Option<BufferLayout> {
        if usize::from(buffers.tx) + usize::from(buffers.rx) > MAILBOXES {
            return None;
        }
        Some(BufferLayout {
            tx: buffers.tx,
            rx: buffers.rx,
            tx_shift: 0,
            rx_shift: buffers.tx,
            rx_slot: buffers.tx,
        })
    }

    fn reset(&mut self) -> Result<(), OutOfBounds> {
        self.regs.mr.set(0);
        self.disable_interrupts(u32::MAX);
        self.staged = [0; MAILBOXES];
        // Clears the error events
        let _ = self.regs.sr.get();
        Ok(())
    }

    fn mode(&mut self) -> Result<Mode, OutOfBounds> {
        let mr = Mr(self.regs.mr.get());
        Ok(if !mr.canen() {
            Mode::Configuration
        } else if mr.lpm() {
            // LPM is only a request; SR.SLEEP confirms it. Reading SR clears
            // the error flags.
            if Sr(self.regs.sr.get()).sleep() {
                Mode::Sleep
            } else {
                Mode::Normal
            }
        } else if mr.abm() {
            Mode::ListenOnly
        } else {
            Mode::Normal
        })
    }

    fn request_mode(&mut self, mode: Mode) -> Result<(), OutOfBounds> {
        let mut mr = Mr(0);
        match mode {
            Mode::Configuration => {}
            Mode::Normal => mr.set_canen(true),
            Mode::Sleep => {
                mr.set_canen(true);
                mr.set_lpm(true);
            }
            Mode::ListenOnly => {
                mr.set_canen(true);
                mr.set_abm(true);
            }
            // No such mode; the read-back will tell
            Mode::Loopback => return Ok(()),
        }
        self.regs.mr.set(mr.0);
        Ok(())
    }

    fn write_timing(&mut self, timing: &TimingFields, _: &CanConfig) -> Result<bool, OutOfBounds> {
        let mut br = Br(0);
        br.set_brp(timing.prescaler);
        br.set_sjw(timing.sjw);
        br.set_propag(timing.prop_seg);
        br.set_phase1(timing.phase_seg_1);
        br.set_phase2(timing.phase_seg_2);
        self.regs.br.set(br.0);
        Ok(self.regs.br.get() == br.0)
    }

    fn configure_buffers(&mut self, layout: &BufferLayout) -> Result<bool, OutOfBounds> {
        let mut verified = true;
        for (slot, mailbox) in (0..).zip(self.regs.mb.iter()) {
            let kind = if slot < layout.tx {
                MailboxType::Transmit
            } else if slot < layout.tx + layout.rx {
                MailboxType::Receive
            } else {
                MailboxType::Disabled
            };
            let mut mmr = Mmr(0);
            mmr.set_mot(kind as u8);
            mailbox.mmr.set(mmr.0);
            if kind == MailboxType::Receive {
                // Accept every frame
                mailbox.mam.set(0);
                mailbox.mid.set(0);
                mailbox.mcr.set(MTCR);
            }
            verified &= Mmr(mailbox.mmr.get()).mot() == kind as u8;
        }
        let mut sr = Sr::protocol_errors();
        sr.set_wakeup(true);
        self.enable_interrupts(layout.receive_bits(BufferSet::all()) | sr.0);
        Ok(verified)
    }

    fn tx_ready(&mut self, index: u8) -> Result<bool, OutOfBounds> {
        Ok(Msr(self.mailbox(index)?.msr.get()).mrdy())
    }

    fn load(&mut self, index: u8, message: &tx::Message) -> Result<(), OutOfBounds> {
        let image = RawFrame::encode(message);
        let mut mmr = Mmr(0);
        mmr.set_mot(MailboxType::Transmit as u8);
        mmr.set_prior(3 - message.priority() as u8);
        self.write(Register::Mmr(index), mmr.0)?;
        self.write(Register::Mid(index), image.mid)?;
        self.write_buffer(index, &image.data)?;
        *self.staged.get_mut(usize::from(index)).ok_or(OutOfBounds)? = image.control;
        Ok(())
    }

    fn status(&mut self, layout: &BufferLayout) -> Result<Status, OutOfBounds> {
        let raw = self.regs.sr.get();
        let sr = Sr(raw & self.enabled);
        let flagged = u32::from(sr.mb());
        let received = layout.received(flagged);
        let mut overflow = false;
        for index in received.iter() {
            overflow |= Msr(self.mailbox(layout.rx_slot(index))?.msr.get()).mmi();
        }
        Ok(Status {
            transmitted: layout.transmitted(flagged),
            received,
            bus_error: sr.0 & Sr::protocol_errors().0 != 0,
            overflow,
            wake: sr.wakeup(),
            raw,
        })
    }

    fn receive(&mut self, layout: &BufferLayout, index: u8) -> Result<rx::Message, OutOfBounds> {
        let slot = layout.rx_slot(index);
        let mut image = RawFrame {
            mid: self.read(Register::Mid(slot))?,
            control: self.read(Register::Msr(slot))?,
            data: [0; MAX_DATA_LEN],
        };
        self.read_buffer(slot, &mut image.data)?;
        self.write(Register::Mcr(slot), MTCR)?;
        Ok(image.decode())
    }

    fn acknowledge(&mut self, layout: &BufferLayout, status: &Status) -> Result<(), OutOfBounds> {
        // Transmit mailboxes stay ready once done; silence them until the
        // next request. Everything else is cleared by the status read or by
        // re-arming.
        let done = layout.transmit_bits(status.transmitted);
        if done != 0 {
            self.disable_interrupts(done);
        }
        Ok(())
    }

    fn error_counters(&mut self) -> Result<ErrorCounters, OutOfBounds> {
        let ecr = Ecr(self.regs.ecr.get());
        Ok(ErrorCounters {
            transmit: ecr.tec(),
            receive: ecr.rec(),
        })
    }

    fn leave_sleep(&mut self) -> Result<(), OutOfBounds> {
        self.request_mode(Mode::ListenOnly)
    }
}
