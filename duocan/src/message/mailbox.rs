//! Frame image of a memory-mapped mailbox
//!
//! A mailbox keeps the identifier in `MID`, length and remote flag in the
//! `MCR` (transmit) or `MSR` (receive) word and the payload in `MDL`/`MDH`.

use super::*;
use embedded_can::{ExtendedId, StandardId};

/// Extended identifier flag in `MID`
pub(crate) const MIDE: u32 = 1 << 29;
const MIDVA_SHIFT: u32 = 18;
const MDLC_SHIFT: u32 = 16;
/// Remote transmission request flag in `MCR`/`MSR`
pub(crate) const MRTR: u32 = 1 << 20;

/// Mailbox image
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RawFrame {
    /// Identifier word
    pub mid: u32,
    /// Length and remote flag, as found in `MSR` and written to `MCR`
    pub control: u32,
    /// Payload; `MDL` holds bytes 0-3, `MDH` bytes 4-7
    pub data: [u8; MAX_DATA_LEN],
}

impl WireFormat for RawFrame {
    fn encode(message: &tx::Message) -> Self {
        let mid = match message.id() {
            Id::Standard(id) => u32::from(id.as_raw()) << MIDVA_SHIFT,
            Id::Extended(id) => id.as_raw() | MIDE,
        };
        let mut control = u32::from(message.dlc() & 0xf) << MDLC_SHIFT;
        if message.is_remote_frame() {
            control |= MRTR;
        }
        let mut data = [0; MAX_DATA_LEN];
        let payload = message.data();
        data[..payload.len()].copy_from_slice(payload);
        RawFrame { mid, control, data }
    }

    fn decode(&self) -> rx::Message {
        let id = if self.mid & MIDE != 0 {
            // The mask ensures the ID is in range for a 29-bit integer
            Id::Extended(unsafe { ExtendedId::new_unchecked(self.mid & ExtendedId::MAX.as_raw()) })
        } else {
            // The mask ensures the ID is in range for a 11-bit integer
            Id::Standard(unsafe {
                StandardId::new_unchecked((self.mid >> MIDVA_SHIFT) as u16 & StandardId::MAX.as_raw())
            })
        };
        let kind = if self.control & MRTR != 0 {
            FrameKind::Remote
        } else {
            FrameKind::Data
        };
        let dlc = ((self.control >> MDLC_SHIFT) & 0xf) as u8;
        rx::Message(RawMessage::received(id, kind, dlc, &self.data))
    }
}
