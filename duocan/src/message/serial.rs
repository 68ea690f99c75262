//! Frame image of the MCP2515 buffer registers
//!
//! A buffer is 13 consecutive registers: `SIDH SIDL EID8 EID0 DLC D0..D7`.
//! The transmit and receive buffers share the layout with one difference: a
//! received standard frame flags a remote request in `SIDL.SRR`, a received
//! extended frame in `DLC.RTR`, while the transmit side always uses
//! `DLC.RTR`.

use super::*;
use embedded_can::{ExtendedId, StandardId};

/// Number of registers in a buffer image
pub const IMAGE_LEN: usize = 13;
/// Number of registers before the data bytes
pub const HEADER_LEN: usize = 5;

const SIDH: usize = 0;
const SIDL: usize = 1;
const EID8: usize = 2;
const EID0: usize = 3;
const DLC: usize = 4;

/// Standard frame remote request, receive buffers only
const SIDL_SRR: u8 = 1 << 4;
/// Extended identifier enable
const SIDL_EXIDE: u8 = 1 << 3;
const DLC_RTR: u8 = 1 << 6;
const DLC_MASK: u8 = 0x0f;

/// Buffer image as transferred over the serial link
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RawFrame(pub [u8; IMAGE_LEN]);

impl RawFrame {
    /// The registers that need to be written for the frame: the header and
    /// as many data bytes as the frame carries.
    pub fn as_bytes(&self) -> &[u8] {
        let len = if self.0[DLC] & DLC_RTR != 0 {
            0
        } else {
            dlc_to_len(self.0[DLC] & DLC_MASK)
        };
        &self.0[..HEADER_LEN + len]
    }
}

impl WireFormat for RawFrame {
    fn encode(message: &tx::Message) -> Self {
        let mut image = [0; IMAGE_LEN];
        match message.id() {
            Id::Standard(id) => {
                let id = id.as_raw();
                image[SIDH] = (id >> 3) as u8;
                image[SIDL] = ((id & 0x07) << 5) as u8;
            }
            Id::Extended(id) => {
                let id = id.as_raw();
                image[SIDH] = (id >> 21) as u8;
                image[SIDL] =
                    (((id >> 18) & 0x07) << 5) as u8 | SIDL_EXIDE | ((id >> 16) & 0x03) as u8;
                image[EID8] = (id >> 8) as u8;
                image[EID0] = id as u8;
            }
        }
        image[DLC] = message.dlc() & DLC_MASK;
        if message.is_remote_frame() {
            image[DLC] |= DLC_RTR;
            // Unimplemented in TXBnSIDL, set so the image reads like a
            // received one
            if !message.is_extended() {
                image[SIDL] |= SIDL_SRR;
            }
        } else {
            let data = message.data();
            image[HEADER_LEN..HEADER_LEN + data.len()].copy_from_slice(data);
        }
        RawFrame(image)
    }

    fn decode(&self) -> rx::Message {
        let image = &self.0;
        let standard = (u16::from(image[SIDH]) << 3) | u16::from(image[SIDL] >> 5);
        let (id, remote) = if image[SIDL] & SIDL_EXIDE != 0 {
            let raw = (u32::from(standard) << 18)
                | (u32::from(image[SIDL] & 0x03) << 16)
                | (u32::from(image[EID8]) << 8)
                | u32::from(image[EID0]);
            // The mask ensures the ID is in range for a 29-bit integer
            let id = unsafe { ExtendedId::new_unchecked(raw & ExtendedId::MAX.as_raw()) };
            (Id::Extended(id), image[DLC] & DLC_RTR != 0)
        } else {
            // The mask ensures the ID is in range for a 11-bit integer
            let id = unsafe { StandardId::new_unchecked(standard & StandardId::MAX.as_raw()) };
            (Id::Standard(id), image[SIDL] & SIDL_SRR != 0)
        };
        let kind = if remote {
            FrameKind::Remote
        } else {
            FrameKind::Data
        };
        rx::Message(RawMessage::received(
            id,
            kind,
            image[DLC] & DLC_MASK,
            &image[HEADER_LEN..],
        ))
    }
}
