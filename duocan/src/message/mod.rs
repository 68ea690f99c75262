//! Handling of messages/frames
//!
//! [`tx::MessageBuilder`] validates an identifier and payload into a
//! [`tx::Message`]. The controllers lay frames out differently; each layout
//! implements [`WireFormat`] to convert between a message and its image in
//! the controller's buffer registers.

pub mod mailbox;
pub mod rx;
pub mod serial;
pub mod tx;

use core::cmp::min;
use embedded_can::Id;

/// Largest payload of a classic CAN frame
pub const MAX_DATA_LEN: usize = 8;

/// Data does not fit in a classic CAN frame
#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TooMuchData;

/// Whether a frame carries data or requests it
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FrameKind {
    /// Frame with a 0-8 byte payload
    Data,
    /// Remote transmission request. Carries no bytes, but declares the length
    /// of the requested frame.
    Remote,
}

/// Conversion between messages and the image of a frame in a controller's
/// buffer registers
pub trait WireFormat: Sized {
    /// Lay out `message` the way the controller expects it in a transmit
    /// buffer
    fn encode(message: &tx::Message) -> Self;

    /// Interpret the image of a receive buffer
    ///
    /// Never fails. Fields are masked to their widths and at most
    /// [`MAX_DATA_LEN`] bytes are taken, so a garbled image still produces a
    /// message.
    fn decode(&self) -> rx::Message;
}

/// Message in a controller independent representation
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct RawMessage {
    kind: FrameKind,
    id: Id,
    dlc: u8,
    data: [u8; MAX_DATA_LEN],
}

impl RawMessage {
    /// Collects the fields read out of a receive buffer. Only the bytes
    /// covered by `dlc` are kept.
    pub(crate) fn received(id: Id, kind: FrameKind, dlc: u8, bytes: &[u8]) -> Self {
        let dlc = dlc & 0xf;
        let mut data = [0; MAX_DATA_LEN];
        if kind == FrameKind::Data {
            let len = min(dlc_to_len(dlc), bytes.len());
            data[..len].copy_from_slice(&bytes[..len]);
        }
        Self {
            kind,
            id,
            dlc,
            data,
        }
    }
}

/// Common functionality for all messages
pub trait Raw {
    /// Returns the CAN identifier of the message
    fn id(&self) -> Id;
    /// Data or remote frame
    fn kind(&self) -> FrameKind;
    /// Data length code
    fn dlc(&self) -> u8;
    /// Data length in bytes
    fn decoded_dlc(&self) -> usize;
    /// Data field
    fn data(&self) -> &[u8];
    /// Check if the frame uses an extended (29-bit) ID
    fn is_extended(&self) -> bool;
    /// Remote Transmission Request
    fn is_remote_frame(&self) -> bool;
}

impl Raw for RawMessage {
    fn id(&self) -> Id {
        self.id
    }

    fn kind(&self) -> FrameKind {
        self.kind
    }

    fn dlc(&self) -> u8 {
        self.dlc
    }

    fn decoded_dlc(&self) -> usize {
        dlc_to_len(self.dlc)
    }

    fn data(&self) -> &[u8] {
        match self.kind {
            FrameKind::Data => self.data.get(..self.decoded_dlc()).unwrap_or(&[]),
            FrameKind::Remote => &[],
        }
    }

    fn is_extended(&self) -> bool {
        matches!(self.id, Id::Extended(_))
    }

    fn is_remote_frame(&self) -> bool {
        self.kind == FrameKind::Remote
    }
}

macro_rules! impl_frame {
    ($message:ty, $wrap:expr) => {
        impl embedded_can::Frame for $message {
            fn new(id: impl Into<Id>, data: &[u8]) -> Option<Self> {
                tx::MessageBuilder {
                    id: id.into(),
                    frame_type: tx::FrameType::Data(data),
                    priority: Default::default(),
                }
                .build()
                .ok()
                .map($wrap)
            }

            fn new_remote(id: impl Into<Id>, dlc: usize) -> Option<Self> {
                if dlc > 15 {
                    return None;
                }
                tx::MessageBuilder {
                    id: id.into(),
                    frame_type: tx::FrameType::Remote {
                        desired_len: dlc_to_len(dlc as u8),
                    },
                    priority: Default::default(),
                }
                .build()
                .ok()
                .map($wrap)
            }

            fn is_extended(&self) -> bool {
                Raw::is_extended(self)
            }

            fn is_remote_frame(&self) -> bool {
                Raw::is_remote_frame(self)
            }

            fn id(&self) -> Id {
                Raw::id(self)
            }

            fn dlc(&self) -> usize {
                Raw::dlc(self).into()
            }

            fn data(&self) -> &[u8] {
                Raw::data(self)
            }
        }
    };
}

impl_frame!(tx::Message, |m| m);
impl_frame!(rx::Message, |m: tx::Message| rx::Message(m.raw));

/// Finds the data length code that encodes len bytes
fn len_to_dlc(len: usize) -> Result<u8, TooMuchData> {
    if len <= MAX_DATA_LEN {
        Ok(len as u8)
    } else {
        Err(TooMuchData)
    }
}

/// Converts data length code to a length in bytes
fn dlc_to_len(dlc: u8) -> usize {
    min(dlc.into(), MAX_DATA_LEN)
}
