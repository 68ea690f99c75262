//! Messages to be sent on the bus

use super::*;

/// Transmission priority of a buffer
///
/// When several transmit buffers are pending, the controller starts the one
/// with the highest priority first. Buffers of equal priority are started in
/// an order the controller chooses.
#[derive(Default, Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Priority {
    /// Sent last
    #[default]
    Lowest,
    /// Low intermediate priority
    Low,
    /// High intermediate priority
    High,
    /// Sent first
    Highest,
}

/// TX message, validated and ready to be laid out for a controller
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub(super) raw: RawMessage,
    priority: Priority,
}

impl Message {
    /// Priority the message is queued with
    pub fn priority(&self) -> Priority {
        self.priority
    }
}

impl Raw for Message {
    fn id(&self) -> Id {
        self.raw.id()
    }
    fn kind(&self) -> FrameKind {
        self.raw.kind()
    }
    fn dlc(&self) -> u8 {
        self.raw.dlc()
    }
    fn decoded_dlc(&self) -> usize {
        self.raw.decoded_dlc()
    }
    fn data(&self) -> &[u8] {
        self.raw.data()
    }
    fn is_extended(&self) -> bool {
        self.raw.is_extended()
    }
    fn is_remote_frame(&self) -> bool {
        self.raw.is_remote_frame()
    }
}

/// Selects the type of the frame.
pub enum FrameType<'a> {
    /// 0-8 byte message payload
    Data(&'a [u8]),
    /// Requests transmission of the identified frame
    Remote {
        /// Length, in bytes, of the requested frame
        desired_len: usize,
    },
}

/// Describes a CAN message/frame that is not yet validated.
pub struct MessageBuilder<'a> {
    /// CAN identifier for the frame
    pub id: Id,
    /// Message frame type with a payload
    pub frame_type: FrameType<'a>,
    /// Priority among the pending transmit buffers
    pub priority: Priority,
}

impl<'a> MessageBuilder<'a> {
    /// Create the message. The payload is copied.
    pub fn build(self) -> Result<Message, TooMuchData> {
        let mut data = [0; MAX_DATA_LEN];
        let (kind, len) = match self.frame_type {
            FrameType::Data(payload) => {
                data.get_mut(..payload.len())
                    .ok_or(TooMuchData)?
                    .copy_from_slice(payload);
                (FrameKind::Data, payload.len())
            }
            FrameType::Remote { desired_len } => (FrameKind::Remote, desired_len),
        };
        let dlc = len_to_dlc(len)?;
        Ok(Message {
            raw: RawMessage {
                kind,
                id: self.id,
                dlc,
                data,
            },
            priority: self.priority,
        })
    }
}
