//! Messages received from the bus.

use super::*;

/// RX message, decoded out of a receive buffer
///
/// Owned by the receive path; handlers get to borrow it for the duration of
/// the call.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Message(pub(super) RawMessage);

impl Message {
    /// Create a transmission object from rx object
    ///
    /// Useful for answering remote requests or echoing frames back.
    pub fn as_tx_builder(&'_ self) -> tx::MessageBuilder<'_> {
        tx::MessageBuilder {
            id: self.id(),
            frame_type: match self.kind() {
                FrameKind::Remote => tx::FrameType::Remote {
                    desired_len: self.decoded_dlc(),
                },
                FrameKind::Data => tx::FrameType::Data(self.data()),
            },
            priority: Default::default(),
        }
    }
}

impl Raw for Message {
    fn id(&self) -> Id {
        self.0.id()
    }
    fn kind(&self) -> FrameKind {
        self.0.kind()
    }
    fn dlc(&self) -> u8 {
        self.0.dlc()
    }
    fn decoded_dlc(&self) -> usize {
        self.0.decoded_dlc()
    }
    fn data(&self) -> &[u8] {
        self.0.data()
    }
    fn is_extended(&self) -> bool {
        self.0.is_extended()
    }
    fn is_remote_frame(&self) -> bool {
        self.0.is_remote_frame()
    }
}
