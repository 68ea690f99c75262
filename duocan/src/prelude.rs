//! Traits needed to call methods on the driver's types
use crate::message;
pub use message::Raw as _;
pub use message::WireFormat as _;

pub use crate::transport::Controller as _;
pub use crate::transport::Transport as _;
