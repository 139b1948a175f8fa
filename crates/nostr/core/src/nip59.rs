//! NIP-59: Gift Wrap.
//!
//! Only the envelope shape matters to a relay watcher: the wrap is addressed
//! through its `p` tag and its content stays opaque.

use crate::nip01::Event;

/// Kind of the outer gift-wrap envelope.
pub const KIND_GIFT_WRAP: u16 = 1059;

/// Kind of the seal nested inside a gift wrap.
pub const KIND_SEAL: u16 = 13;

/// Whether the event is a gift-wrap envelope.
pub fn is_gift_wrap(event: &Event) -> bool {
    event.kind == KIND_GIFT_WRAP
}

/// The recipient a gift wrap is addressed to (its first `p` tag).
pub fn gift_wrap_recipient(event: &Event) -> Option<&str> {
    event.tag_values("p").next()
}
