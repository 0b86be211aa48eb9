//! Transaction routing.
//!
//! Every completed frame goes to exactly one place: the waiting caller, the
//! event dispatcher, or nowhere (logged as unexpected). The decision depends
//! only on the frame and the single pending request, so it is a pure
//! function here and the reader task applies it.

use bytes::Bytes;

use crate::address::Address;
use crate::protocol::{message, Frame};

/// The request a caller is currently waiting on.
///
/// At most one exists at a time. It is installed by the reader right before
/// the bytes are written and removed when the owning transaction ends, when
/// the next transmission replaces it, or on reset.
#[derive(Debug, Clone)]
pub struct PendingRequest {
    bytes: Bytes,
    length_hint: Option<usize>,
}

impl PendingRequest {
    /// A request for `bytes`, with an optional length hint for unknown
    /// reply types.
    pub fn new(bytes: impl Into<Bytes>, length_hint: Option<usize>) -> Self {
        Self {
            bytes: bytes.into(),
            length_hint,
        }
    }

    /// The transmitted bytes.
    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    pub fn length_hint(&self) -> Option<usize> {
        self.length_hint
    }

    /// Target address when the request is an `02 62` Insteon send.
    pub fn target(&self) -> Option<Address> {
        if self.bytes.get(1) == Some(&message::SEND_INSTEON) {
            self.bytes.get(2..5).and_then(Address::from_slice)
        } else {
            None
        }
    }
}

/// Where a completed frame goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// To the caller waiting on the pending request.
    Answer,
    /// To the event dispatcher.
    Event,
    /// Nobody wants it.
    Unexpected,
}

/// Classify a completed frame.
pub fn route(frame: &Frame, pending: Option<&PendingRequest>) -> Route {
    match frame.type_code() {
        message::STANDARD_RECEIVED | message::EXTENDED_RECEIVED => {
            let target = pending.and_then(PendingRequest::target);
            match (target, frame.from_address()) {
                (Some(target), Some(from)) if target == from => Route::Answer,
                _ => Route::Event,
            }
        }
        message::X10_RECEIVED => {
            if pending.is_some() {
                Route::Answer
            } else {
                Route::Event
            }
        }
        _ => {
            if pending.is_some() {
                Route::Answer
            } else {
                Route::Unexpected
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::build_standard;

    const A: Address = Address::new(0x12, 0x5F, 0x5E);
    const B: Address = Address::new(0x42, 0x22, 0xB8);

    fn direct_from(addr: Address) -> Frame {
        let [a, b, c] = addr.bytes();
        Frame::from_slice(&[0x02, 0x50, a, b, c, 0x44, 0x85, 0x11, 0x2F, 0x19, 0x80])
    }

    fn pending_for(addr: Address) -> PendingRequest {
        PendingRequest::new(build_standard(addr, 0x0F, 0x19, 0x00), Some(10))
    }

    #[test]
    fn test_direct_from_target_is_answer() {
        let pending = pending_for(A);
        assert_eq!(route(&direct_from(A), Some(&pending)), Route::Answer);
    }

    #[test]
    fn test_direct_from_other_is_event() {
        let pending = pending_for(A);
        assert_eq!(route(&direct_from(B), Some(&pending)), Route::Event);
    }

    #[test]
    fn test_direct_without_pending_is_event() {
        assert_eq!(route(&direct_from(A), None), Route::Event);
    }

    #[test]
    fn test_direct_with_non_insteon_pending_is_event() {
        let pending = PendingRequest::new(vec![0x02, 0x60], Some(9));
        assert_eq!(route(&direct_from(A), Some(&pending)), Route::Event);
    }

    #[test]
    fn test_x10_routes_by_pending() {
        let x10 = Frame::from_slice(&[0x02, 0x52, 0x66, 0x00]);
        assert_eq!(route(&x10, None), Route::Event);
        let pending = PendingRequest::new(vec![0x02, 0x63, 0x66, 0x00], Some(5));
        assert_eq!(route(&x10, Some(&pending)), Route::Answer);
    }

    #[test]
    fn test_other_types() {
        let record = Frame::from_slice(&[0x02, 0x57, 0xE2, 0x01, 1, 2, 3, 0, 0, 0]);
        assert_eq!(route(&record, None), Route::Unexpected);
        let pending = PendingRequest::new(vec![0x02, 0x6A], Some(3));
        assert_eq!(route(&record, Some(&pending)), Route::Answer);
    }

    #[test]
    fn test_pending_target() {
        assert_eq!(pending_for(B).target(), Some(B));
        assert_eq!(PendingRequest::new(vec![0x02, 0x60], None).target(), None);
    }
}
