/*!
 * Send Token
 * One-shot ownership transfer between threads
 */

use super::composite::CompositeBuffer;
use super::Buffer;
use crate::core::errors::BufferError;
use crate::core::types::BufferResult;
use parking_lot::Mutex;

mod sealed {
    pub trait Sealed {}
    impl Sealed for super::Buffer {}
    impl Sealed for super::CompositeBuffer {}
}

/// Payload types that can ride a [`SendToken`]. The token is only ever
/// built from an owned value whose origin was invalidated first, which is
/// what makes handing it to another thread sound.
pub trait Transferable: sealed::Sealed {}
impl Transferable for Buffer {}
impl Transferable for CompositeBuffer {}

/// A one-shot ownership transfer.
///
/// Constructed by `send()` on an owned buffer: the origin becomes
/// inaccessible before the token exists, so no thread can touch the
/// payload while it is in flight. `receive` succeeds at most once; a token
/// dropped without being received releases its payload.
pub struct SendToken<T: Transferable> {
    slot: Mutex<Option<T>>,
}

// SAFETY: the payload was the sole handle to its region when the token was
// constructed (send requires ownership and invalidates the origin), and the
// mutex serializes the single hand-over. Receiving on another thread
// observes the payload state written before construction via the mutex's
// release/acquire pairing.
unsafe impl<T: Transferable> Send for SendToken<T> {}
unsafe impl<T: Transferable> Sync for SendToken<T> {}

impl<T: Transferable> SendToken<T> {
    pub(crate) fn new(payload: T) -> Self {
        Self {
            slot: Mutex::new(Some(payload)),
        }
    }

    /// Take ownership of the payload. Fails with `SendConsumed` on every
    /// call after the first.
    pub fn receive(&self) -> BufferResult<T> {
        self.slot.lock().take().ok_or(BufferError::SendConsumed)
    }

    /// Drop the token and release the payload if it was never received
    pub fn discard(self) {
        // The payload's own drop protocol runs when the slot drops.
    }

    /// Whether the payload has already been received
    pub fn is_consumed(&self) -> bool {
        self.slot.lock().is_none()
    }
}

impl<T: Transferable> std::fmt::Debug for SendToken<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "SendToken[consumed:{}]", self.is_consumed())
    }
}
