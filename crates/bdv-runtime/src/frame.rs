use std::marker::PhantomData;
use std::thread::{self, ThreadId};

use crate::error::ViewerError;
use crate::host::{Attachment, Runtime};
use crate::vm::{PinnedFrame, ViewerVm};

/// Zero-copy view of a rendered frame, pinned inside the runtime.
///
/// While a `FrameView` is alive the thread that acquired it is inside a
/// critical section: the managed array cannot move, and every other runtime
/// call from this thread is refused. Release it (or drop it) as soon as the
/// pixels have been consumed. The view is not `Send`; it must be released on
/// the thread that acquired it.
pub struct FrameView<'s, V: ViewerVm> {
    width: i32,
    height: i32,
    complete: bool,
    pixels: *const u32,
    len: usize,
    pin: PinGuard<'s, V>,
}

impl<'s, V: ViewerVm> FrameView<'s, V> {
    pub(crate) fn new(attached: Attachment<'s, V>, frame: PinnedFrame<V::Pin>) -> Self {
        let PinnedFrame {
            width,
            height,
            complete,
            pixels,
            len,
            pin,
        } = frame;
        Self {
            width,
            height,
            complete,
            pixels,
            len,
            pin: PinGuard::new(attached, pin),
        }
    }

    pub fn width(&self) -> i32 {
        self.width
    }

    pub fn height(&self) -> i32 {
        self.height
    }

    /// True once the renderer has reached the finest screen scale for the
    /// current state.
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Packed ARGB pixels, row-major, `width * height` of them.
    pub fn pixels(&self) -> &[u32] {
        if self.pixels.is_null() || self.len == 0 {
            return &[];
        }
        // SAFETY: `PinnedFrame::new` requires the pointer to stay valid for
        // `len` reads until the pin is unpinned. Unpinning needs `self` by
        // value or its drop, so the borrow returned here cannot outlive it.
        unsafe { std::slice::from_raw_parts(self.pixels, self.len) }
    }

    /// Raw pixel pointer for native consumers. Valid until release.
    pub fn as_ptr(&self) -> *const u32 {
        self.pixels
    }

    /// Unpin the array and detach the thread.
    pub fn release(mut self) -> Result<(), ViewerError> {
        self.pin.release()
    }
}

/// Release capability for one pinned frame, bound to the pinning thread.
///
/// Owns the attachment made for the poll: releasing unpins the array, leaves
/// the critical section and detaches, once.
pub(crate) struct PinGuard<'s, V: ViewerVm> {
    runtime: &'s Runtime<V>,
    pin: Option<V::Pin>,
    owner: ThreadId,
    _thread: PhantomData<*const ()>,
}

impl<'s, V: ViewerVm> PinGuard<'s, V> {
    fn new(attached: Attachment<'s, V>, pin: V::Pin) -> Self {
        let runtime = attached.hand_off();
        runtime.enter_critical_section();
        Self {
            runtime,
            pin: Some(pin),
            owner: thread::current().id(),
            _thread: PhantomData,
        }
    }

    fn release(&mut self) -> Result<(), ViewerError> {
        if self.pin.is_none() {
            return Ok(());
        }
        if thread::current().id() != self.owner {
            tracing::error!(
                owner = ?self.owner,
                "Pinned frame released from a foreign thread; leaking pin"
            );
            return Err(ViewerError::ThreadAffinityViolation);
        }
        if let Some(pin) = self.pin.take() {
            let vm = self.runtime.vm();
            vm.unpin_frame(pin);
            self.runtime.leave_critical_section();
            vm.detach_current_thread();
            tracing::debug!("Frame released");
        }
        Ok(())
    }
}

impl<V: ViewerVm> Drop for PinGuard<'_, V> {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            tracing::error!("Failed to release frame: {e}");
        }
    }
}
