use std::{cell::UnsafeCell, mem::MaybeUninit, ptr};

/// Fixed-capacity ring storage for channel buffers.
///
/// The capacity is a run-time value (a channel may be created with any
/// `cap >= 0`), so indices wrap by compare-and-reset rather than masking.
///
/// # Safety
///
/// `RingBuf` has no [`Drop`] implementation of its own: the channel that owns
/// it tracks which slots are initialized (the `count` window starting at
/// `recvx`) and is responsible for dropping them.
pub(crate) struct RingBuf<T> {
    slots: Box<[UnsafeCell<MaybeUninit<T>>]>,
}

impl<T> RingBuf<T> {
    pub(crate) fn new(cap: usize) -> Self {
        let mut slots = Vec::with_capacity(cap);
        slots.resize_with(cap, || UnsafeCell::new(MaybeUninit::uninit()));
        Self {
            slots: slots.into_boxed_slice(),
        }
    }

    /// Advances a ring index by one slot, wrapping at the capacity.
    #[inline]
    pub(crate) fn advance(&self, i: usize) -> usize {
        let next = i + 1;
        if next == self.slots.len() { 0 } else { next }
    }

    /// Moves `value` into slot `i`.
    ///
    /// # Safety
    ///
    /// - `i` must be in bounds and the slot must be vacant; an initialized
    ///   value would be overwritten without being dropped.
    /// - The caller must hold the owning channel's mutex.
    #[inline]
    pub(crate) unsafe fn write(&self, i: usize, value: T) {
        unsafe { ptr::write((*self.slots[i].get()).as_mut_ptr(), value) };
    }

    /// Moves the value out of slot `i`, leaving it vacant.
    ///
    /// # Safety
    ///
    /// - `i` must be in bounds and the slot must be initialized.
    /// - The caller must hold the owning channel's mutex.
    #[inline]
    pub(crate) unsafe fn read(&self, i: usize) -> T {
        unsafe { ptr::read((*self.slots[i].get()).as_ptr()) }
    }

    /// Drops the value in slot `i` in place.
    ///
    /// # Safety
    ///
    /// - `i` must be in bounds and the slot must be initialized.
    /// - The caller must have exclusive access to the buffer.
    #[inline]
    pub(crate) unsafe fn drop_in_place(&self, i: usize) {
        unsafe { ptr::drop_in_place((*self.slots[i].get()).as_mut_ptr()) };
    }
}
