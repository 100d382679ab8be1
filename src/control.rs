use allocator_api2::alloc::{ Allocator, Global };
use std::{
    alloc::Layout,
    marker::PhantomData,
    mem::{ align_of, size_of },
    ptr::NonNull,
    sync::atomic::{
        AtomicU32,
        Ordering
    }
};
use crate::error::HandleError;

// Shared metadata for one managed value. The value slot lives directly after
// this header in the same allocation, so one allocate/deallocate pair covers
// both. Never exposed outside the crate; SharedHandle and WeakHandle reach it
// through raw pointers.
//
// The weak counter carries one implicit claim held collectively by the strong
// family: a fresh block starts at strong = 1, weak = 1, and the extra claim is
// released when the strong count crosses to zero. Deallocation therefore
// always races on a single counter. Observable counts (strong_count /
// weak_count) subtract the claim so callers see weak = 0 on a fresh block.
#[repr(C)]
pub(crate) struct ControlBlock<T, A = Global>
where A: Allocator + Clone
{
    strong: AtomicU32,
    weak: AtomicU32,
    _value: PhantomData<T>,
    allocator: A
}

impl<T, A> ControlBlock<T, A>
where A: Allocator + Clone
{
    fn value_offset() -> usize {
        size_of::<Self>().next_multiple_of(align_of::<T>())
    }

    pub(crate) fn layout() -> Layout {
        let size = Self::value_offset() + size_of::<T>();
        let align = align_of::<Self>().max(align_of::<T>());
        unsafe { Layout::from_size_align_unchecked(size, align) }
    }

    pub(crate) unsafe fn value_ptr(block: *mut Self) -> *mut T {
        (block as *mut u8).add(Self::value_offset()) as *mut T
    }

    pub(crate) fn new_inner(value: T, alloc: A) -> Result<*mut Self, HandleError> {
        let block = match alloc.allocate(Self::layout()) {
            Ok(raw) => raw.as_ptr() as *mut Self,
            Err(_) => return Err(HandleError::ConstructionFailed)
        };
        unsafe {
            std::ptr::write(block, Self {
                strong: AtomicU32::new(1),
                weak: AtomicU32::new(1),
                _value: PhantomData,
                allocator: alloc
            });
            std::ptr::write(Self::value_ptr(block), value);
        }
        Ok(block)
    }
}

impl<T, A> ControlBlock<T, A>
where A: Allocator + Clone
{
    pub(crate) fn inc_strong(&self) {
        self.strong.fetch_add(1, Ordering::SeqCst);
    }

    // True iff this decrement crossed the strong count to 0: the caller must
    // destroy the value now, then release the strong family's weak claim.
    pub(crate) fn dec_strong(&self) -> bool {
        self.strong.fetch_sub(1, Ordering::SeqCst) == 1
    }

    pub(crate) fn inc_weak(&self) {
        self.weak.fetch_add(1, Ordering::SeqCst);
    }

    // True iff this decrement crossed the weak count to 0: the caller must
    // deallocate the block now. The implicit claim guarantees the strong
    // count is already 0 at that point.
    pub(crate) fn dec_weak(&self) -> bool {
        self.weak.fetch_sub(1, Ordering::SeqCst) == 1
    }

    // Single atomic check-and-increment. A load followed by a separate
    // fetch_add would let the value be destroyed between the two steps.
    pub(crate) fn try_upgrade(&self) -> bool {
        let mut uses = self.strong.load(Ordering::SeqCst);
        while uses != 0 {
            match self.strong.compare_exchange_weak(uses, uses + 1, Ordering::SeqCst, Ordering::SeqCst) {
                Ok(_) => return true,
                Err(actual) => uses = actual
            }
        }
        false
    }

    pub(crate) fn strong_count(&self) -> usize {
        self.strong.load(Ordering::SeqCst) as usize
    }

    pub(crate) fn weak_count(&self) -> usize {
        let weak = self.weak.load(Ordering::SeqCst) as usize;
        match self.strong_count() {
            0 => weak,
            _ => weak - 1
        }
    }
}

impl<T, A> ControlBlock<T, A>
where A: Allocator + Clone
{
    // Runs the value's destructor in place. Called exactly once per block, by
    // whichever handle observed dec_strong crossing to 0.
    pub(crate) unsafe fn destroy_value(block: *mut Self) {
        std::ptr::drop_in_place(Self::value_ptr(block));
    }

    // Frees the joint allocation. Called exactly once per block, by whichever
    // handle observed dec_weak crossing to 0. The allocator is moved out of
    // the block before the memory is returned to it.
    pub(crate) unsafe fn dealloc(block: *mut Self) {
        let alloc = std::ptr::read(&(*block).allocator);
        alloc.deallocate(NonNull::new_unchecked(block as *mut u8), Self::layout());
    }
}
