use allocator_api2::alloc::{ handle_alloc_error, Allocator, Global };
use std::{
    alloc::Layout,
    fmt::{ Debug, Display },
    ptr::NonNull
};
use crate::error::HandleError;

// Sole-owner handle. No control block and no counters: exactly one
// ExclusiveHandle refers to a value at any time. Duplication is not offered
// (no Clone impl); ownership moves either with the handle itself or through
// transfer_from, which empties the source in place.
pub struct ExclusiveHandle<T, A = Global>
where A: Allocator + Clone
{
    // null once ownership has been transferred out
    value: *mut T,
    allocator: A
}

impl<T> ExclusiveHandle<T, Global> {
    /// Construct a value on the heap under exclusive ownership.
    pub fn make(value: T) -> Self { Self::make_in(value, Global) }
}

impl<T, A> ExclusiveHandle<T, A>
where A: Allocator + Clone
{
    pub fn make_in(value: T, alloc: A) -> Self {
        match Self::try_make_in(value, alloc) {
            Ok(handle) => handle,
            Err(_) => handle_alloc_error(Layout::new::<T>())
        }
    }

    /// Fallible form of [`Self::make_in`]: reports `ConstructionFailed` when
    /// the allocator refuses, constructing nothing.
    pub fn try_make_in(value: T, alloc: A) -> Result<Self, HandleError> {
        let raw = match alloc.allocate(Layout::new::<T>()) {
            Ok(ptr) => ptr.as_ptr() as *mut T,
            Err(_) => return Err(HandleError::ConstructionFailed)
        };
        unsafe { std::ptr::write(raw, value); }
        Ok(Self { value: raw, allocator: alloc })
    }

    /// Move ownership out of `src` into a fresh handle. The source is left
    /// empty; a second transfer from it reports `EmptyHandle`. Plain Rust
    /// moves of the handle itself cover the by-value case statically.
    pub fn transfer_from(src: &mut Self) -> Result<Self, HandleError> {
        match src.value.is_null() {
            true => Err(HandleError::EmptyHandle),
            false => Ok(Self {
                value: std::mem::replace(&mut src.value, std::ptr::null_mut()),
                allocator: src.allocator.clone()
            })
        }
    }

    /// Move the value out and release the allocation, consuming the handle.
    pub fn take(mut self) -> Result<T, HandleError> {
        match self.value.is_null() {
            true => Err(HandleError::EmptyHandle),
            false => {
                let raw = std::mem::replace(&mut self.value, std::ptr::null_mut());
                unsafe {
                    let value = std::ptr::read(raw);
                    self.allocator.deallocate(NonNull::new_unchecked(raw as *mut u8), Layout::new::<T>());
                    Ok(value)
                }
            }
        }
    }

    pub fn get(&self) -> Option<&T> {
        match self.value.is_null() {
            true => None,
            false => Some(unsafe { &*self.value })
        }
    }

    pub fn get_mut(&mut self) -> Option<&mut T> {
        match self.value.is_null() {
            true => None,
            false => Some(unsafe { &mut *self.value })
        }
    }

    pub fn is_empty(&self) -> bool { self.value.is_null() }
}

impl<T, A> Drop for ExclusiveHandle<T, A>
where A: Allocator + Clone
{
    fn drop(&mut self) {
        if !self.value.is_null() {
            unsafe {
                std::ptr::drop_in_place(self.value);
                self.allocator.deallocate(NonNull::new_unchecked(self.value as *mut u8), Layout::new::<T>());
            }
        }
    }
}

unsafe impl<T, A> Send for ExclusiveHandle<T, A>
where T: Send,
      A: Allocator + Clone + Send
{}
unsafe impl<T, A> Sync for ExclusiveHandle<T, A>
where T: Sync,
      A: Allocator + Clone + Sync
{}

impl<T, A> Debug for ExclusiveHandle<T, A>
where T: Debug,
      A: Allocator + Clone
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.get() {
            Some(value) => write!(f, "ExclusiveHandle {{ value: {:?} }}", value),
            None => write!(f, "ExclusiveHandle {{ empty }}")
        }
    }
}

impl<T, A> Display for ExclusiveHandle<T, A>
where T: Display,
      A: Allocator + Clone
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.get() {
            Some(value) => write!(f, "{}", value),
            None => write!(f, "None")
        }
    }
}
