use allocator_api2::alloc::{ Allocator, Global };
use std::fmt::Debug;
use crate::{
    control::ControlBlock,
    shared::SharedHandle
};

// Non-owning observer handle. Holds a weak claim on the control block only,
// never on the value: the value is reachable solely through a successful
// upgrade, so a WeakHandle can never extend its lifetime.
pub struct WeakHandle<T, A = Global>
where A: Allocator + Clone
{
    ctrl: *mut ControlBlock<T, A>
}

impl<T, A> WeakHandle<T, A>
where A: Allocator + Clone
{
    // Caller must have incremented the weak count for this handle already.
    pub(crate) fn from_ctrl(ctrl: *mut ControlBlock<T, A>) -> Self {
        Self { ctrl }
    }

    fn ctrl(&self) -> &ControlBlock<T, A> { unsafe { &*self.ctrl } }

    /// Attempt to promote this observer into a shared owner. Succeeds iff the
    /// value is still alive, in which case the strong count is raised
    /// atomically with the aliveness check; returns `None` once the value has
    /// been destroyed. Routine outcome, not a fault.
    pub fn upgrade(&self) -> Option<SharedHandle<T, A>> {
        match self.ctrl().try_upgrade() {
            true => Some(unsafe { SharedHandle::from_ctrl(self.ctrl) }),
            false => None
        }
    }

    /// True iff the value has been destroyed at observation time. Advisory
    /// only: another thread may drop the last owner right after this returns
    /// false, so never use it as a guard before [`Self::upgrade`].
    pub fn is_expired(&self) -> bool {
        self.ctrl().strong_count() == 0
    }

    pub fn strong_count(&self) -> usize { self.ctrl().strong_count() }
    pub fn weak_count(&self) -> usize { self.ctrl().weak_count() }
}

impl<T, A> From<&SharedHandle<T, A>> for WeakHandle<T, A>
where A: Allocator + Clone
{
    fn from(shared: &SharedHandle<T, A>) -> Self {
        shared.downgrade()
    }
}

impl<T, A> Clone for WeakHandle<T, A>
where A: Allocator + Clone
{
    fn clone(&self) -> Self {
        self.ctrl().inc_weak();
        Self { ctrl: self.ctrl }
    }
}

impl<T, A> Drop for WeakHandle<T, A>
where A: Allocator + Clone
{
    fn drop(&mut self) {
        unsafe {
            if (*self.ctrl).dec_weak() {
                ControlBlock::dealloc(self.ctrl);
            }
        }
    }
}

unsafe impl<T, A> Send for WeakHandle<T, A>
where T: Send + Sync,
      A: Allocator + Clone + Send + Sync
{}
unsafe impl<T, A> Sync for WeakHandle<T, A>
where T: Send + Sync,
      A: Allocator + Clone + Send + Sync
{}

// Reports counters only. The value itself is never reachable through a
// WeakHandle, expired or not, so it is never printed either.
impl<T, A> Debug for WeakHandle<T, A>
where A: Allocator + Clone
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "WeakHandle {{ strong: {}, weak: {}, expired: {} }}",
            self.strong_count(), self.weak_count(), self.is_expired())
    }
}
