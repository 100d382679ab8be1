use allocator_api2::alloc::{ handle_alloc_error, Allocator, Global };
use std::fmt::{ Debug, Display };
use crate::{
    control::ControlBlock,
    error::HandleError,
    weak::WeakHandle
};

// Shared owner handle. Any number of SharedHandles may own one value; the
// value is destroyed the instant the last of them is dropped, and the control
// block is freed once no WeakHandle observes it either.
pub struct SharedHandle<T, A = Global>
where A: Allocator + Clone
{
    value: *mut T,
    ctrl: *mut ControlBlock<T, A>
}

impl<T> SharedHandle<T, Global> {
    /// Construct a value on the heap and wrap it in a SharedHandle holding
    /// sole ownership (strong count 1, no weak observers).
    pub fn make(value: T) -> Self { Self::make_in(value, Global) }
}

impl<T, A> SharedHandle<T, A>
where A: Allocator + Clone
{
    pub fn make_in(value: T, alloc: A) -> Self {
        match Self::try_make_in(value, alloc) {
            Ok(handle) => handle,
            Err(_) => handle_alloc_error(ControlBlock::<T, A>::layout())
        }
    }

    /// Fallible form of [`Self::make_in`]: reports `ConstructionFailed` when
    /// the allocator refuses, leaving no partial control block behind.
    pub fn try_make_in(value: T, alloc: A) -> Result<Self, HandleError> {
        let ctrl = ControlBlock::new_inner(value, alloc)?;
        Ok(unsafe { Self { value: ControlBlock::value_ptr(ctrl), ctrl } })
    }

    // Caller must have incremented the strong count for this handle already.
    pub(crate) unsafe fn from_ctrl(ctrl: *mut ControlBlock<T, A>) -> Self {
        Self { value: ControlBlock::value_ptr(ctrl), ctrl }
    }

    fn ctrl(&self) -> &ControlBlock<T, A> { unsafe { &*self.ctrl } }

    pub fn get(&self) -> &T { unsafe { &*self.value } }
    pub fn get_mut(&mut self) -> &mut T { unsafe { &mut *self.value } }
    pub fn as_ptr(&self) -> *mut T { self.value }

    /// Snapshot of the current strong count. Authoritative in single-threaded
    /// use; may be stale the instant another thread clones or drops.
    pub fn strong_count(&self) -> usize { self.ctrl().strong_count() }
    /// Snapshot of the number of live WeakHandles over this value.
    pub fn weak_count(&self) -> usize { self.ctrl().weak_count() }

    pub fn is_unique(&self) -> bool { self.strong_count() == 1 }

    /// Create a non-owning observer over the same value. Raises the weak
    /// count only; the value's lifetime is unaffected.
    pub fn downgrade(&self) -> WeakHandle<T, A> {
        self.ctrl().inc_weak();
        WeakHandle::from_ctrl(self.ctrl)
    }
}

impl<T, A> Clone for SharedHandle<T, A>
where A: Allocator + Clone
{
    // No allocation: both handles reference the same control block.
    fn clone(&self) -> Self {
        self.ctrl().inc_strong();
        Self { value: self.value, ctrl: self.ctrl }
    }
}

impl<T, A> Drop for SharedHandle<T, A>
where A: Allocator + Clone
{
    fn drop(&mut self) {
        unsafe {
            if (*self.ctrl).dec_strong() {
                ControlBlock::destroy_value(self.ctrl);
                // release the weak claim the strong family held on the block
                if (*self.ctrl).dec_weak() {
                    ControlBlock::dealloc(self.ctrl);
                }
            }
        }
    }
}

unsafe impl<T, A> Send for SharedHandle<T, A>
where T: Send + Sync,
      A: Allocator + Clone + Send + Sync
{}
unsafe impl<T, A> Sync for SharedHandle<T, A>
where T: Send + Sync,
      A: Allocator + Clone + Send + Sync
{}

impl<T, A> Debug for SharedHandle<T, A>
where T: Debug,
      A: Allocator + Clone
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SharedHandle {{ value: {:?}, strong: {}, weak: {} }}",
            self.get(), self.strong_count(), self.weak_count())
    }
}

impl<T, A> Display for SharedHandle<T, A>
where T: Display,
      A: Allocator + Clone
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.get())
    }
}

#[cfg(test)]
pub mod tests {
    use super::SharedHandle;
    use crate::error::HandleError;
    use allocator_api2::alloc::{ AllocError, Allocator, Global };
    use std::{
        alloc::Layout,
        cell::Cell,
        error::Error,
        ptr::NonNull,
        rc::Rc,
        sync::{
            Arc,
            atomic::{ AtomicUsize, Ordering }
        }
    };
    type TestReturn = Result<(), Box<dyn Error>>;

    struct DropProbe {
        drops: Rc<Cell<usize>>
    }
    impl Drop for DropProbe {
        fn drop(&mut self) {
            self.drops.set(self.drops.get() + 1);
        }
    }

    #[derive(Clone)]
    struct FailingAlloc;
    unsafe impl Allocator for FailingAlloc {
        fn allocate(&self, _layout: Layout) -> Result<NonNull<[u8]>, AllocError> {
            Err(AllocError)
        }
        unsafe fn deallocate(&self, _ptr: NonNull<u8>, _layout: Layout) {
            unreachable!("FailingAlloc never hands out memory");
        }
    }

    #[test]
    fn fresh_handle_owns_alone() -> TestReturn {
        let shared = SharedHandle::make(String::from("Player"));
        assert!(shared.strong_count() == 1, "Strong count for a fresh SharedHandle should be 1");
        assert!(shared.weak_count() == 0, "Weak count for a fresh SharedHandle should be 0");
        assert!(shared.is_unique(), "A fresh SharedHandle should be the unique owner");
        assert!(shared.get() == "Player", "Retrieved value should equal \"Player\" instead of {}", shared.get());
        Ok(())
    }

    #[test]
    fn clone_and_drop_arithmetic() -> TestReturn {
        // after n clones and m drops the strong count is n + 1 - m
        let shared: SharedHandle<i32, Global> = SharedHandle::make(100);
        let clones: Vec<_> = (0..4).map(|_| shared.clone()).collect();
        assert!(shared.strong_count() == 5, "Strong count after 4 clones should be 5 instead of {}", shared.strong_count());
        for (dropped, clone) in clones.into_iter().enumerate() {
            assert!(*clone.get() == 100, "Every clone should read the same value");
            drop(clone);
            assert!(shared.strong_count() == 4 - dropped, "Strong count after {} drops should be {}", dropped + 1, 4 - dropped);
        }
        assert!(shared.is_unique(), "Original handle should be unique again after all clones dropped");
        Ok(())
    }

    #[test]
    fn value_destroyed_exactly_once_at_last_drop() -> TestReturn {
        let drops = Rc::new(Cell::new(0));
        let first = SharedHandle::make(DropProbe { drops: drops.clone() });
        let second = first.clone();
        let third = second.clone();
        drop(first);
        drop(second);
        assert!(drops.get() == 0, "Value must stay alive while a strong owner remains");
        drop(third);
        assert!(drops.get() == 1, "Destructor should have run exactly once instead of {} times", drops.get());
        Ok(())
    }

    #[test]
    fn mutation_through_unique_owner() -> TestReturn {
        let mut shared: SharedHandle<Vec<u8>, Global> = SharedHandle::make(vec![1, 2]);
        shared.get_mut().push(3);
        assert!(shared.get().as_slice() == [1, 2, 3], "Mutation through get_mut should be visible");
        Ok(())
    }

    #[test]
    fn failed_construction_reports_error() -> TestReturn {
        let result = SharedHandle::try_make_in(42i64, FailingAlloc);
        match result {
            Err(HandleError::ConstructionFailed) => Ok(()),
            Err(other) => panic!("Expected ConstructionFailed instead of {:?}", other),
            Ok(_) => panic!("Construction with a failing allocator should not succeed")
        }
    }

    struct SyncProbe {
        drops: Arc<AtomicUsize>
    }
    impl Drop for SyncProbe {
        fn drop(&mut self) {
            self.drops.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn concurrent_clones_destroy_value_once() -> TestReturn {
        let drops = Arc::new(AtomicUsize::new(0));
        let shared = SharedHandle::make(SyncProbe { drops: drops.clone() });
        let observer = shared.downgrade();
        let mut workers = Vec::new();
        for _ in 0..8 {
            let local = shared.clone();
            let weak = observer.clone();
            workers.push(std::thread::spawn(move || {
                for _ in 0..1000 {
                    let extra = local.clone();
                    if let Some(upgraded) = weak.upgrade() {
                        assert!(upgraded.strong_count() >= 2, "Upgrade while a local owner lives should see at least 2 owners");
                    }
                    drop(extra);
                }
            }));
        }
        drop(shared);
        for worker in workers {
            worker.join().unwrap();
        }
        assert!(drops.load(Ordering::SeqCst) == 1, "Destructor should have run exactly once across all threads");
        assert!(observer.is_expired(), "Observer should report expiry after every strong owner dropped");
        drop(observer);
        Ok(())
    }
}
