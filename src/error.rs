use thiserror::Error;

/// Faults reported by handle operations. A failed weak upgrade is not a
/// fault: it is the `None` branch of [`WeakHandle::upgrade`].
///
/// [`WeakHandle::upgrade`]: crate::weak::WeakHandle::upgrade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HandleError {
    /// The handle no longer holds a value, e.g. after a transfer-out.
    #[error("handle holds no value")]
    EmptyHandle,
    /// The backing allocation could not be made. Nothing was constructed and
    /// no partial control block is left behind.
    #[error("value construction failed")]
    ConstructionFailed
}
