mod control;
pub mod error;
pub mod exclusive;
pub mod shared;
pub mod weak;

pub use error::HandleError;
pub use exclusive::ExclusiveHandle;
pub use shared::SharedHandle;
pub use weak::WeakHandle;
