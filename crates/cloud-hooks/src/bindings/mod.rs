//! Per-capability observable bindings.
//!
//! Each binding publishes a plain state record through a
//! [`StateCell`](cloud_core::StateCell) and routes its backend call through
//! [`CloudHooks::gated`](crate::CloudHooks::gated). Errors are published in the
//! record instead of being raised across the observer boundary.

mod file_url;
mod login_state;
mod upload;
mod watch;

pub use file_url::FileUrlBinding;
pub use login_state::LoginStateBinding;
pub use upload::UploadBinding;
pub use watch::WatchBinding;
