//! Foundation types for Strata local history.
//!
//! Every other Strata crate depends on `strata-types`.
//!
//! # Key Types
//!
//! - [`BlobId`]: 128-bit identifier of a stored blob
//! - [`ResourcePath`]: absolute path of a workspace resource
//! - [`Depth`]: traversal depth (zero, one, infinite)
//! - [`HistoryState`]: one recorded past state of a resource
//! - [`CancelToken`]: cooperative cancellation flag

pub mod blob;
pub mod cancel;
pub mod error;
pub mod path;
pub mod state;

pub use blob::{BlobId, BLOB_ID_LEN};
pub use cancel::CancelToken;
pub use error::TypeError;
pub use path::{Depth, ResourcePath};
pub use state::{now_millis, to_millis, HistoryState};
