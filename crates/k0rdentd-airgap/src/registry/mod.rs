//! Local OCI registry serving a bundle's images to containerd

pub mod server;
pub mod storage;

pub use server::router;
pub use storage::{BlobStore, StoreError, digest_of};
