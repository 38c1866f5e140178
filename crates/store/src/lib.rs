//! Object storage port and adapters for bucketfs.
//!
//! The daemon sees one trait, [`ObjectStore`]: list-by-prefix, get, put
//! (empty), delete, and the two directory probes built on listings. The
//! reference adapter speaks S3; the in-memory adapter backs tests. Concrete
//! adapters are chosen at mount time and injected as `Arc<dyn ObjectStore>`.

mod context;
mod error;
mod memory;
mod object_store;
mod s3;

pub use context::{CallContext, DEFAULT_CALL_TIMEOUT};
pub use error::{Result, StoreError};
pub use memory::MemoryObjectStore;
pub use object_store::{now_unix, BodyReader, DirectoryInfo, Object, ObjectStore, PutResult};
pub use s3::{S3Config, S3ObjectStore};
