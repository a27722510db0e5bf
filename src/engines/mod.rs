//! Concrete [`crate::storage::Storage`] implementations and the
//! decorators that compose them into the default stack (spec §4).

pub mod body_store;
pub mod claim_serializer;
pub mod complex;
pub mod memory_store;
pub mod metadata_store;
pub mod throttle;

pub use body_store::BodyStore;
pub use claim_serializer::ClaimSerializer;
pub use complex::Complex;
pub use memory_store::{MemoryStoreBig, MemoryStoreSmall};
pub use metadata_store::MetadataStore;
pub use throttle::Throttle;
