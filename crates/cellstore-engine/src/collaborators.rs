use cellstore_core::ports::{BlobStore, IndexStore, MetadataStore};
use cellstore_geo::{BincodeCodec, CellCovering, GeometryCodec, QuadCovering};
use std::sync::Arc;

/// The external services the engine drives
#[derive(Clone)]
pub struct Collaborators {
    pub index: Arc<dyn IndexStore>,
    pub blobs: Arc<dyn BlobStore>,
    pub metadata: Arc<dyn MetadataStore>,
    pub covering: Arc<dyn CellCovering>,
    pub codec: Arc<dyn GeometryCodec>,
}

impl Collaborators {
    /// Storage adapters with the quadtree covering and the bincode codec
    pub fn new(
        index: Arc<dyn IndexStore>,
        blobs: Arc<dyn BlobStore>,
        metadata: Arc<dyn MetadataStore>,
    ) -> Self {
        Self {
            index,
            blobs,
            metadata,
            covering: Arc::new(QuadCovering::new()),
            codec: Arc::new(BincodeCodec::new()),
        }
    }
}
