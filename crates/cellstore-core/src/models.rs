pub mod cover;
pub mod dataset;
pub mod feature;
pub mod geometry;
pub mod item;
pub mod keys;
pub mod records;

pub use cover::{CoverOptions, CoverParams, LevelParams};
pub use dataset::DatasetInfo;
pub use feature::{feature_collection, Feature, Version};
pub use geometry::{BBox, Geometry, GeometryType};
pub use item::{AttrValue, Item, ItemKey, PRIMARY_ATTR};
pub use keys::{IndexLevel, RowKey};
pub use records::{CanonicalRecord, CellRow, GeometryRef, Locator, Row, SecondaryRow};
