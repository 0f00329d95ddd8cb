//! cellstore geo - geometry conversions, validation, cell coverings and the
//! geometry codec
//!
//! Everything here is synchronous and CPU-bound; the engine crate owns all I/O.

pub mod codec;
pub mod covering;
pub mod level;
pub mod models;
pub mod validation;

pub use codec::{BincodeCodec, GeometryCodec};
pub use covering::{Cell, CellCovering, QuadCovering, TokenRange};
pub use level::{bbox_diagonal_meters, select_level};
