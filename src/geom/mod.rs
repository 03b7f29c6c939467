//! Planar and spherical geometry.

pub mod map;
pub mod sphere;
pub mod tan;

pub use map::MapFunction;
pub use sphere::SkyCoord;
pub use tan::TanProjection;
