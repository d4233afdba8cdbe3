//! Coordinate reference system transformations.
//!
//! Implements the projections raster tiles are delivered in from scratch,
//! without external dependencies. Everything resolves to geographic
//! longitude/latitude in degrees.

pub mod crs;
pub mod transverse_mercator;

pub use crs::{reproject_ring, round_coord, Crs, ProjectionError};
pub use transverse_mercator::{Ellipsoid, TransverseMercator};
