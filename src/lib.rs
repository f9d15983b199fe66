//! Celldecomp
//!
//! Spatial domain decomposition for distributed particle simulations. Each rank owns a region
//! of a periodic box, stores its particles in cells surrounded by a frame of ghost cells, and
//! exchanges migrating particles and ghost state with the neighbouring ranks.
#![cfg_attr(feature = "strict", deny(warnings))]
#![warn(missing_docs)]

pub mod bc;
pub mod buffer;
pub mod comm;
pub mod config;
pub mod domain_decomposition;
pub mod fixed_quadruple_angle_list;
pub mod grid;
pub mod particle;
pub mod signals;
pub mod storage;
pub mod traits;
pub mod types;
