//! Shared test utilities for the grid-decode workspace.
//!
//! - Synthetic GRIB2 messages ([`Grib2Builder`]) and NetCDF classic files
//!   ([`NetCdfBuilder`])
//! - Grid and payload generators
//! - Scratch directories and float assertions
//!
//! ```toml
//! [dev-dependencies]
//! test-utils = { path = "../test-utils" }
//! ```

pub mod generators;
pub mod grib2;
pub mod netcdf;
pub mod paths;

pub use generators::*;
pub use grib2::Grib2Builder;
pub use netcdf::{set_dimension_length, set_num_records, NcKind, NetCdfBuilder};
pub use paths::*;

/// Approximate floating-point equality.
///
/// ```ignore
/// use test_utils::assert_approx_eq;
///
/// assert_approx_eq!(1.0001_f64, 1.0_f64, 0.001_f64);
/// ```
#[macro_export]
macro_rules! assert_approx_eq {
    ($left:expr, $right:expr, $epsilon:expr) => {{
        let left: f64 = $left as f64;
        let right: f64 = $right as f64;
        let epsilon: f64 = $epsilon as f64;
        let diff = (left - right).abs();
        if diff > epsilon {
            panic!(
                "assertion failed: `(left ≈ right)`\n  left: `{:?}`,\n right: `{:?}`,\n  diff: `{:?}` > epsilon `{:?}`",
                left, right, diff, epsilon
            );
        }
    }};
}
