//! Systemic Risk Index construction.
//!
//! The index is the first principal component of the standardized risk factors,
//! signed so that it rises with the reference factor and rescaled onto [0, 100]
//! over the exact window it was fit on.

pub mod index;
pub mod pca;
pub mod scaling;

pub use index::{construct_index, load_index, IndexOptions, IndexOutcome};
pub use pca::{first_component, PrincipalComponent};
pub use scaling::{min_max_scale, standardize};
