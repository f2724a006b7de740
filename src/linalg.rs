pub mod factorization;
pub mod kernels;
pub mod triangular;

pub use factorization::{ActiveSetFactorization, Projection, Update};
pub use triangular::{givens, UpperTriangular};
