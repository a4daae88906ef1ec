//! This library implements exact [Gaussian Process](https://en.wikipedia.org/wiki/Gaussian_process) regression
//! with a gaussian noise likelihood.
//!
//! The prior of the GP is given by a mean model `m(x) = f(x).beta` (see [mean_models]) and a
//! covariance `k(x, x') = sigma2 * r(x, x')` where `r` is a correlation model (see [correlation_models]).
//! Observations are corrupted by an independent gaussian noise of variance `noise`.
//!
//! Hyperparameters (correlation `theta`, process variance `sigma2` and `noise` variance) are estimated
//! by maximizing the marginal log likelihood with a multistart COBYLA optimizer. They can also be
//! estimated jointly for several chunks of data sharing the same hyperparameters (see
//! [GpValidParams::fit_shared]), which is the building block of committees of GP experts.
//!
//! GP methods are implemented by [GaussianProcess] parameterized by [GpParams].
//!
//! # Example
//!
//! ```no_run
//! use distgp_gp::{correlation_models::*, mean_models::*, GaussianProcess};
//! use linfa::prelude::*;
//! use ndarray::{array, Array1};
//!
//! let xt = array![[0.0], [1.0], [2.0], [3.0], [4.0]];
//! let yt = array![0.0, 1.0, 1.5, 0.9, 1.0];
//!
//! let gp = GaussianProcess::<f64, ZeroMean, SquaredExponentialCorr>::params(
//!     ZeroMean::default(),
//!     SquaredExponentialCorr::default(),
//! )
//! .fit(&Dataset::new(xt, yt))
//! .expect("GP fitted");
//!
//! let (mean, var) = gp.posterior_mean_var(&array![[1.5], [2.5]]).expect("GP prediction");
//! ```
#![warn(missing_docs)]
#![warn(rustdoc::broken_intra_doc_links)]
mod algorithm;
pub mod correlation_models;
mod densities;
mod errors;
pub mod mean_models;

mod parameters;
mod utils;

mod optimization;

pub use algorithm::*;
pub use densities::multivariate_normal;
pub use errors::*;
pub use parameters::*;
pub use utils::DiffMatrix;
