//! Mean models `m(x) = f(x).beta` of the GP prior.
//!
//! `f(x)` gives p regression terms for each point, the weights `beta` being estimated
//! by generalized least squares when the GP is conditioned on data:
//! * [ZeroMean]: p = 0, the prior mean is zero,
//! * [ConstantMean]: p = 1,
//! * [LinearMean]: p = 1 + nx,
//! * [QuadraticMean]: p = 1 + nx + nx(nx + 1)/2.

use linfa::Float;
use ndarray::{concatenate, s, Array2, ArrayBase, Axis, Data, Ix2};
use paste::paste;
#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};
use std::convert::TryFrom;
use std::fmt;

/// A trait for mean models used in GP regression
pub trait RegressionModel<F: Float>:
    Clone + Copy + Default + fmt::Debug + fmt::Display + Send + Sync
{
    /// Regression terms (n, p) at the n points of `x` (n, nx)
    fn value(&self, x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Array2<F>;
}

/// A zero function as mean of the GP
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(
    feature = "serializable",
    derive(Serialize, Deserialize),
    serde(into = "String"),
    serde(try_from = "String")
)]
pub struct ZeroMean();

impl<F: Float> RegressionModel<F> for ZeroMean {
    fn value(&self, x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Array2<F> {
        Array2::<F>::zeros((x.nrows(), 0))
    }
}

/// A constant function as mean of the GP
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(
    feature = "serializable",
    derive(Serialize, Deserialize),
    serde(into = "String"),
    serde(try_from = "String")
)]
pub struct ConstantMean();

impl<F: Float> RegressionModel<F> for ConstantMean {
    fn value(&self, x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Array2<F> {
        Array2::<F>::ones((x.nrows(), 1))
    }
}

/// An affine function as mean of the GP
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(
    feature = "serializable",
    derive(Serialize, Deserialize),
    serde(into = "String"),
    serde(try_from = "String")
)]
pub struct LinearMean();

impl<F: Float> RegressionModel<F> for LinearMean {
    /// `[1, x_1, ..., x_nx]`
    fn value(&self, x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Array2<F> {
        concatenate![Axis(1), Array2::ones((x.nrows(), 1)), x.to_owned()]
    }
}

/// A 2-degree polynomial as mean of the GP
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(
    feature = "serializable",
    derive(Serialize, Deserialize),
    serde(into = "String"),
    serde(try_from = "String")
)]
pub struct QuadraticMean();

impl<F: Float> RegressionModel<F> for QuadraticMean {
    /// `[1, x_1, ..., x_nx, x_i * x_j for i <= j]`
    fn value(&self, x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Array2<F> {
        let nx = x.ncols();
        let mut res = Array2::zeros((x.nrows(), 1 + nx + nx * (nx + 1) / 2));
        res.slice_mut(s![.., ..=nx]).assign(&LinearMean().value(x));
        let mut k = nx + 1;
        for i in 0..nx {
            for j in i..nx {
                res.column_mut(k).assign(&(&x.column(i) * &x.column(j)));
                k += 1;
            }
        }
        res
    }
}

macro_rules! declare_mean_util_impls {
    ($regr:ident) => {
        paste! {
            impl fmt::Display for [<$regr Mean>] {
                fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                    write!(f, "{}Mean", stringify!($regr))
                }
            }

            impl From<[<$regr Mean>]> for String {
                fn from(_item: [<$regr Mean>]) -> Self {
                    [<$regr Mean>]().to_string()
                }
            }

            impl TryFrom<String> for [<$regr Mean>] {
                type Error = &'static str;
                fn try_from(s: String) -> Result<Self, Self::Error> {
                    if s == stringify!([<$regr Mean>]) {
                        Ok(Self::default())
                    } else {
                        Err(concat!("Bad string value for ", stringify!([<$regr Mean>])))
                    }
                }
            }
        }
    };
}

declare_mean_util_impls!(Zero);
declare_mean_util_impls!(Constant);
declare_mean_util_impls!(Linear);
declare_mean_util_impls!(Quadratic);
