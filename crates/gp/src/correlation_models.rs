//! A module for correlation models to model the error term of the GP model.
//!
//! The following correlation models are implemented:
//! * squared exponential,
//! * absolute exponential,
//! * matern 3/2,
//! * matern 5/2.
//!
//! All models are stationary: they are evaluated on differences `d = x - x'`
//! and parameterized by `theta`, the inverse of the length scale for each input component.

use linfa::Float;
use ndarray::{Array1, Array2, ArrayBase, Axis, Data, Ix1, Ix2, Zip};
#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};
use std::convert::TryFrom;
use std::fmt;

/// A trait for using a correlation model in GP regression
pub trait CorrelationModel<F: Float>:
    Clone + Copy + Default + fmt::Debug + fmt::Display + Send + Sync
{
    /// Correlations (n, 1) for the n differences `d` (n, nx) given `theta` (nx,)
    fn value(
        &self,
        d: &ArrayBase<impl Data<Elem = F>, Ix2>,
        theta: &ArrayBase<impl Data<Elem = F>, Ix1>,
    ) -> Array2<F>;
}

/// Squared exponential correlation models
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(
    feature = "serializable",
    derive(Serialize, Deserialize),
    serde(into = "String"),
    serde(try_from = "String")
)]
pub struct SquaredExponentialCorr();

impl<F: Float> CorrelationModel<F> for SquaredExponentialCorr {
    /// `exp(-0.5 * sum_j theta_j^2 d_j^2)`
    fn value(
        &self,
        d: &ArrayBase<impl Data<Elem = F>, Ix2>,
        theta: &ArrayBase<impl Data<Elem = F>, Ix1>,
    ) -> Array2<F> {
        let theta2 = theta.mapv(|v| v * v);
        let r = d.mapv(|v| v * v).dot(&theta2);
        r.mapv(|v| F::exp(F::cast(-0.5) * v)).insert_axis(Axis(1))
    }
}

/// Absolute exponential correlation models
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(
    feature = "serializable",
    derive(Serialize, Deserialize),
    serde(into = "String"),
    serde(try_from = "String")
)]
pub struct AbsoluteExponentialCorr();

impl<F: Float> CorrelationModel<F> for AbsoluteExponentialCorr {
    /// `exp(-sum_j theta_j |d_j|)`
    fn value(
        &self,
        d: &ArrayBase<impl Data<Elem = F>, Ix2>,
        theta: &ArrayBase<impl Data<Elem = F>, Ix1>,
    ) -> Array2<F> {
        let r = d.mapv(|v| v.abs()).dot(theta);
        r.mapv(|v| F::exp(-v)).insert_axis(Axis(1))
    }
}

/// Matern 3/2 correlation model
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(
    feature = "serializable",
    derive(Serialize, Deserialize),
    serde(into = "String"),
    serde(try_from = "String")
)]
pub struct Matern32Corr();

impl<F: Float> CorrelationModel<F> for Matern32Corr {
    /// `prod_j (1 + sqrt(3) theta_j |d_j|) * exp(-sqrt(3) sum_j theta_j |d_j|)`
    fn value(
        &self,
        d: &ArrayBase<impl Data<Elem = F>, Ix2>,
        theta: &ArrayBase<impl Data<Elem = F>, Ix1>,
    ) -> Array2<F> {
        let sqrt3 = F::cast(3.).sqrt();
        let (a, b) = matern_factors(d, theta, |v| F::one() + sqrt3 * v, sqrt3);
        (a * b).insert_axis(Axis(1))
    }
}

/// Matern 5/2 correlation model
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(
    feature = "serializable",
    derive(Serialize, Deserialize),
    serde(into = "String"),
    serde(try_from = "String")
)]
pub struct Matern52Corr();

impl<F: Float> CorrelationModel<F> for Matern52Corr {
    /// `prod_j (1 + sqrt(5) theta_j |d_j| + 5/3 theta_j^2 d_j^2) * exp(-sqrt(5) sum_j theta_j |d_j|)`
    fn value(
        &self,
        d: &ArrayBase<impl Data<Elem = F>, Ix2>,
        theta: &ArrayBase<impl Data<Elem = F>, Ix1>,
    ) -> Array2<F> {
        let sqrt5 = F::cast(5.).sqrt();
        let div5_3 = F::cast(5. / 3.);
        let (a, b) = matern_factors(d, theta, |v| F::one() + sqrt5 * v + div5_3 * v * v, sqrt5);
        (a * b).insert_axis(Axis(1))
    }
}

/// Polynomial product `a` and exponential term `b` of Matern kernels,
/// `poly` being applied on each `theta_j * |d_j|` term.
fn matern_factors<F: Float>(
    d: &ArrayBase<impl Data<Elem = F>, Ix2>,
    theta: &ArrayBase<impl Data<Elem = F>, Ix1>,
    poly: impl Fn(F) -> F,
    coef: F,
) -> (Array1<F>, Array1<F>) {
    let theta_d = d.mapv(|v| v.abs()) * theta;
    let mut a = Array1::ones(d.nrows());
    Zip::from(&mut a)
        .and(theta_d.rows())
        .for_each(|a_i, theta_d_i| {
            *a_i = theta_d_i.fold(F::one(), |acc, v| acc * poly(*v));
        });
    let b = theta_d.sum_axis(Axis(1)).mapv(|v| F::exp(-coef * v));
    (a, b)
}

macro_rules! declare_corr_util_impls {
    ($corr:ident) => {
        paste::paste! {
            impl fmt::Display for [<$corr Corr>] {
                fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                    write!(f, "{}Corr", stringify!($corr))
                }
            }

            impl From<[<$corr Corr>]> for String {
                fn from(item: [<$corr Corr>]) -> String {
                    item.to_string()
                }
            }

            impl TryFrom<String> for [<$corr Corr>] {
                type Error = &'static str;
                fn try_from(s: String) -> Result<Self, Self::Error> {
                    if s == stringify!([<$corr Corr>]) {
                        Ok(Self::default())
                    } else {
                        Err(concat!("Bad string value for ", stringify!([<$corr Corr>])))
                    }
                }
            }
        }
    };
}

declare_corr_util_impls!(SquaredExponential);
declare_corr_util_impls!(AbsoluteExponential);
declare_corr_util_impls!(Matern32);
declare_corr_util_impls!(Matern52);
