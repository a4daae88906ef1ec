//! Rules combining the opinions of committee members.
//!
//! Opinions are combined elementwise in precision space. With `p_k = 1 / var_k` the precision
//! of the k-th child opinion, `beta_k` its weight and `c_k` the number of prior copies it contains:
//!
//! * PoE: `p = sum p_k`
//! * gPoE: `p = sum beta_k p_k`
//! * BCM: `p = sum p_k + (1 - sum c_k) p**`
//! * rBCM: `p = sum beta_k p_k + (1 - sum beta_k c_k) p**`
//!
//! where `p**` is the prior precision of the combining node. Means are precision weighted
//! in the same way, the prior correction being applied to the prior mean.
use crate::errors::{CommitteeError, Result};
use crate::weights::Weighting;
use linfa::Float;
use ndarray::{Array2, Zip};
#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opinion of a committee node at n points for L outputs, every array being (n, L)
#[derive(Clone, Debug, PartialEq)]
pub struct Opinion<F: Float> {
    /// Posterior mean
    pub mean: Array2<F>,
    /// Posterior variance
    pub var: Array2<F>,
    /// Prior mean
    pub prior_mean: Array2<F>,
    /// Prior variance
    pub prior_var: Array2<F>,
    /// Number of prior copies contained in the posterior
    pub prior_weight: Array2<F>,
}

impl<F: Float> Opinion<F> {
    /// Opinion of a single expert which contains its prior once
    pub fn expert(
        mean: Array2<F>,
        var: Array2<F>,
        prior_mean: Array2<F>,
        prior_var: Array2<F>,
    ) -> Self {
        let prior_weight = Array2::ones(mean.dim());
        Opinion {
            mean,
            var,
            prior_mean,
            prior_var,
            prior_weight,
        }
    }

    /// Shape (n, L) of the opinion
    pub fn dim(&self) -> (usize, usize) {
        self.mean.dim()
    }
}

/// Arithmetic mean of the prior means and variances of the given opinions
pub fn mean_prior<F: Float>(opinions: &[Opinion<F>]) -> (Array2<F>, Array2<F>) {
    let n = F::cast(opinions.len());
    let dim = opinions.first().map_or((0, 0), |o| o.dim());
    let (mut prior_mean, mut prior_var) = (Array2::zeros(dim), Array2::zeros(dim));
    for o in opinions {
        prior_mean += &o.prior_mean;
        prior_var += &o.prior_var;
    }
    (prior_mean / n, prior_var / n)
}

/// Reduction of the opinions of several children
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub enum Reduction {
    /// Product of experts (Hinton, 2002)
    PoE,
    /// Generalized product of experts (Cao & Fleet, 2014)
    GPoE(Weighting),
    /// Bayesian committee machine (Tresp, 2000)
    Bcm,
    /// Robust Bayesian committee machine (Deisenroth & Ng, 2015)
    RBcm(Weighting),
}

impl Default for Reduction {
    fn default() -> Self {
        Reduction::RBcm(Weighting::DifferentialEntropy)
    }
}

impl fmt::Display for Reduction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Reduction::PoE => write!(f, "PoE"),
            Reduction::GPoE(w) => write!(f, "gPoE({w})"),
            Reduction::Bcm => write!(f, "BCM"),
            Reduction::RBcm(w) => write!(f, "rBCM({w})"),
        }
    }
}

impl Reduction {
    /// Whether the prior of the node is used to correct the combined precision
    pub fn corrects_prior(&self) -> bool {
        matches!(self, Reduction::Bcm | Reduction::RBcm(_))
    }

    fn weighting(&self) -> Weighting {
        match self {
            Reduction::PoE | Reduction::Bcm => Weighting::Ones,
            Reduction::GPoE(w) | Reduction::RBcm(w) => *w,
        }
    }

    /// Combine children opinions into the opinion of the node
    pub fn combine<F: Float>(&self, opinions: &[Opinion<F>]) -> Result<Opinion<F>> {
        let dim = check_opinions(opinions)?;
        let weighting = self.weighting();
        let n_children = opinions.len();

        let mut precision = Array2::<F>::zeros(dim);
        let mut weighted_mean = Array2::<F>::zeros(dim);
        let mut prior_weight = Array2::<F>::zeros(dim);
        for o in opinions {
            let beta = weighting.weights(&o.var, &o.prior_var, n_children);
            let weighted_precision = &beta / &o.var;
            weighted_mean += &(&weighted_precision * &o.mean);
            precision += &weighted_precision;
            prior_weight += &(&beta * &o.prior_weight);
        }

        let (prior_mean, prior_var) = mean_prior(opinions);
        if self.corrects_prior() {
            Ok(corrected(
                precision,
                weighted_mean,
                &prior_weight,
                prior_mean,
                prior_var,
            ))
        } else {
            let var = precision.mapv(|p| F::one() / p);
            let mean = &weighted_mean * &var;
            Ok(Opinion {
                mean,
                var,
                prior_mean,
                prior_var,
                prior_weight,
            })
        }
    }
}

/// Divide the opinion of a single child by its prior in proportion to its weight:
/// `p = p_c + (1 - beta c_c) p**`
pub fn divide_prior<F: Float>(weighting: &Weighting, opinion: Opinion<F>) -> Opinion<F> {
    let beta = weighting.weights(&opinion.var, &opinion.prior_var, 1);
    let precision = opinion.var.mapv(|v| F::one() / v);
    let weighted_mean = &opinion.mean * &precision;
    let prior_weight = &beta * &opinion.prior_weight;
    corrected(
        precision,
        weighted_mean,
        &prior_weight,
        opinion.prior_mean,
        opinion.prior_var,
    )
}

/// Add `(1 - c)` copies of the prior to the given precision and precision weighted mean
fn corrected<F: Float>(
    mut precision: Array2<F>,
    mut weighted_mean: Array2<F>,
    prior_weight: &Array2<F>,
    prior_mean: Array2<F>,
    prior_var: Array2<F>,
) -> Opinion<F> {
    Zip::from(&mut precision)
        .and(&mut weighted_mean)
        .and(prior_weight)
        .and(&prior_mean)
        .and(&prior_var)
        .for_each(|p, wm, c, pm, pv| {
            let correction = (F::one() - *c) / *pv;
            *p += correction;
            *wm += correction * *pm;
        });
    let var = precision.mapv(|p| F::one() / p);
    let mean = &weighted_mean * &var;
    let prior_weight = Array2::ones(mean.dim());
    Opinion {
        mean,
        var,
        prior_mean,
        prior_var,
        prior_weight,
    }
}

fn check_opinions<F: Float>(opinions: &[Opinion<F>]) -> Result<(usize, usize)> {
    let first = opinions.first().ok_or_else(|| {
        CommitteeError::InvalidValueError("Reduction requires at least one child".to_string())
    })?;
    let dim = first.dim();
    if opinions.iter().any(|o| o.dim() != dim) {
        return Err(CommitteeError::InvalidValueError(
            "Children opinions should have the same shape".to_string(),
        ));
    }
    Ok(dim)
}
