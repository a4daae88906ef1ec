use crate::errors::CommitteeError;
use linfa::Float;
use ndarray::{Array2, ArrayBase, Data, Ix2, Zip};
#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Weighting of the opinions of the children of a committee node
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub enum Weighting {
    /// `1/M` where M is the number of children
    Equal,
    /// All weights are 1
    Ones,
    /// Difference in differential entropy between the prior and the posterior
    /// of the child: `0.5 * (ln prior_var - ln var)` (Cao & Fleet, 2014).
    /// Weights are lower bounded by machine epsilon.
    #[default]
    DifferentialEntropy,
}

impl Weighting {
    /// Weights (n, L) of one of `n_children` opinions given its
    /// posterior `var` and its prior `prior_var` (n, L)
    pub fn weights<F: Float>(
        &self,
        var: &ArrayBase<impl Data<Elem = F>, Ix2>,
        prior_var: &ArrayBase<impl Data<Elem = F>, Ix2>,
        n_children: usize,
    ) -> Array2<F> {
        match self {
            Weighting::Equal => Array2::from_elem(var.dim(), F::one() / F::cast(n_children.max(1))),
            Weighting::Ones => Array2::ones(var.dim()),
            Weighting::DifferentialEntropy => {
                Zip::from(var).and(prior_var).map_collect(|v, pv| {
                    (F::cast(0.5) * (pv.ln() - v.ln())).max(F::epsilon())
                })
            }
        }
    }
}

impl fmt::Display for Weighting {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Weighting::Equal => "Equal",
            Weighting::Ones => "Ones",
            Weighting::DifferentialEntropy => "DifferentialEntropy",
        };
        write!(f, "{name}")
    }
}

impl FromStr for Weighting {
    type Err = CommitteeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Equal" => Ok(Weighting::Equal),
            "Ones" => Ok(Weighting::Ones),
            "DifferentialEntropy" => Ok(Weighting::DifferentialEntropy),
            _ => Err(CommitteeError::InvalidValueError(format!(
                "Bad string value for Weighting: {s}"
            ))),
        }
    }
}
