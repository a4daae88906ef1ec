use crate::correlation_models::CorrelationModel;
use crate::errors::{GpError, Result};
use crate::mean_models::RegressionModel;
use crate::{GP_COBYLA_MAX_EVAL, GP_COBYLA_MIN_EVAL, GP_OPTIM_N_START};
use linfa::{Float, ParamGuard};

use ndarray::{array, Array1};
#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};

/// An enum to represent a n-dim hyper parameter tuning
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub enum ThetaTuning<F: Float> {
    /// Constant parameter (ie given not estimated)
    Fixed(Array1<F>),
    /// Parameter is optimized between given bounds (lower, upper) starting from the inital guess
    Full {
        /// Initial guess for the parameter
        init: Array1<F>,
        /// Bounds for the parameter array(lower, upper)
        bounds: Array1<(F, F)>,
    },
}

impl<F: Float> Default for ThetaTuning<F> {
    fn default() -> Self {
        ThetaTuning::Full {
            init: array![F::cast(ThetaTuning::<F>::DEFAULT_INIT)],
            bounds: array![(
                F::cast(ThetaTuning::<F>::DEFAULT_BOUNDS.0),
                F::cast(ThetaTuning::<F>::DEFAULT_BOUNDS.1),
            )],
        }
    }
}

impl<F: Float> ThetaTuning<F> {
    /// Default initial theta value
    pub const DEFAULT_INIT: f64 = 1.0;
    /// Default bounds for theta values
    pub const DEFAULT_BOUNDS: (f64, f64) = (1e-3, 1e3);

    /// Get initial theta value
    pub fn init(&self) -> &Array1<F> {
        match self {
            ThetaTuning::Full { init, bounds: _ } => init,
            ThetaTuning::Fixed(init) => init,
        }
    }

    /// Get bounds for theta value
    pub fn bounds(&self) -> Option<&Array1<(F, F)>> {
        match self {
            ThetaTuning::Full { init: _, bounds } => Some(bounds),
            ThetaTuning::Fixed(_) => None,
        }
    }
}

/// An enum to represent a scalar hyper parameter tuning (variance, noise variance)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub enum ParamTuning<F: Float> {
    /// Constant parameter (ie given not estimated)
    Fixed(F),
    /// Parameter is optimized between given bounds (lower, upper) starting from the inital guess
    Optimized {
        /// Initial guess parameter value
        init: F,
        /// Bounds of the optimized parameter (lower, upper)
        bounds: (F, F),
    },
}

impl<F: Float> ParamTuning<F> {
    /// Default noise variance tuning
    pub fn default_noise() -> Self {
        Self::Optimized {
            init: F::cast(1e-2),
            bounds: (F::cast(1e-6), F::cast(1e1)),
        }
    }

    /// Get initial (or fixed) value
    pub fn init(&self) -> F {
        match self {
            ParamTuning::Fixed(v) => *v,
            ParamTuning::Optimized { init, bounds: _ } => *init,
        }
    }

    /// Whether the parameter is estimated
    pub fn is_optimized(&self) -> bool {
        matches!(self, ParamTuning::Optimized { .. })
    }
}

/// A set of validated GP parameters.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(
    feature = "serializable",
    derive(Serialize, Deserialize),
    serde(bound(
        serialize = "F: Serialize, Mean: Serialize, Corr: Serialize",
        deserialize = "F: Deserialize<'de>, Mean: Deserialize<'de>, Corr: Deserialize<'de>"
    ))
)]
pub struct GpValidParams<F: Float, Mean: RegressionModel<F>, Corr: CorrelationModel<F>> {
    /// Parameter tuning hint of the autocorrelation model
    pub(crate) theta_tuning: ThetaTuning<F>,
    /// Process variance tuning, `None` means estimated with an initial guess
    /// computed from the output variance
    pub(crate) variance: Option<ParamTuning<F>>,
    /// Gaussian noise variance tuning
    pub(crate) noise_variance: ParamTuning<F>,
    /// Regression model representing the mean(x)
    pub(crate) mean: Mean,
    /// Correlation model representing the spatial correlation between errors at e(x) and e(x')
    pub(crate) corr: Corr,
    /// Number of internal likelihood optimization restart
    pub(crate) n_start: usize,
    /// Max number of internal likelihood evaluation during optimization
    pub(crate) max_eval: usize,
    /// Parameter to improve numerical stability
    pub(crate) nugget: F,
    /// Random generator seed used for multistart and sampling
    pub(crate) seed: u64,
}

impl<F: Float, Mean: RegressionModel<F>, Corr: CorrelationModel<F>> Default
    for GpValidParams<F, Mean, Corr>
{
    fn default() -> GpValidParams<F, Mean, Corr> {
        GpValidParams {
            theta_tuning: ThetaTuning::default(),
            variance: None,
            noise_variance: ParamTuning::default_noise(),
            mean: Mean::default(),
            corr: Corr::default(),
            n_start: GP_OPTIM_N_START,
            max_eval: GP_COBYLA_MAX_EVAL,
            nugget: F::cast(100.0) * F::epsilon(),
            seed: 42,
        }
    }
}

impl<F: Float, Mean: RegressionModel<F>, Corr: CorrelationModel<F>> GpValidParams<F, Mean, Corr> {
    /// Get mean model
    pub fn mean(&self) -> &Mean {
        &self.mean
    }

    /// Get correlation corr k(x, x')
    pub fn corr(&self) -> &Corr {
        &self.corr
    }

    /// Get starting theta value for optimization
    pub fn theta_tuning(&self) -> &ThetaTuning<F> {
        &self.theta_tuning
    }

    /// Get process variance tuning, `None` when initialized from training outputs
    pub fn variance(&self) -> Option<&ParamTuning<F>> {
        self.variance.as_ref()
    }

    /// Get noise variance tuning
    pub fn noise_variance(&self) -> &ParamTuning<F> {
        &self.noise_variance
    }

    /// Get the number of internal optimization restart
    pub fn n_start(&self) -> usize {
        self.n_start
    }

    /// Get the max number of internal likelihood evaluations during one optimization
    pub fn max_eval(&self) -> usize {
        self.max_eval
    }

    /// Get nugget used to improve numerical stability
    pub fn nugget(&self) -> F {
        self.nugget
    }

    /// Get random generator seed
    pub fn seed(&self) -> u64 {
        self.seed
    }
}

#[derive(Clone, Debug)]
/// The set of hyperparameters that can be specified for the execution of
/// the [GP algorithm](struct.GaussianProcess.html).
pub struct GpParams<F: Float, Mean: RegressionModel<F>, Corr: CorrelationModel<F>>(
    GpValidParams<F, Mean, Corr>,
);

impl<F: Float, Mean: RegressionModel<F>, Corr: CorrelationModel<F>> GpParams<F, Mean, Corr> {
    /// A constructor for GP parameters given mean and correlation models
    pub fn new(mean: Mean, corr: Corr) -> GpParams<F, Mean, Corr> {
        Self(GpValidParams {
            mean,
            corr,
            ..Default::default()
        })
    }

    /// A constructor for GP parameters from validated parameters
    pub fn new_from_valid(params: &GpValidParams<F, Mean, Corr>) -> Self {
        Self(params.clone())
    }

    /// Set mean model.
    pub fn mean(mut self, mean: Mean) -> Self {
        self.0.mean = mean;
        self
    }

    /// Set correlation model.
    pub fn corr(mut self, corr: Corr) -> Self {
        self.0.corr = corr;
        self
    }

    /// Set value for theta hyper parameter.
    ///
    /// When theta is optimized, the internal optimization is started from `theta_init`.
    /// When theta is fixed, this set theta constant value.
    pub fn theta_init(mut self, theta_init: Array1<F>) -> Self {
        self.0.theta_tuning = match self.0.theta_tuning {
            ThetaTuning::Full { init: _, bounds } => ThetaTuning::Full {
                init: theta_init,
                bounds,
            },
            ThetaTuning::Fixed(_) => ThetaTuning::Fixed(theta_init),
        };
        self
    }

    /// Set theta hyper parameter search space.
    ///
    /// This function is no-op when theta tuning is fixed
    pub fn theta_bounds(mut self, theta_bounds: Array1<(F, F)>) -> Self {
        self.0.theta_tuning = match self.0.theta_tuning {
            ThetaTuning::Full { init, bounds: _ } => ThetaTuning::Full {
                init,
                bounds: theta_bounds,
            },
            ThetaTuning::Fixed(f) => ThetaTuning::Fixed(f),
        };
        self
    }

    /// Set theta hyper parameter tuning
    pub fn theta_tuning(mut self, theta_tuning: ThetaTuning<F>) -> Self {
        self.0.theta_tuning = theta_tuning;
        self
    }

    /// Set process variance tuning
    pub fn variance(mut self, variance: ParamTuning<F>) -> Self {
        self.0.variance = Some(variance);
        self
    }

    /// Set gaussian noise variance tuning
    pub fn noise_variance(mut self, noise_variance: ParamTuning<F>) -> Self {
        self.0.noise_variance = noise_variance;
        self
    }

    /// Set the number of internal GP hyperparameter theta optimization restarts
    pub fn n_start(mut self, n_start: usize) -> Self {
        self.0.n_start = n_start;
        self
    }

    /// Set the max number of internal likelihood evaluations during one optimization
    /// Given max_eval has to be greater than [crate::GP_COBYLA_MIN_EVAL] otherwise
    /// max_eval is set to [crate::GP_COBYLA_MIN_EVAL].
    pub fn max_eval(mut self, max_eval: usize) -> Self {
        self.0.max_eval = GP_COBYLA_MIN_EVAL.max(max_eval);
        self
    }

    /// Set nugget.
    ///
    /// Nugget is used to improve numerical stability
    pub fn nugget(mut self, nugget: F) -> Self {
        self.0.nugget = nugget;
        self
    }

    /// Set the random generator seed
    pub fn seed(mut self, seed: u64) -> Self {
        self.0.seed = seed;
        self
    }
}

impl<F: Float, Mean: RegressionModel<F>, Corr: CorrelationModel<F>>
    From<GpValidParams<F, Mean, Corr>> for GpParams<F, Mean, Corr>
{
    fn from(valid: GpValidParams<F, Mean, Corr>) -> Self {
        GpParams(valid)
    }
}

fn check_scalar_tuning<F: Float>(name: &str, tuning: &ParamTuning<F>, positive: bool) -> Result<()> {
    let valid = |v: F| if positive { v > F::zero() } else { v >= F::zero() };
    match tuning {
        ParamTuning::Fixed(v) if !valid(*v) => Err(GpError::InvalidValueError(format!(
            "Fixed `{name}` should be {}, got {v}",
            if positive { "positive" } else { "non negative" }
        ))),
        ParamTuning::Optimized {
            init,
            bounds: (lo, up),
        } => {
            if !(*lo > F::zero() && lo < up) {
                Err(GpError::InvalidValueError(format!(
                    "`{name}` bounds should verify 0 < lower < upper, got ({lo}, {up})"
                )))
            } else if init < lo || init > up {
                Err(GpError::InvalidValueError(format!(
                    "Initial `{name}` {init} should be within bounds ({lo}, {up})"
                )))
            } else {
                Ok(())
            }
        }
        _ => Ok(()),
    }
}

impl<F: Float, Mean: RegressionModel<F>, Corr: CorrelationModel<F>> ParamGuard
    for GpParams<F, Mean, Corr>
{
    type Checked = GpValidParams<F, Mean, Corr>;
    type Error = GpError;

    fn check_ref(&self) -> Result<&Self::Checked> {
        let theta = self.0.theta_tuning.init();
        if theta.is_empty() || theta.iter().any(|v| *v <= F::zero()) {
            return Err(GpError::InvalidValueError(format!(
                "Initial theta should be non empty and positive, got {theta}"
            )));
        }
        if let Some(bounds) = self.0.theta_tuning.bounds() {
            if bounds.is_empty() {
                return Err(GpError::InvalidValueError(
                    "Theta bounds should not be empty".to_string(),
                ));
            }
            for (lo, up) in bounds.iter() {
                if !(*lo > F::zero() && lo < up) {
                    return Err(GpError::InvalidValueError(format!(
                        "Theta bounds should verify 0 < lower < upper, got ({lo}, {up})"
                    )));
                }
            }
            if bounds.len() == theta.len() || bounds.len() == 1 {
                for (i, t) in theta.iter().enumerate() {
                    let (lo, up) = bounds[i.min(bounds.len() - 1)];
                    if *t < lo || *t > up {
                        return Err(GpError::InvalidValueError(format!(
                            "Initial theta {t} should be within bounds ({lo}, {up})"
                        )));
                    }
                }
            } else if theta.len() != 1 {
                return Err(GpError::InvalidValueError(format!(
                    "Theta bounds length ({}) should be 1 or match initial theta length ({})",
                    bounds.len(),
                    theta.len()
                )));
            }
        }
        if let Some(variance) = &self.0.variance {
            check_scalar_tuning("variance", variance, true)?;
        }
        check_scalar_tuning("noise_variance", &self.0.noise_variance, false)?;
        if self.0.nugget < F::zero() {
            return Err(GpError::InvalidValueError(format!(
                "`nugget` should be non negative, got {}",
                self.0.nugget
            )));
        }
        Ok(&self.0)
    }

    fn check(self) -> Result<Self::Checked> {
        self.check_ref()?;
        Ok(self.0)
    }
}
