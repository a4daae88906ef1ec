use crate::correlation_models::*;
use crate::densities::multivariate_normal;
use crate::errors::{GpError, Result};
use crate::mean_models::*;
use crate::optimization::{into_f64, optimize_params, prepare_multistart, CobylaParams};
use crate::parameters::{GpParams, GpValidParams, ParamTuning, ThetaTuning};
use crate::utils::{cross_correlation, DiffMatrix};

use linfa::prelude::{DatasetBase, Fit, Float, PredictInplace};
use linfa_linalg::{
    cholesky::Cholesky,
    eigh::EighInto,
    qr::QR,
    triangular::{SolveTriangular, SolveTriangularInplace, UPLO},
};
use ndarray::{s, Array, Array1, Array2, Array3, ArrayBase, ArrayView2, Axis, Data, Ix1, Ix2};
use ndarray_rand::rand::SeedableRng;
use ndarray_rand::rand_distr::StandardNormal;
use ndarray_rand::RandomExt;
use rand_xoshiro::Xoshiro256Plus;

use log::debug;
use rayon::prelude::*;
#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;

/// Default number of multistart for hyperparameters optimization
pub const GP_OPTIM_N_START: usize = 10;
/// Minimum of function evaluations for COBYLA optimizer
pub const GP_COBYLA_MIN_EVAL: usize = 25;
/// Maximum of function evaluations for COBYLA optimizer
pub const GP_COBYLA_MAX_EVAL: usize = 1000;

/// Hyperparameters of a gaussian process
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub struct GpHyperparameters<F: Float> {
    /// Parameters of the correlation model, inverse of the length scales (nx,)
    pub theta: Array1<F>,
    /// Variance of the gaussian process
    pub variance: F,
    /// Variance of the gaussian noise of the likelihood
    pub noise_variance: F,
}

impl<F: Float> fmt::Display for GpHyperparameters<F> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "theta={}, variance={}, noise_variance={}",
            self.theta, self.variance, self.noise_variance
        )
    }
}

/// Internal parameters computed when conditioning the GP on its training data
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub(crate) struct GpInnerParams<F: Float> {
    /// Generalized least squared regression weights of the mean model (p, L)
    beta: Array2<F>,
    /// Weights of the correlation term K^-1.(Y - F.beta) (n, L)
    alpha: Array2<F>,
    /// Lower Cholesky factor of K = variance * (R + nugget * I) + noise_variance * I
    chol: Array2<F>,
}

/// Gaussian Process regression with gaussian noise
///
/// The GP prior is `f(x) ~ GP(m(x), k(x, x'))` where the mean `m(x) = F(x).beta` is given
/// by a [RegressionModel] which weights are estimated by generalized least squares and the
/// covariance `k(x, x') = variance * r(x, x')` by a [CorrelationModel].
/// Observations are `y = f(x) + eps` where `eps ~ N(0, noise_variance)`.
///
/// Several independent outputs (latent functions) sharing the same covariance can be handled
/// at once: training outputs are specified as a (n, L) matrix.
///
/// Hyperparameters `theta`, `variance` and `noise_variance` are estimated by maximizing
/// the marginal log likelihood with a multistart COBYLA optimizer in log10 space.
///
/// # Prior and posterior
///
/// The prior is the one of the observations, the posterior is the one of the latent function `f`:
/// * prior at x*: mean `m(x*)`, variance `variance + noise_variance`,
/// * posterior at x*: with `A = L^-1.k(X, x*)`, mean `m(x*) + A^T.L^-1.(Y - m(X))`,
///   variance `variance - sum(A^2)`.
///
/// # Example
///
/// ```no_run
/// use distgp_gp::{correlation_models::*, mean_models::*, GaussianProcess, ParamTuning};
/// use linfa::prelude::*;
/// use ndarray::{arr2, concatenate, Array, Array1, Array2, Axis};
///
/// // one-dimensional test function to approximate
/// fn xsinx(x: &Array2<f64>) -> Array1<f64> {
///     ((x - 3.5) * ((x - 3.5) / std::f64::consts::PI).mapv(|v| v.sin())).remove_axis(Axis(1))
/// }
///
/// // training data
/// let xt = arr2(&[[0.0], [5.0], [10.0], [15.0], [18.0], [20.0], [25.0]]);
/// let yt = xsinx(&xt);
///
/// // GP with constant mean model and squared exponential correlation model
/// // i.e. Oridinary Kriging model with a small fixed noise
/// let gp = GaussianProcess::<f64, ConstantMean, SquaredExponentialCorr>::params(
///     ConstantMean::default(),
///     SquaredExponentialCorr::default())
///     .noise_variance(ParamTuning::Fixed(1e-8))
///     .fit(&Dataset::new(xt, yt))
///     .expect("GP fitting");
///
/// let xtest = Array::linspace(0., 25., 26).insert_axis(Axis(1));
/// let (mean, var) = gp.posterior_mean_var(&xtest).expect("GP prediction");
/// ```
#[derive(Clone, Debug)]
#[cfg_attr(
    feature = "serializable",
    derive(Serialize, Deserialize),
    serde(bound(
        serialize = "F: Serialize, Mean: Serialize, Corr: Serialize",
        deserialize = "F: Deserialize<'de>, Mean: Deserialize<'de>, Corr: Deserialize<'de>"
    ))
)]
pub struct GaussianProcess<F: Float, Mean: RegressionModel<F>, Corr: CorrelationModel<F>> {
    /// Hyperparameters used to condition the GP
    hyper: GpHyperparameters<F>,
    /// Marginal log likelihood of training outputs
    log_likelihood: F,
    /// Gaussian process internal fitted params
    inner_params: GpInnerParams<F>,
    /// Training dataset (input (n, nx), output (n, L))
    training_data: (Array2<F>, Array2<F>),
    /// Parameters used to fit this model
    params: GpValidParams<F, Mean, Corr>,
}

/// GP regression as the special case of zero mean and squared exponential correlation
pub type Gpr<F> = GpParams<F, ZeroMean, SquaredExponentialCorr>;

impl<F: Float> Gpr<F> {
    /// GP regression parameters constructor
    pub fn params() -> GpParams<F, ZeroMean, SquaredExponentialCorr> {
        GpParams::new(ZeroMean(), SquaredExponentialCorr())
    }
}

impl<F: Float, Mean: RegressionModel<F>, Corr: CorrelationModel<F>> fmt::Display
    for GaussianProcess<F, Mean, Corr>
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "GP(mean={}, corr={}, theta={}, variance={}, noise_variance={}, log_likelihood={})",
            self.params.mean,
            self.params.corr,
            self.hyper.theta,
            self.hyper.variance,
            self.hyper.noise_variance,
            self.log_likelihood,
        )
    }
}

impl<F: Float, Mean: RegressionModel<F>, Corr: CorrelationModel<F>> GaussianProcess<F, Mean, Corr> {
    /// Gp parameters contructor
    pub fn params<NewMean: RegressionModel<F>, NewCorr: CorrelationModel<F>>(
        mean: NewMean,
        corr: NewCorr,
    ) -> GpParams<F, NewMean, NewCorr> {
        GpParams::new(mean, corr)
    }

    /// Prior mean and variance of the noisy observations at n given `x` points
    /// of nx components specified as a (n, nx) matrix.
    /// Returns (n, L) mean and variance matrices.
    pub fn prior_mean_var(
        &self,
        x: &ArrayBase<impl Data<Elem = F>, Ix2>,
    ) -> Result<(Array2<F>, Array2<F>)> {
        self.check_input(x)?;
        let mean = self.regression_mean(x);
        let var = Array2::from_elem(
            mean.dim(),
            self.hyper.variance + self.hyper.noise_variance,
        );
        Ok((mean, var))
    }

    /// Prior mean (n, L) and full covariance (n, n) of the noisy observations at `x` points.
    /// The covariance is shared by the L outputs.
    pub fn prior_mean_cov(
        &self,
        x: &ArrayBase<impl Data<Elem = F>, Ix2>,
    ) -> Result<(Array2<F>, Array2<F>)> {
        self.check_input(x)?;
        let mean = self.regression_mean(x);
        let mut cov = self.covariance(x, x);
        cov.diag_mut()
            .mapv_inplace(|v| v + self.hyper.noise_variance);
        Ok((mean, cov))
    }

    /// Posterior mean and variance of the latent function at n given `x` points
    /// of nx components specified as a (n, nx) matrix.
    /// Returns (n, L) mean and variance matrices.
    pub fn posterior_mean_var(
        &self,
        x: &ArrayBase<impl Data<Elem = F>, Ix2>,
    ) -> Result<(Array2<F>, Array2<F>)> {
        let (mean, a) = self.posterior_terms(x)?;
        let floor = self.variance_floor();
        let var = a
            .mapv(|v| v * v)
            .sum_axis(Axis(0))
            .mapv(|s| (self.hyper.variance - s).max(floor));
        Ok((mean, tile(&var, self.training_data.1.ncols())))
    }

    /// Posterior mean (n, L) and full covariance (n, n) of the latent function at `x` points.
    /// The covariance is shared by the L outputs.
    pub fn posterior_mean_cov(
        &self,
        x: &ArrayBase<impl Data<Elem = F>, Ix2>,
    ) -> Result<(Array2<F>, Array2<F>)> {
        let (mean, a) = self.posterior_terms(x)?;
        let cov = self.covariance(x, x) - a.t().dot(&a);
        Ok((mean, cov))
    }

    /// Predict output values at n given `x` points of nx components specified as a (n, nx) matrix.
    /// Returns (n, L) output values.
    pub fn predict(&self, x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Result<Array2<F>> {
        Ok(self.posterior_terms(x)?.0)
    }

    /// Predict variance values at n given `x` points of nx components specified as a (n, nx) matrix.
    /// Returns (n, L) variance values.
    pub fn predict_var(&self, x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Result<Array2<F>> {
        Ok(self.posterior_mean_var(x)?.1)
    }

    /// Predict both output values and variance at n given `x` points of nx components
    pub fn predict_valvar(
        &self,
        x: &ArrayBase<impl Data<Elem = F>, Ix2>,
    ) -> Result<(Array2<F>, Array2<F>)> {
        self.posterior_mean_var(x)
    }

    /// Sample the posterior gaussian process for `n_traj` trajectories using eigenvalues
    /// decomposition of the posterior covariance matrix at `x` points.
    /// Returns a (n_traj, n, L) array.
    pub fn sample(
        &self,
        x: &ArrayBase<impl Data<Elem = F>, Ix2>,
        n_traj: usize,
    ) -> Result<Array3<F>> {
        let (mean, cov) = self.posterior_mean_cov(x)?;
        sample(&mean, cov, n_traj, self.params.seed)
    }

    /// Retrieve hyperparameters
    pub fn hyperparameters(&self) -> &GpHyperparameters<F> {
        &self.hyper
    }

    /// Retrieve optimized hyperparameters theta
    pub fn theta(&self) -> &Array1<F> {
        &self.hyper.theta
    }

    /// Estimated variance
    pub fn variance(&self) -> F {
        self.hyper.variance
    }

    /// Estimated noise variance
    pub fn noise_variance(&self) -> F {
        self.hyper.noise_variance
    }

    /// Regression weights of the mean model (p, L)
    pub fn beta(&self) -> &Array2<F> {
        &self.inner_params.beta
    }

    /// Retrieve marginal log likelihood of training outputs
    pub fn log_likelihood(&self) -> F {
        self.log_likelihood
    }

    /// Retrieve input and output dimensions
    pub fn dims(&self) -> (usize, usize) {
        (self.training_data.0.ncols(), self.training_data.1.ncols())
    }

    /// Training inputs (n, nx) and outputs (n, L)
    pub fn training_data(&self) -> (&Array2<F>, &Array2<F>) {
        (&self.training_data.0, &self.training_data.1)
    }

    /// Parameters used to fit this model
    pub fn valid_params(&self) -> &GpValidParams<F, Mean, Corr> {
        &self.params
    }

    /// Hyperparameters as (name, value, transform) rows, names being prefixed by `prefix`.
    /// Transform is `log10` for optimized parameters and `fixed` otherwise.
    pub fn param_table(&self, prefix: &str) -> Vec<(String, F, &'static str)> {
        let transform = |optimized: bool| if optimized { "log10" } else { "fixed" };
        let theta_optimized = matches!(self.params.theta_tuning, ThetaTuning::Full { .. });
        let mut rows: Vec<_> = self
            .hyper
            .theta
            .iter()
            .enumerate()
            .map(|(i, v)| {
                (
                    format!("{prefix}.corr.theta[{i}]"),
                    *v,
                    transform(theta_optimized),
                )
            })
            .collect();
        let variance_optimized = self
            .params
            .variance
            .map_or(true, |tuning| tuning.is_optimized());
        rows.push((
            format!("{prefix}.variance"),
            self.hyper.variance,
            transform(variance_optimized),
        ));
        rows.push((
            format!("{prefix}.likelihood.noise_variance"),
            self.hyper.noise_variance,
            transform(self.params.noise_variance.is_optimized()),
        ));
        rows
    }

    /// Plain text table of hyperparameters
    pub fn param_summary(&self) -> String {
        format_param_table(&self.param_table("gp"))
    }

    fn check_input(&self, x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Result<()> {
        if x.ncols() != self.training_data.0.ncols() {
            return Err(GpError::InvalidValueError(format!(
                "Input dimension mismatch: expected {} columns, got {}",
                self.training_data.0.ncols(),
                x.ncols()
            )));
        }
        Ok(())
    }

    fn regression_mean(&self, x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Array2<F> {
        regression(&self.params.mean.value(x), &self.inner_params.beta)
    }

    fn covariance(
        &self,
        x: &ArrayBase<impl Data<Elem = F>, Ix2>,
        y: &ArrayBase<impl Data<Elem = F>, Ix2>,
    ) -> Array2<F> {
        cross_correlation(&self.params.corr, &self.hyper.theta, x, y)
            .mapv(|v| v * self.hyper.variance)
    }

    /// Posterior mean at x and `A = L^-1.k(X, x)`
    fn posterior_terms(
        &self,
        x: &ArrayBase<impl Data<Elem = F>, Ix2>,
    ) -> Result<(Array2<F>, Array2<F>)> {
        self.check_input(x)?;
        let kx = self.covariance(&self.training_data.0, x);
        let a = self
            .inner_params
            .chol
            .solve_triangular(&kx, UPLO::Lower)?;
        let mean = self.regression_mean(x) + kx.t().dot(&self.inner_params.alpha);
        Ok((mean, a))
    }

    fn variance_floor(&self) -> F {
        self.hyper.variance * F::epsilon().max(self.params.nugget)
    }
}

impl<F, D, Mean, Corr> PredictInplace<ArrayBase<D, Ix2>, Array2<F>>
    for GaussianProcess<F, Mean, Corr>
where
    F: Float,
    D: Data<Elem = F>,
    Mean: RegressionModel<F>,
    Corr: CorrelationModel<F>,
{
    fn predict_inplace(&self, x: &ArrayBase<D, Ix2>, y: &mut Array2<F>) {
        assert_eq!(
            x.nrows(),
            y.nrows(),
            "The number of data points must match the number of output targets."
        );

        let values = self.predict(x).expect("GP Prediction");
        *y = values;
    }

    fn default_target(&self, x: &ArrayBase<D, Ix2>) -> Array2<F> {
        Array2::zeros((x.nrows(), self.dims().1))
    }
}

impl<F: Float, Mean: RegressionModel<F>, Corr: CorrelationModel<F>, D: Data<Elem = F>>
    Fit<ArrayBase<D, Ix2>, ArrayBase<D, Ix2>, GpError> for GpValidParams<F, Mean, Corr>
{
    type Object = GaussianProcess<F, Mean, Corr>;

    /// Fit GP parameters using maximum likelihood
    fn fit(
        &self,
        dataset: &DatasetBase<ArrayBase<D, Ix2>, ArrayBase<D, Ix2>>,
    ) -> Result<Self::Object> {
        let x = dataset.records().view();
        let y = dataset.targets().view();
        let hyper = self.optimize_hyperparameters(&[(x, y)])?;
        self.condition(&hyper, &x, &y)
    }
}

impl<F: Float, Mean: RegressionModel<F>, Corr: CorrelationModel<F>, D: Data<Elem = F>>
    Fit<ArrayBase<D, Ix2>, ArrayBase<D, Ix1>, GpError> for GpValidParams<F, Mean, Corr>
{
    type Object = GaussianProcess<F, Mean, Corr>;

    /// Fit GP parameters using maximum likelihood
    fn fit(
        &self,
        dataset: &DatasetBase<ArrayBase<D, Ix2>, ArrayBase<D, Ix1>>,
    ) -> Result<Self::Object> {
        let x = dataset.records().view();
        let y = dataset.targets().view().insert_axis(Axis(1));
        let hyper = self.optimize_hyperparameters(&[(x, y)])?;
        self.condition(&hyper, &x, &y)
    }
}

impl<F: Float, Mean: RegressionModel<F>, Corr: CorrelationModel<F>> GpValidParams<F, Mean, Corr> {
    /// Condition a GP on training data `x` (n, nx) and `y` (n, L) given hyperparameters,
    /// no optimization is performed.
    pub fn condition(
        &self,
        hyper: &GpHyperparameters<F>,
        x: &ArrayBase<impl Data<Elem = F>, Ix2>,
        y: &ArrayBase<impl Data<Elem = F>, Ix2>,
    ) -> Result<GaussianProcess<F, Mean, Corr>> {
        check_chunks(&[(x.view(), y.view())], &self.mean)?;
        if hyper.theta.len() != x.ncols() {
            return Err(GpError::InvalidValueError(format!(
                "Theta length ({}) should match input dimension ({})",
                hyper.theta.len(),
                x.ncols()
            )));
        }
        let dm = DiffMatrix::new(x);
        let (log_likelihood, inner_params) = gls_condition(self, hyper, x, y, &dm)?;
        Ok(GaussianProcess {
            hyper: hyper.clone(),
            log_likelihood,
            inner_params,
            training_data: (x.to_owned(), y.to_owned()),
            params: self.clone(),
        })
    }

    /// Fit one GP per chunk of training data `(x, y)`, all GPs sharing the same hyperparameters
    /// estimated by maximizing the sum of the chunks marginal log likelihoods.
    pub fn fit_shared(
        &self,
        chunks: &[(ArrayView2<F>, ArrayView2<F>)],
    ) -> Result<Vec<GaussianProcess<F, Mean, Corr>>> {
        let hyper = self.optimize_hyperparameters(chunks)?;
        chunks
            .par_iter()
            .map(|(x, y)| self.condition(&hyper, x, y))
            .collect()
    }

    /// Estimate hyperparameters maximizing the sum of the marginal log likelihoods
    /// of the given chunks of training data `(x, y)`.
    pub fn optimize_hyperparameters(
        &self,
        chunks: &[(ArrayView2<F>, ArrayView2<F>)],
    ) -> Result<GpHyperparameters<F>> {
        let dim = check_chunks(chunks, &self.mean)?;
        let init = self.initial_hyperparameters(dim, self.variance_guess(chunks))?;

        let theta_bounds = match &self.theta_tuning {
            ThetaTuning::Fixed(_) => None,
            ThetaTuning::Full { init: _, bounds } => Some(broadcast(bounds, dim, "theta bounds")?),
        };
        let variance_bounds = match self.variance {
            Some(ParamTuning::Fixed(_)) => None,
            Some(ParamTuning::Optimized { init: _, bounds }) => Some(bounds),
            None => Some((
                F::cast(1e-12).min(init.variance),
                F::cast(9.) * init.variance,
            )),
        };
        let noise_bounds = match self.noise_variance {
            ParamTuning::Fixed(_) => None,
            ParamTuning::Optimized { init: _, bounds } => Some(bounds),
        };

        // Params consist in [theta1, ..., thetap, [variance], [noise]]
        // where only estimated hyperparameters are present
        let mut param0 = vec![];
        let mut bounds = vec![];
        if let Some(tb) = &theta_bounds {
            param0.extend(init.theta.iter().cloned());
            bounds.extend(tb.iter().cloned());
        }
        if let Some(vb) = variance_bounds {
            param0.push(init.variance);
            bounds.push(vb);
        }
        if let Some(nb) = noise_bounds {
            param0.push(init.noise_variance);
            bounds.push(nb);
        }
        if param0.is_empty() {
            debug!("No hyperparameters to optimize: {init}");
            return Ok(init);
        }
        let param0: Array1<F> = param0
            .iter()
            .zip(bounds.iter())
            .map(|(v, (lo, up))| v.max(*lo).min(*up))
            .collect();

        let decode = |p: &[F]| -> GpHyperparameters<F> {
            let mut it = p.iter().copied();
            let theta = if theta_bounds.is_some() {
                it.by_ref().take(dim).collect::<Array1<F>>()
            } else {
                init.theta.clone()
            };
            let variance = if variance_bounds.is_some() {
                it.next().unwrap_or(init.variance)
            } else {
                init.variance
            };
            let noise_variance = if noise_bounds.is_some() {
                it.next().unwrap_or(init.noise_variance)
            } else {
                init.noise_variance
            };
            GpHyperparameters {
                theta,
                variance,
                noise_variance,
            }
        };

        let dms: Vec<DiffMatrix<F>> = chunks.iter().map(|(x, _)| DiffMatrix::new(x)).collect();

        // We prefer optimize variable change log10(param)
        let base: f64 = 10.;
        let objfn = |x: &[f64], _gradient: Option<&mut [f64]>, _params: &mut ()| -> f64 {
            // check params as optimizer may give nan values
            if x.iter().any(|v| v.is_nan()) {
                // shortcut return worst value wrt to likelihood minimization
                return f64::INFINITY;
            }
            let p: Vec<F> = x.iter().map(|v| F::cast(base.powf(*v))).collect();
            let hyper = decode(&p);
            let ll: f64 = chunks
                .par_iter()
                .zip(dms.par_iter())
                .map(|((xc, yc), dm)| {
                    gls_condition(self, &hyper, xc, yc, dm)
                        .map(|(ll, _)| into_f64(&ll))
                        .unwrap_or(f64::NEG_INFINITY)
                })
                .sum();
            if ll.is_nan() {
                f64::INFINITY
            } else {
                -ll
            }
        };

        let (params0, log_bounds) = prepare_multistart(self.n_start, &param0, &bounds, self.seed);
        debug!("Optimize with multistart params = {params0:?} and bounds = {log_bounds:?}");
        let n_params = params0.ncols();
        let now = Instant::now();
        let opt_params = (0..params0.nrows())
            .into_par_iter()
            .map(|i| {
                optimize_params(
                    objfn,
                    &params0.row(i).to_owned(),
                    &log_bounds,
                    CobylaParams {
                        maxeval: (10 * n_params).clamp(GP_COBYLA_MIN_EVAL, self.max_eval),
                        ..CobylaParams::default()
                    },
                )
            })
            .reduce(
                || (f64::INFINITY, Array::ones((n_params,))),
                |a, b| if b.0 < a.0 { b } else { a },
            );
        debug!("elapsed optim = {:?}", now.elapsed().as_millis());

        if !opt_params.0.is_finite() {
            return Err(GpError::LikelihoodComputationError(
                "No valid hyperparameters found, likelihood cannot be computed".to_string(),
            ));
        }
        let opt: Vec<F> = opt_params
            .1
            .iter()
            .map(|v| F::cast(base.powf(*v)))
            .collect();
        let hyper = decode(&opt);
        debug!(
            "Optimized hyperparameters: {hyper} (log likelihood = {})",
            -opt_params.0
        );
        Ok(hyper)
    }

    /// Draw `n_samples` samples of `n_latent` outputs at `x` points from the GP prior
    /// with initial hyperparameters and zero mean. Samples are noisy observations
    /// `y = f(x) + eps`. Returns a (n_samples, n, n_latent) array.
    pub fn sample_prior(
        &self,
        x: &ArrayBase<impl Data<Elem = F>, Ix2>,
        n_latent: usize,
        n_samples: usize,
    ) -> Result<Array3<F>> {
        let hyper = self.initial_hyperparameters(x.ncols(), F::one())?;
        let mut cov = cross_correlation(&self.corr, &hyper.theta, x, x).mapv(|v| v * hyper.variance);
        cov.diag_mut()
            .mapv_inplace(|v| v + hyper.noise_variance);
        let mean = Array2::zeros((x.nrows(), n_latent));
        sample(&mean, cov, n_samples, self.seed)
    }

    /// Initial hyperparameters for a `dim` input space, `variance` being used
    /// when the process variance tuning is unspecified
    fn initial_hyperparameters(&self, dim: usize, variance: F) -> Result<GpHyperparameters<F>> {
        Ok(GpHyperparameters {
            theta: broadcast(self.theta_tuning.init(), dim, "theta")?,
            variance: self.variance.map_or(variance, |tuning| tuning.init()),
            noise_variance: self.noise_variance.init(),
        })
    }

    /// Initial guess of the process variance from training outputs:
    /// second moment when there is no regression term, variance otherwise.
    fn variance_guess(&self, chunks: &[(ArrayView2<F>, ArrayView2<F>)]) -> F {
        let has_regression = chunks
            .first()
            .map_or(false, |(x, _)| self.mean.value(&x.slice(s![..1, ..])).ncols() > 0);
        let n = F::cast(chunks.iter().map(|(_, y)| y.len()).sum::<usize>());
        let total = chunks
            .iter()
            .fold(F::zero(), |acc, (_, y)| acc + y.sum());
        let mean = if has_regression { total / n } else { F::zero() };
        let sq = chunks.iter().fold(F::zero(), |acc, (_, y)| {
            acc + y.mapv(|v| (v - mean) * (v - mean)).sum()
        });
        let guess = sq / n;
        if guess > F::epsilon() {
            guess
        } else {
            F::one()
        }
    }
}

/// Check chunks consistency and returns the input dimension
fn check_chunks<F: Float, Mean: RegressionModel<F>>(
    chunks: &[(ArrayView2<F>, ArrayView2<F>)],
    mean: &Mean,
) -> Result<usize> {
    let (x0, y0) = chunks
        .first()
        .ok_or_else(|| GpError::InvalidValueError("No training data given".to_string()))?;
    let (dim, n_latent) = (x0.ncols(), y0.ncols());
    if dim == 0 || n_latent == 0 {
        return Err(GpError::InvalidValueError(
            "Training inputs and outputs should have at least one column".to_string(),
        ));
    }
    for (x, y) in chunks.iter() {
        if x.nrows() == 0 {
            return Err(GpError::InvalidValueError(
                "Training data should not be empty".to_string(),
            ));
        }
        if x.nrows() != y.nrows() {
            return Err(GpError::InvalidValueError(format!(
                "Training inputs ({}) and outputs ({}) numbers mismatch",
                x.nrows(),
                y.nrows()
            )));
        }
        if x.ncols() != dim || y.ncols() != n_latent {
            return Err(GpError::InvalidValueError(format!(
                "Training data dimensions mismatch: expected ({dim}, {n_latent}), got ({}, {})",
                x.ncols(),
                y.ncols()
            )));
        }
        let p = mean.value(&x.slice(s![..1, ..])).ncols();
        if x.nrows() < p {
            return Err(GpError::InvalidValueError(format!(
                "Number of training points ({}) should be at least the number of regression terms ({p}) of {mean}",
                x.nrows()
            )));
        }
    }
    Ok(dim)
}

/// Conditioning of the GP on (x, y) data given hyperparameters.
/// Returns marginal log likelihood and internal params.
fn gls_condition<F: Float, Mean: RegressionModel<F>, Corr: CorrelationModel<F>>(
    params: &GpValidParams<F, Mean, Corr>,
    hyper: &GpHyperparameters<F>,
    x: &ArrayBase<impl Data<Elem = F>, Ix2>,
    y: &ArrayBase<impl Data<Elem = F>, Ix2>,
    x_distances: &DiffMatrix<F>,
) -> Result<(F, GpInnerParams<F>)> {
    let mut k_mx = x_distances
        .correlation_matrix(&params.corr, &hyper.theta, params.nugget)
        .mapv(|v| v * hyper.variance);
    k_mx.diag_mut()
        .mapv_inplace(|v| v + hyper.noise_variance);
    let chol = k_mx.cholesky()?;

    // Solve generalized least squared problem
    let fx = params.mean.value(x);
    let beta = if fx.ncols() == 0 {
        Array2::zeros((0, y.ncols()))
    } else {
        let ft = chol.solve_triangular(&fx, UPLO::Lower)?;
        let (ft_qr_q, ft_qr_r) = ft.qr()?.into_decomp();
        // Check whether we have an ill-conditionned problem
        let (rmin, rmax) = ft_qr_r
            .diag()
            .iter()
            .fold((F::infinity(), F::zero()), |(lo, hi), v| {
                (lo.min(v.abs()), hi.max(v.abs()))
            });
        if rmax == F::zero() || rmin / rmax < F::cast(1e-10) {
            return Err(GpError::LikelihoodComputationError(
                "F is too ill conditioned. Poor combination \
                of regression model and observations."
                    .to_string(),
            ));
        }
        let yt = chol.solve_triangular(y, UPLO::Lower)?;
        ft_qr_r.solve_triangular_into(ft_qr_q.t().dot(&yt), UPLO::Upper)?
    };

    let mean = regression(&fx, &beta);
    let log_likelihood = multivariate_normal(y, &mean, &chol)?;
    if !log_likelihood.is_finite() {
        return Err(GpError::LikelihoodComputationError(format!(
            "Non finite log likelihood for {hyper}"
        )));
    }
    let rho = chol.solve_triangular(&(y - &mean), UPLO::Lower)?;
    let alpha = chol.t().solve_triangular_into(rho, UPLO::Upper)?;

    Ok((log_likelihood, GpInnerParams { beta, alpha, chol }))
}

/// Mean term `F(x).beta` as a (n, L) matrix
fn regression<F: Float>(fx: &Array2<F>, beta: &Array2<F>) -> Array2<F> {
    if beta.nrows() == 0 {
        Array2::zeros((fx.nrows(), beta.ncols()))
    } else {
        fx.dot(beta)
    }
}

/// Repeat a (n,) vector as columns of a (n, n_cols) matrix
fn tile<F: Float>(v: &Array1<F>, n_cols: usize) -> Array2<F> {
    Array2::from_shape_fn((v.len(), n_cols), |(i, _)| v[i])
}

/// Broadcast a one-element array to `dim` elements, or check it has already `dim` elements
fn broadcast<T: Clone>(values: &Array1<T>, dim: usize, name: &str) -> Result<Array1<T>> {
    match values.len() {
        1 => Ok(Array1::from_elem(dim, values[0].clone())),
        n if n == dim => Ok(values.to_owned()),
        n => Err(GpError::InvalidValueError(format!(
            "Initial guess for {name} should be either 1-dim or dim of xtrain ({dim}), got {n}"
        ))),
    }
}

/// Format (name, value, transform) rows as a plain text table
pub(crate) fn format_param_table<F: Float>(rows: &[(String, F, &'static str)]) -> String {
    let headers = ("name", "value", "transform");
    let values: Vec<String> = rows.iter().map(|(_, v, _)| format!("{v:.3}")).collect();
    let w0 = rows
        .iter()
        .map(|r| r.0.len())
        .chain(std::iter::once(headers.0.len()))
        .max()
        .unwrap_or(0);
    let w1 = values
        .iter()
        .map(|v| v.len())
        .chain(std::iter::once(headers.1.len()))
        .max()
        .unwrap_or(0);
    let w2 = rows
        .iter()
        .map(|r| r.2.len())
        .chain(std::iter::once(headers.2.len()))
        .max()
        .unwrap_or(0);
    let mut out = format!(
        "{:<w0$} | {:<w1$} | {:<w2$}\n",
        headers.0, headers.1, headers.2
    );
    out.push_str(&format!(
        "{}-+-{}-+-{}\n",
        "-".repeat(w0),
        "-".repeat(w1),
        "-".repeat(w2)
    ));
    for ((name, _, transform), value) in rows.iter().zip(values.iter()) {
        out.push_str(&format!("{name:<w0$} | {value:<w1$} | {transform:<w2$}\n"));
    }
    out
}

/// Draw `n_traj` samples from `N(mean, cov)` where `mean` is (n, L) and `cov` (n, n) is
/// shared by the L outputs. Eigenvalues decomposition of the covariance is used as
/// cholesky decomposition suffers from ill-conditioned matrices when the number of points increases.
pub(crate) fn sample<F: Float>(
    mean: &Array2<F>,
    cov: Array2<F>,
    n_traj: usize,
    seed: u64,
) -> Result<Array3<F>> {
    let (n_eval, n_latent) = mean.dim();
    let (v, w) = cov.eigh_into()?;
    let v = v.mapv(|x| {
        // We lower bound the float value at 1e-9
        if x < F::cast(1e-9) {
            return F::zero();
        }
        x.sqrt()
    });
    let c = w.dot(&Array2::from_diag(&v));
    let mut rng = Xoshiro256Plus::seed_from_u64(seed);
    let mut samples = Array3::zeros((n_traj, n_eval, n_latent));
    for mut traj in samples.outer_iter_mut() {
        let normal =
            Array::random_using((n_eval, n_latent), StandardNormal, &mut rng).mapv(|v: f64| F::cast(v));
        traj.assign(&(mean + &c.dot(&normal)));
    }
    Ok(samples)
}

#[cfg(feature = "persistent")]
impl<F, Mean, Corr> GaussianProcess<F, Mean, Corr>
where
    F: Float + Serialize + serde::de::DeserializeOwned,
    Mean: RegressionModel<F> + Serialize + serde::de::DeserializeOwned,
    Corr: CorrelationModel<F> + Serialize + serde::de::DeserializeOwned,
{
    /// Save the fitted GP as a json file
    pub fn save(&self, path: &str) -> Result<()> {
        use std::io::Write;
        let mut file = std::fs::File::create(path)?;
        let bytes = serde_json::to_vec(self)?;
        file.write_all(&bytes)?;
        Ok(())
    }

    /// Load a GP from a json file
    pub fn load(path: &str) -> Result<Self> {
        let data = std::fs::read(path)?;
        serde_json::from_slice(&data).map_err(|err| GpError::LoadError(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use linfa::prelude::{Dataset, Predict};
    use linfa::ParamGuard;
    use ndarray::{arr1, arr2, array, concatenate, Zip};
    use ndarray_rand::rand_distr::Uniform;
    use paste::paste;

    fn fixed_params() -> GpParams<f64, ZeroMean, SquaredExponentialCorr> {
        Gpr::params()
            .theta_tuning(ThetaTuning::Fixed(array![1.0]))
            .variance(ParamTuning::Fixed(1.0))
            .noise_variance(ParamTuning::Fixed(1e-4))
    }

    #[test]
    fn test_constant_function() {
        let dim = 3;
        let nt = 5;
        let mut rng = Xoshiro256Plus::seed_from_u64(42);
        let xt = Array::random_using((nt, dim), Uniform::new(0., 1.), &mut rng);
        let yt = Array::from_vec(vec![3.1; nt]);
        let gp = GaussianProcess::<f64, ConstantMean, SquaredExponentialCorr>::params(
            ConstantMean::default(),
            SquaredExponentialCorr::default(),
        )
        .theta_init(array![0.1])
        .fit(&Dataset::new(xt, yt))
        .expect("GP fit error");
        let xtest = Array::random_using((nt, dim), Uniform::new(0., 1.), &mut rng);
        let ytest = gp.predict(&xtest).expect("prediction error");
        assert_abs_diff_eq!(Array::from_elem((nt, 1), 3.1), ytest, epsilon = 1e-6);
    }

    macro_rules! test_gp {
        ($regr:ident, $corr:ident) => {
            paste! {

                #[test]
                fn [<test_gp_ $regr:snake _ $corr:snake >]() {
                    let xt = array![[0.0], [1.0], [2.0], [3.0], [4.0]];
                    let xplot = Array::linspace(0., 4., 100).insert_axis(Axis(1));
                    let yt = array![0.0, 1.0, 1.5, 0.9, 1.0];
                    let gp = GaussianProcess::<f64, [<$regr Mean>], [<$corr Corr>] >::params(
                        [<$regr Mean>]::default(),
                        [<$corr Corr>]::default(),
                    )
                    .noise_variance(ParamTuning::Fixed(1e-6))
                    .fit(&Dataset::new(xt, yt))
                    .expect("GP fit error");
                    let yvals = gp
                        .predict(&arr2(&[[1.0], [3.5]]))
                        .expect("prediction error");
                    let expected_y = arr2(&[[1.0], [0.9]]);
                    assert_abs_diff_eq!(expected_y, yvals, epsilon = 0.5);

                    let (ymean, yvar) = gp.predict_valvar(&xplot).expect("prediction error");
                    assert_eq!(ymean.dim(), (100, 1));
                    assert!(yvar.iter().all(|v| *v > 0.));

                    let (_, ytvar) = gp
                        .predict_valvar(&array![[0.0], [2.0], [4.0]])
                        .expect("prediction error");
                    // small posterior variance at training points
                    assert!(ytvar.iter().all(|v| *v < 1e-2 * gp.variance()));
                }
            }
        };
    }

    test_gp!(Zero, SquaredExponential);
    test_gp!(Zero, AbsoluteExponential);
    test_gp!(Zero, Matern32);
    test_gp!(Zero, Matern52);

    test_gp!(Constant, SquaredExponential);
    test_gp!(Constant, AbsoluteExponential);
    test_gp!(Constant, Matern32);
    test_gp!(Constant, Matern52);

    test_gp!(Linear, SquaredExponential);
    test_gp!(Linear, AbsoluteExponential);
    test_gp!(Linear, Matern32);
    test_gp!(Linear, Matern52);

    test_gp!(Quadratic, SquaredExponential);
    test_gp!(Quadratic, Matern52);

    #[test]
    fn test_log_likelihood_is_gaussian_density() {
        let xt = array![[0.0], [0.5], [1.5], [3.0]];
        let yt = array![[0.1], [0.6], [0.8], [-0.4]];
        let gp = fixed_params()
            .fit(&Dataset::new(xt.clone(), yt.clone()))
            .expect("GP fit error");

        let mut k = Array2::zeros((4, 4));
        Zip::indexed(&mut k).for_each(|(i, j), kij| {
            let d: f64 = xt[[i, 0]] - xt[[j, 0]];
            *kij = (-0.5 * d * d).exp();
        });
        k.diag_mut().mapv_inplace(|v| v * (1. + 100. * f64::EPSILON) + 1e-4);
        let chol = k.cholesky().unwrap();
        let expected = multivariate_normal(&yt, &Array2::zeros((4, 1)), &chol).unwrap();
        assert_abs_diff_eq!(gp.log_likelihood(), expected, epsilon = 1e-10);
    }

    #[test]
    fn test_posterior_reverts_to_prior_far_from_data() {
        let xt = array![[0.0], [0.5], [1.5]];
        let yt = array![[0.1], [0.6], [0.8]];
        let gp = fixed_params().fit(&Dataset::new(xt, yt)).unwrap();
        let xfar = array![[50.0], [-40.0]];
        let (pmean, pvar) = gp.prior_mean_var(&xfar).unwrap();
        let (mean, var) = gp.posterior_mean_var(&xfar).unwrap();
        assert_abs_diff_eq!(pmean, Array2::<f64>::zeros((2, 1)));
        assert_abs_diff_eq!(mean, pmean, epsilon = 1e-10);
        // latent posterior reverts to the kernel variance, prior includes the noise
        assert_abs_diff_eq!(var, Array2::<f64>::ones((2, 1)), epsilon = 1e-10);
        assert_abs_diff_eq!(pvar, var + gp.noise_variance(), epsilon = 1e-10);
    }

    #[test]
    fn test_prior_includes_noise_variance() {
        let xt = array![[0.0], [1.0], [2.0]];
        let yt = array![0.3, -0.2, 0.5];
        let gp = Gpr::params()
            .theta_tuning(ThetaTuning::Fixed(array![1.0]))
            .variance(ParamTuning::Fixed(1.0))
            .noise_variance(ParamTuning::Fixed(0.5))
            .fit(&Dataset::new(xt, yt))
            .expect("GP fit error");
        let x = array![[0.5], [1.5], [10.0]];
        let (_, var) = gp.prior_mean_var(&x).unwrap();
        assert_abs_diff_eq!(var, Array2::from_elem((3, 1), 1.5), epsilon = 1e-12);
        let (_, cov) = gp.prior_mean_cov(&x).unwrap();
        assert_abs_diff_eq!(cov.diag().to_owned(), Array1::from_elem(3, 1.5), epsilon = 1e-12);
        assert_abs_diff_eq!(cov[[0, 1]], (-0.5f64).exp(), epsilon = 1e-12);
        let (_, far_var) = gp.posterior_mean_var(&array![[100.0]]).unwrap();
        assert_abs_diff_eq!(far_var[[0, 0]], 1.0, epsilon = 1e-10);
    }

    #[test]
    fn test_posterior_cov_diag_is_var() {
        let xt = array![[0.0, 1.0], [0.5, 0.2], [1.5, 0.7], [2.0, 2.0]];
        let yt = array![0.1, 0.6, 0.8, -0.3];
        let gp = fixed_params().fit(&Dataset::new(xt, yt)).unwrap();
        let x = array![[0.2, 0.3], [1.0, 1.0], [3.0, -1.0]];
        let (mean, var) = gp.posterior_mean_var(&x).unwrap();
        let (mean_c, cov) = gp.posterior_mean_cov(&x).unwrap();
        assert_abs_diff_eq!(mean, mean_c, epsilon = 1e-12);
        assert_abs_diff_eq!(var.column(0).to_owned(), cov.diag().to_owned(), epsilon = 1e-10);
        let (_, prior_cov) = gp.prior_mean_cov(&x).unwrap();
        assert_abs_diff_eq!(
            prior_cov.diag().to_owned(),
            Array1::from_elem(3, 1. + 1e-4),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_multi_outputs() {
        let xt = array![[0.0], [1.0], [2.0], [3.0], [4.0]];
        let yt = array![[0.0, 1.0], [1.0, 0.5], [1.5, 0.0], [0.9, -0.5], [1.0, -1.0]];
        let gp = Gpr::params()
            .noise_variance(ParamTuning::Fixed(1e-6))
            .fit(&Dataset::new(xt.clone(), yt.clone()))
            .expect("GP fit error");
        assert_eq!(gp.dims(), (1, 2));
        let (mean, var) = gp.predict_valvar(&xt).unwrap();
        assert_eq!(mean.dim(), (5, 2));
        assert_abs_diff_eq!(mean, yt, epsilon = 1e-2);
        assert_abs_diff_eq!(var.column(0), var.column(1));

        let ypred: Array2<f64> = Predict::predict(&gp, &xt);
        assert_abs_diff_eq!(ypred, mean);
    }

    #[test]
    fn test_optimization_improves_likelihood() {
        let env = env_logger::Env::new().filter_or("DISTGP_LOG", "info");
        let _ = env_logger::Builder::from_env(env)
            .target(env_logger::Target::Stdout)
            .is_test(true)
            .try_init();
        let xt = Array::linspace(0., 10., 20).insert_axis(Axis(1));
        let yt = xt.mapv(|v: f64| v.sin() + 0.1 * (3. * v).cos());
        let params = Gpr::params().check().unwrap();
        let gp = params.fit(&Dataset::new(xt.clone(), yt.clone())).unwrap();

        // starting point of the optimization
        let init = GpHyperparameters {
            theta: array![1.0],
            variance: yt.mapv(|v| v * v).mean().unwrap(),
            noise_variance: 1e-2,
        };
        let initial = params.condition(&init, &xt, &yt).unwrap();
        assert!(gp.log_likelihood() >= initial.log_likelihood() - 1e-8);
    }

    #[test]
    fn test_fit_shared_hyperparameters() {
        let x = Array::linspace(0., 6., 24).insert_axis(Axis(1));
        let y = x.mapv(|v: f64| v.sin());
        let chunks = [
            (x.slice(s![..12, ..]), y.slice(s![..12, ..])),
            (x.slice(s![12.., ..]), y.slice(s![12.., ..])),
        ];
        let params = Gpr::params().check().unwrap();
        let gps = params.fit_shared(&chunks).unwrap();
        assert_eq!(gps.len(), 2);
        assert_eq!(gps[0].hyperparameters(), gps[1].hyperparameters());
        assert_eq!(gps[0].training_data().0.nrows(), 12);

        let hyper = gps[0].hyperparameters().clone();
        let single = params.condition(&hyper, &chunks[0].0, &chunks[0].1).unwrap();
        assert_abs_diff_eq!(single.log_likelihood(), gps[0].log_likelihood(), epsilon = 1e-10);
        assert!((gps[0].log_likelihood() + gps[1].log_likelihood()).is_finite());
    }

    #[test]
    fn test_sampling() {
        let xt = array![[0.0], [1.0], [2.0], [3.0]];
        let yt = array![0.0, 1.0, 1.5, 0.9];
        let gp = fixed_params().fit(&Dataset::new(xt, yt)).unwrap();
        let x = Array::linspace(0., 3., 7).insert_axis(Axis(1));
        let s1 = gp.sample(&x, 5).unwrap();
        let s2 = gp.sample(&x, 5).unwrap();
        assert_eq!(s1.dim(), (5, 7, 1));
        assert_abs_diff_eq!(s1, s2);
        // trajectories pass close to training data
        assert_abs_diff_eq!(s1[[0, 0, 0]], 0.0, epsilon = 0.1);
        assert_abs_diff_eq!(s1[[3, 2, 0]], 1.0, epsilon = 0.1);
    }

    #[test]
    fn test_sample_prior() {
        let x = Array::linspace(0., 5., 10).insert_axis(Axis(1));
        let params = fixed_params().check().unwrap();
        let samples = params.sample_prior(&x, 2, 3).unwrap();
        assert_eq!(samples.dim(), (3, 10, 2));
        assert!(samples.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_bad_inputs() {
        let xt = array![[0.0, 1.0], [1.0, 2.0], [2.0, 0.5]];
        let yt = array![0.0, 1.0, 1.5];
        let gp = fixed_params().fit(&Dataset::new(xt, yt)).unwrap();
        assert!(gp.predict(&array![[1.0]]).is_err());
        assert!(gp.posterior_mean_var(&array![[1.0, 2.0, 3.0]]).is_err());

        let res = GaussianProcess::<f64, QuadraticMean, SquaredExponentialCorr>::params(
            QuadraticMean(),
            SquaredExponentialCorr(),
        )
        .fit(&Dataset::new(array![[0.0, 1.0], [1.0, 2.0]], array![0.0, 1.0]));
        assert!(matches!(res, Err(GpError::InvalidValueError(_))));

        let empty = fixed_params()
            .check()
            .unwrap()
            .fit_shared(&[]);
        assert!(empty.is_err());
    }

    #[test]
    fn test_param_summary() {
        let xt = array![[0.0], [1.0], [2.0]];
        let yt = array![0.0, 1.0, 1.5];
        let gp = fixed_params().fit(&Dataset::new(xt, yt)).unwrap();
        let summary = gp.param_summary();
        let lines: Vec<&str> = summary.lines().collect();
        assert_eq!(lines.len(), 5);
        assert!(lines[0].starts_with("name"));
        assert!(lines[2].starts_with("gp.corr.theta[0]"));
        assert!(lines[2].contains("1.000"));
        assert!(lines[4].contains("gp.likelihood.noise_variance"));
        assert!(lines[4].trim_end().ends_with("fixed"));
    }

    #[test]
    fn test_display() {
        let xt = array![[0.0], [1.0], [2.0]];
        let yt = array![0.0, 1.0, 1.5];
        let gp = fixed_params().fit(&Dataset::new(xt, yt)).unwrap();
        assert!(gp
            .to_string()
            .starts_with("GP(mean=ZeroMean, corr=SquaredExponentialCorr, theta=[1]"));
    }

    #[test]
    fn test_two_dims_interpolation() {
        let x1 = Array::linspace(0., 1., 5);
        let mut xt = Array2::zeros((25, 2));
        for (k, mut row) in xt.rows_mut().into_iter().enumerate() {
            row[0] = x1[k / 5];
            row[1] = x1[k % 5];
        }
        let yt = xt.map_axis(Axis(1), |r| r[0] * r[0] + r[1]);
        let gp = GaussianProcess::<f64, QuadraticMean, SquaredExponentialCorr>::params(
            QuadraticMean(),
            SquaredExponentialCorr(),
        )
        .noise_variance(ParamTuning::Fixed(1e-8))
        .fit(&Dataset::new(xt, yt))
        .expect("GP fit error");
        let xtest = concatenate![Axis(1), arr2(&[[0.3], [0.6]]), arr2(&[[0.1], [0.9]])];
        let ytest = gp.predict(&xtest).unwrap();
        let expected = arr1(&[0.3 * 0.3 + 0.1, 0.6 * 0.6 + 0.9]).insert_axis(Axis(1));
        assert_abs_diff_eq!(ytest, expected, epsilon = 1e-3);
    }

    #[cfg(feature = "persistent")]
    #[test]
    fn test_save_load() {
        let xt = array![[0.0], [1.0], [2.0], [3.0]];
        let yt = array![0.0, 1.0, 1.5, 0.9];
        let gp = fixed_params().fit(&Dataset::new(xt, yt)).unwrap();
        let filename = std::env::temp_dir().join("distgp_gp_save.json");
        let filename = filename.to_str().unwrap();
        gp.save(filename).expect("GP saving");
        let loaded = GaussianProcess::<f64, ZeroMean, SquaredExponentialCorr>::load(filename)
            .expect("GP loading");
        let x = array![[0.5], [2.5]];
        assert_abs_diff_eq!(gp.predict(&x).unwrap(), loaded.predict(&x).unwrap(), epsilon = 1e-12);
    }
}
