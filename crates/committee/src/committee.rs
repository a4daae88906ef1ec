use crate::cluster::{Cluster, ClusterSpec};
use crate::errors::{CommitteeError, Result};
use crate::reduction::{Opinion, Reduction};
use crate::tree::CommitteeNode;

use distgp_gp::correlation_models::CorrelationModel;
use distgp_gp::mean_models::RegressionModel;
use distgp_gp::{GaussianProcess, GpError, GpValidParams};
use linfa::prelude::{DatasetBase, Fit, Float, PredictInplace};
use linfa::ParamGuard;
use log::{debug, info};
use ndarray::{s, Array2, ArrayBase, ArrayView2, Axis, Data, Ix1, Ix2};
use rayon::prelude::*;
#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Name of the root node of a committee
pub const COMMITTEE_ROOT_NAME: &str = "committee";

/// How experts hyperparameters are estimated
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub enum ExpertTraining {
    /// One set of hyperparameters shared by all experts, maximizing
    /// the sum of the experts marginal log likelihoods
    #[default]
    Shared,
    /// Each expert maximizes the likelihood of its own chunk of data
    Independent,
}

/// A set of validated committee parameters
#[derive(Clone, Debug)]
pub struct CommitteeValidParams<F: Float, Mean: RegressionModel<F>, Corr: CorrelationModel<F>> {
    /// Parameters of the GP experts
    gp_params: GpValidParams<F, Mean, Corr>,
    /// Number of experts
    n_experts: usize,
    /// Combination of the experts opinions
    reduction: Reduction,
    /// Hyperparameters estimation strategy
    training: ExpertTraining,
}

impl<F: Float, Mean: RegressionModel<F>, Corr: CorrelationModel<F>>
    CommitteeValidParams<F, Mean, Corr>
{
    /// GP experts parameters
    pub fn gp_params(&self) -> &GpValidParams<F, Mean, Corr> {
        &self.gp_params
    }

    /// Number of experts
    pub fn n_experts(&self) -> usize {
        self.n_experts
    }

    /// Reduction used at the root of the committee
    pub fn reduction(&self) -> Reduction {
        self.reduction
    }

    /// Hyperparameters estimation strategy
    pub fn training(&self) -> ExpertTraining {
        self.training
    }
}

/// The set of parameters of a flat committee of GP experts
#[derive(Clone, Debug)]
pub struct CommitteeParams<F: Float, Mean: RegressionModel<F>, Corr: CorrelationModel<F>>(
    CommitteeValidParams<F, Mean, Corr>,
);

impl<F: Float, Mean: RegressionModel<F>, Corr: CorrelationModel<F>> CommitteeParams<F, Mean, Corr> {
    /// Committee of 4 experts combined with a rBCM using differential entropy weights
    pub fn new(gp_params: GpValidParams<F, Mean, Corr>) -> Self {
        CommitteeParams(CommitteeValidParams {
            gp_params,
            n_experts: 4,
            reduction: Reduction::default(),
            training: ExpertTraining::default(),
        })
    }

    /// Set GP experts parameters
    pub fn gp_params(mut self, gp_params: GpValidParams<F, Mean, Corr>) -> Self {
        self.0.gp_params = gp_params;
        self
    }

    /// Set the number of experts
    pub fn n_experts(mut self, n_experts: usize) -> Self {
        self.0.n_experts = n_experts;
        self
    }

    /// Set the reduction combining experts opinions
    pub fn reduction(mut self, reduction: Reduction) -> Self {
        self.0.reduction = reduction;
        self
    }

    /// Set the hyperparameters estimation strategy
    pub fn training(mut self, training: ExpertTraining) -> Self {
        self.0.training = training;
        self
    }
}

impl<F: Float, Mean: RegressionModel<F>, Corr: CorrelationModel<F>> ParamGuard
    for CommitteeParams<F, Mean, Corr>
{
    type Checked = CommitteeValidParams<F, Mean, Corr>;
    type Error = CommitteeError;

    fn check_ref(&self) -> Result<&Self::Checked> {
        if self.0.n_experts == 0 {
            return Err(CommitteeError::InvalidValueError(
                "`n_experts` should be greater than 0".to_string(),
            ));
        }
        Ok(&self.0)
    }

    fn check(self) -> Result<Self::Checked> {
        self.check_ref()?;
        Ok(self.0)
    }
}

/// Contiguous ranges splitting `n` points in `n_chunks` chunks which sizes differ by at most one
pub(crate) fn chunk_ranges(n: usize, n_chunks: usize) -> Result<Vec<std::ops::Range<usize>>> {
    if n_chunks == 0 || n_chunks > n {
        return Err(CommitteeError::InvalidValueError(format!(
            "Number of experts ({n_chunks}) should be in [1, {n}] (number of training points)"
        )));
    }
    let (size, remainder) = (n / n_chunks, n % n_chunks);
    let mut start = 0;
    Ok((0..n_chunks)
        .map(|i| {
            let end = start + size + usize::from(i < remainder);
            let range = start..end;
            start = end;
            range
        })
        .collect())
}

/// Split training data in `n_experts` contiguous chunks and fit one GP expert per chunk
pub(crate) fn train_experts<F: Float, Mean: RegressionModel<F>, Corr: CorrelationModel<F>>(
    gp_params: &GpValidParams<F, Mean, Corr>,
    training: ExpertTraining,
    x: &ArrayView2<F>,
    y: &ArrayView2<F>,
    n_experts: usize,
) -> Result<Vec<GaussianProcess<F, Mean, Corr>>> {
    if x.nrows() != y.nrows() {
        return Err(CommitteeError::InvalidValueError(format!(
            "Training inputs ({}) and outputs ({}) numbers mismatch",
            x.nrows(),
            y.nrows()
        )));
    }
    let chunks: Vec<(ArrayView2<F>, ArrayView2<F>)> = chunk_ranges(x.nrows(), n_experts)?
        .into_iter()
        .map(|r| (x.slice(s![r.clone(), ..]), y.slice(s![r, ..])))
        .collect();
    let now = Instant::now();
    let experts = match training {
        ExpertTraining::Shared => gp_params.fit_shared(&chunks)?,
        ExpertTraining::Independent => chunks
            .par_iter()
            .map(|(xc, yc)| {
                let hyper = gp_params.optimize_hyperparameters(&[(xc.view(), yc.view())])?;
                gp_params.condition(&hyper, xc, yc)
            })
            .collect::<std::result::Result<Vec<_>, GpError>>()?,
    };
    debug!(
        "{} experts trained ({:?}) in {} ms",
        experts.len(),
        training,
        now.elapsed().as_millis()
    );
    Ok(experts)
}

/// A committee of GP experts organized as a tree of reductions
///
/// The opinions of the experts at the leaves of the tree are combined up to the root by
/// [Reduction]s. Each node may be placed on a device of a cluster (see [crate::Placement])
/// in which case it is evaluated on the corresponding task of the cluster runtime.
#[cfg_attr(
    feature = "serializable",
    derive(Serialize, Deserialize),
    serde(bound(
        serialize = "F: Serialize, Mean: Serialize, Corr: Serialize",
        deserialize = "F: Deserialize<'de>, Mean: Deserialize<'de>, Corr: Deserialize<'de>"
    ))
)]
pub struct Committee<F: Float, Mean: RegressionModel<F>, Corr: CorrelationModel<F>> {
    /// Root of the committee tree
    root: CommitteeNode<F, Mean, Corr>,
    /// Cluster the nodes are placed on
    cluster_spec: ClusterSpec,
    /// Number of threads of each task of the cluster runtime
    threads_per_task: usize,
    /// Cluster runtime, started on first evaluation
    #[cfg_attr(feature = "serializable", serde(skip))]
    runtime: Mutex<Option<Arc<Cluster>>>,
}

impl<F: Float, Mean: RegressionModel<F>, Corr: CorrelationModel<F>> Clone
    for Committee<F, Mean, Corr>
{
    fn clone(&self) -> Self {
        Committee {
            root: self.root.clone(),
            cluster_spec: self.cluster_spec.clone(),
            threads_per_task: self.threads_per_task,
            runtime: Mutex::new(None),
        }
    }
}

impl<F: Float, Mean: RegressionModel<F>, Corr: CorrelationModel<F>> fmt::Debug
    for Committee<F, Mean, Corr>
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Committee")
            .field("root", &self.root)
            .field("cluster_spec", &self.cluster_spec)
            .field("threads_per_task", &self.threads_per_task)
            .finish()
    }
}

impl<F: Float, Mean: RegressionModel<F>, Corr: CorrelationModel<F>> fmt::Display
    for Committee<F, Mean, Corr>
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Committee({}, {} experts, log_likelihood={})",
            self.root.kind_name(),
            self.n_experts(),
            self.log_likelihood()
        )
    }
}

impl<F: Float, Mean: RegressionModel<F>, Corr: CorrelationModel<F>> Committee<F, Mean, Corr> {
    /// Committee parameters constructor
    pub fn params(gp_params: GpValidParams<F, Mean, Corr>) -> CommitteeParams<F, Mean, Corr> {
        CommitteeParams::new(gp_params)
    }

    /// Committee evaluated locally given its root node
    pub fn from_root(root: CommitteeNode<F, Mean, Corr>) -> Self {
        Committee {
            root,
            cluster_spec: ClusterSpec::new(),
            threads_per_task: 1,
            runtime: Mutex::new(None),
        }
    }

    /// Set the cluster nodes are placed on and the number of threads of each of its tasks
    pub fn with_cluster(mut self, cluster_spec: ClusterSpec, threads_per_task: usize) -> Result<Self> {
        if threads_per_task == 0 {
            return Err(CommitteeError::ClusterError(
                "Number of threads per task should be greater than 0".to_string(),
            ));
        }
        self.threads_per_task = threads_per_task;
        self.connect(cluster_spec)?;
        Ok(self)
    }

    /// Root node of the committee tree
    pub fn root(&self) -> &CommitteeNode<F, Mean, Corr> {
        &self.root
    }

    /// Mutable root node of the committee tree, the cluster runtime is restarted
    /// on next evaluation to take placement changes into account
    pub fn root_mut(&mut self) -> &mut CommitteeNode<F, Mean, Corr> {
        self.stop_runtime();
        &mut self.root
    }

    /// Number of GP experts
    pub fn n_experts(&self) -> usize {
        self.root.n_experts()
    }

    /// Sum of the experts marginal log likelihoods
    pub fn log_likelihood(&self) -> F {
        self.root.log_likelihood()
    }

    /// Cluster the committee nodes are placed on
    pub fn cluster_spec(&self) -> &ClusterSpec {
        &self.cluster_spec
    }

    /// Place the committee on another cluster. The running cluster runtime, if any,
    /// is stopped when the spec changes.
    pub fn connect(&mut self, cluster_spec: ClusterSpec) -> Result<()> {
        cluster_spec.validate()?;
        if cluster_spec != self.cluster_spec {
            self.stop_runtime();
            info!("Committee connected to cluster {cluster_spec}");
            self.cluster_spec = cluster_spec;
        }
        Ok(())
    }

    /// Session target of the coordinating task, `None` when evaluated locally
    pub fn target(&self) -> Result<Option<String>> {
        Ok(self.runtime()?.target().map(|t| t.to_string()))
    }

    fn stop_runtime(&mut self) {
        match self.runtime.get_mut() {
            Ok(runtime) => *runtime = None,
            Err(poisoned) => *poisoned.into_inner() = None,
        }
    }

    fn runtime(&self) -> Result<Arc<Cluster>> {
        if self.cluster_spec.is_local() {
            return Ok(Arc::new(Cluster::local()));
        }
        let mut runtime = self
            .runtime
            .lock()
            .map_err(|_| CommitteeError::ClusterError("Cluster runtime lock poisoned".to_string()))?;
        match runtime.as_ref() {
            Some(cluster) => Ok(cluster.clone()),
            None => {
                let coordinator = self.root.placement().resolve(None);
                let cluster = Arc::new(Cluster::new(
                    &self.cluster_spec,
                    self.threads_per_task,
                    coordinator.as_ref(),
                )?);
                *runtime = Some(cluster.clone());
                Ok(cluster)
            }
        }
    }

    /// Opinion of the committee root at `x`
    pub fn opinion(&self, x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Result<Opinion<F>> {
        let runtime = self.runtime()?;
        self.root.opinion(&x.view(), &runtime, None)
    }

    /// Predict output values (n, L) at n given `x` points of nx components
    pub fn predict(&self, x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Result<Array2<F>> {
        Ok(self.opinion(x)?.mean)
    }

    /// Predict variance values (n, L) at n given `x` points of nx components
    pub fn predict_var(&self, x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Result<Array2<F>> {
        Ok(self.opinion(x)?.var)
    }

    /// Predict both output values and variances at n given `x` points of nx components
    pub fn predict_valvar(
        &self,
        x: &ArrayBase<impl Data<Elem = F>, Ix2>,
    ) -> Result<(Array2<F>, Array2<F>)> {
        let opinion = self.opinion(x)?;
        Ok((opinion.mean, opinion.var))
    }

    /// Prior mean and variance (n, L) of the committee at `x`
    pub fn prior_mean_var(
        &self,
        x: &ArrayBase<impl Data<Elem = F>, Ix2>,
    ) -> Result<(Array2<F>, Array2<F>)> {
        self.root.prior_mean_var(&x.view())
    }

    /// Posterior mean and full covariance, only available when the committee root is an expert
    pub fn posterior_mean_cov(
        &self,
        x: &ArrayBase<impl Data<Elem = F>, Ix2>,
    ) -> Result<(Array2<F>, Array2<F>)> {
        self.root.posterior_mean_cov(&x.view())
    }

    /// Plain text table of the committee nodes: name | kind | placement | device
    pub fn summary(&self) -> String {
        let rows: Vec<[String; 4]> = self
            .root
            .nodes()
            .into_iter()
            .zip(self.root.effective_devices(None))
            .map(|((name, node), (_, device))| {
                [
                    name,
                    node.kind_name(),
                    node.placement().to_string(),
                    device.map_or("local".to_string(), |d| d.to_string()),
                ]
            })
            .collect();
        let headers = ["name", "kind", "placement", "device"];
        let widths: Vec<usize> = (0..4)
            .map(|i| {
                rows.iter()
                    .map(|r| r[i].len())
                    .chain(std::iter::once(headers[i].len()))
                    .max()
                    .unwrap_or(0)
            })
            .collect();
        let line = |cells: [&str; 4]| {
            cells
                .iter()
                .zip(widths.iter())
                .map(|(c, w)| format!("{c:<width$}", width = *w))
                .collect::<Vec<_>>()
                .join(" | ")
                .trim_end()
                .to_string()
        };
        let mut out = line(headers);
        out.push('\n');
        out.push_str(
            &widths
                .iter()
                .map(|w| "-".repeat(*w))
                .collect::<Vec<_>>()
                .join("-+-"),
        );
        out.push('\n');
        for r in rows.iter() {
            out.push_str(&line([&r[0], &r[1], &r[2], &r[3]]));
            out.push('\n');
        }
        out
    }
}

impl<F, D, Mean, Corr> PredictInplace<ArrayBase<D, Ix2>, Array2<F>> for Committee<F, Mean, Corr>
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

        let values = self.predict(x).expect("Committee prediction");
        *y = values;
    }

    fn default_target(&self, x: &ArrayBase<D, Ix2>) -> Array2<F> {
        let n_latent = self
            .root
            .experts()
            .first()
            .map_or(1, |gp| gp.dims().1);
        Array2::zeros((x.nrows(), n_latent))
    }
}

impl<F: Float, Mean: RegressionModel<F>, Corr: CorrelationModel<F>>
    CommitteeValidParams<F, Mean, Corr>
{
    fn train(&self, x: &ArrayView2<F>, y: &ArrayView2<F>) -> Result<Committee<F, Mean, Corr>> {
        let experts = train_experts(&self.gp_params, self.training, x, y, self.n_experts)?;
        let leaves = experts
            .into_iter()
            .enumerate()
            .map(|(i, gp)| CommitteeNode::expert(&i.to_string(), gp))
            .collect();
        let root = CommitteeNode::reduction(COMMITTEE_ROOT_NAME, self.reduction, leaves);
        Ok(Committee::from_root(root))
    }
}

impl<F: Float, Mean: RegressionModel<F>, Corr: CorrelationModel<F>, D: Data<Elem = F>>
    Fit<ArrayBase<D, Ix2>, ArrayBase<D, Ix2>, CommitteeError> for CommitteeValidParams<F, Mean, Corr>
{
    type Object = Committee<F, Mean, Corr>;

    fn fit(
        &self,
        dataset: &DatasetBase<ArrayBase<D, Ix2>, ArrayBase<D, Ix2>>,
    ) -> Result<Self::Object> {
        self.train(&dataset.records().view(), &dataset.targets().view())
    }
}

impl<F: Float, Mean: RegressionModel<F>, Corr: CorrelationModel<F>, D: Data<Elem = F>>
    Fit<ArrayBase<D, Ix2>, ArrayBase<D, Ix1>, CommitteeError> for CommitteeValidParams<F, Mean, Corr>
{
    type Object = Committee<F, Mean, Corr>;

    fn fit(
        &self,
        dataset: &DatasetBase<ArrayBase<D, Ix2>, ArrayBase<D, Ix1>>,
    ) -> Result<Self::Object> {
        let y = dataset.targets().view().insert_axis(Axis(1));
        self.train(&dataset.records().view(), &y)
    }
}

#[cfg(feature = "persistent")]
impl<F, Mean, Corr> Committee<F, Mean, Corr>
where
    F: Float + Serialize + serde::de::DeserializeOwned,
    Mean: RegressionModel<F> + Serialize + serde::de::DeserializeOwned,
    Corr: CorrelationModel<F> + Serialize + serde::de::DeserializeOwned,
{
    /// Save the committee as a json file
    pub fn save(&self, path: &str) -> Result<()> {
        use std::io::Write;
        let mut file = std::fs::File::create(path)?;
        let bytes = serde_json::to_vec(self)?;
        file.write_all(&bytes)?;
        Ok(())
    }

    /// Load a committee from a json file
    pub fn load(path: &str) -> Result<Self> {
        let data = std::fs::read(path)?;
        Ok(serde_json::from_slice(&data)?)
    }
}
