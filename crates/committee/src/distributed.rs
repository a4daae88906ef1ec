//! Robust Bayesian committee machine distributed over the tasks of a cluster.
//!
//! The experts are organized as a tree which branching factors are given by an
//! architecture, e.g. `[2, 3]` gives a root combining 2 nodes each combining 3 experts.
//! Experts are placed round-robin on the tasks of the worker job while reductions are
//! evaluated on the coordinating task.
use crate::cluster::ClusterSpec;
use crate::committee::{train_experts, Committee, ExpertTraining, COMMITTEE_ROOT_NAME};
use crate::errors::{CommitteeError, Result};
use crate::placement::{DeviceSpec, Placement};
use crate::reduction::Reduction;
use crate::tree::CommitteeNode;
use crate::weights::Weighting;

use distgp_gp::correlation_models::CorrelationModel;
use distgp_gp::mean_models::RegressionModel;
use distgp_gp::{GaussianProcess, GpValidParams};
use linfa::prelude::{DatasetBase, Fit, Float};
use linfa::ParamGuard;
use log::info;
use ndarray::{ArrayBase, ArrayView2, Axis, Data, Ix1, Ix2};

/// A set of validated distributed rBCM parameters
#[derive(Clone, Debug)]
pub struct DistributedRbcmValidParams<F: Float, Mean: RegressionModel<F>, Corr: CorrelationModel<F>>
{
    gp_params: GpValidParams<F, Mean, Corr>,
    architecture: Vec<usize>,
    cluster_spec: ClusterSpec,
    worker_job: String,
    param_server_job: String,
    master_job: Option<String>,
    weighting: Weighting,
    training: ExpertTraining,
    threads_per_task: usize,
}

impl<F: Float, Mean: RegressionModel<F>, Corr: CorrelationModel<F>>
    DistributedRbcmValidParams<F, Mean, Corr>
{
    /// Branching factors of the committee tree from the root to the experts
    pub fn architecture(&self) -> &[usize] {
        &self.architecture
    }

    /// Number of experts, the product of the branching factors
    pub fn n_experts(&self) -> usize {
        self.architecture.iter().product()
    }

    /// Cluster the committee is distributed on
    pub fn cluster_spec(&self) -> &ClusterSpec {
        &self.cluster_spec
    }

    /// Job the experts are placed on
    pub fn worker_job(&self) -> &str {
        &self.worker_job
    }

    /// Job coordinating the evaluation: the master job when given,
    /// the parameter server job otherwise
    pub fn coordinator_job(&self) -> &str {
        self.master_job.as_deref().unwrap_or(&self.param_server_job)
    }

    /// Weighting of the experts opinions
    pub fn weighting(&self) -> Weighting {
        self.weighting
    }

    /// Build the committee tree over the given experts
    pub fn build_tree(
        &self,
        experts: Vec<GaussianProcess<F, Mean, Corr>>,
    ) -> Result<CommitteeNode<F, Mean, Corr>> {
        if experts.len() != self.n_experts() {
            return Err(CommitteeError::InvalidValueError(format!(
                "Architecture {:?} requires {} experts, got {}",
                self.architecture,
                self.n_experts(),
                experts.len()
            )));
        }
        let n_workers = self.cluster_spec.num_tasks(&self.worker_job).unwrap_or(1);
        let leaf_branching = self.architecture[self.architecture.len() - 1];
        let mut leaves = experts.into_iter().enumerate().map(|(i, gp)| {
            let device = DeviceSpec::task(&self.worker_job, i % n_workers);
            CommitteeNode::expert(&(i % leaf_branching).to_string(), gp)
                .with_placement(Placement::Pin(device))
        });
        let root = self.build_layer(COMMITTEE_ROOT_NAME, 0, &mut leaves);
        let coordinator = DeviceSpec::task(self.coordinator_job(), 0);
        Ok(root.with_placement(Placement::Pin(coordinator)))
    }

    fn build_layer(
        &self,
        name: &str,
        depth: usize,
        leaves: &mut impl Iterator<Item = CommitteeNode<F, Mean, Corr>>,
    ) -> CommitteeNode<F, Mean, Corr> {
        let n_layers = self.architecture.len();
        let branching = self.architecture[depth];
        let children: Vec<_> = if depth + 1 == n_layers {
            leaves.take(branching).collect()
        } else {
            (0..branching)
                .map(|i| self.build_layer(&i.to_string(), depth + 1, leaves))
                .collect()
        };
        let reduction = match (depth, depth + 1 == n_layers) {
            (0, true) => Reduction::RBcm(self.weighting),
            (0, false) => Reduction::RBcm(Weighting::Ones),
            (_, true) => Reduction::GPoE(self.weighting),
            (_, false) => Reduction::GPoE(Weighting::Ones),
        };
        CommitteeNode::reduction(name, reduction, children)
    }

    fn train(&self, x: &ArrayView2<F>, y: &ArrayView2<F>) -> Result<Committee<F, Mean, Corr>> {
        let experts = train_experts(&self.gp_params, self.training, x, y, self.n_experts())?;
        let root = self.build_tree(experts)?;
        info!(
            "Distributed rBCM {:?} of {} experts over {} tasks of job `{}`, coordinated by `{}`",
            self.architecture,
            self.n_experts(),
            self.cluster_spec.num_tasks(&self.worker_job).unwrap_or(0),
            self.worker_job,
            self.coordinator_job()
        );
        Committee::from_root(root).with_cluster(self.cluster_spec.clone(), self.threads_per_task)
    }
}

/// The set of parameters of a rBCM distributed over a cluster
#[derive(Clone, Debug)]
pub struct DistributedRbcmParams<F: Float, Mean: RegressionModel<F>, Corr: CorrelationModel<F>>(
    DistributedRbcmValidParams<F, Mean, Corr>,
);

impl<F: Float, Mean: RegressionModel<F>, Corr: CorrelationModel<F>>
    DistributedRbcmParams<F, Mean, Corr>
{
    /// Distributed rBCM with given architecture over the given cluster using
    /// `worker` and `ps` jobs and differential entropy weights
    pub fn new(
        gp_params: GpValidParams<F, Mean, Corr>,
        architecture: Vec<usize>,
        cluster_spec: ClusterSpec,
    ) -> Self {
        DistributedRbcmParams(DistributedRbcmValidParams {
            gp_params,
            architecture,
            cluster_spec,
            worker_job: "worker".to_string(),
            param_server_job: "ps".to_string(),
            master_job: None,
            weighting: Weighting::DifferentialEntropy,
            training: ExpertTraining::Shared,
            threads_per_task: 1,
        })
    }

    /// Set the job experts are placed on
    pub fn worker_job(mut self, job: &str) -> Self {
        self.0.worker_job = job.to_string();
        self
    }

    /// Set the parameter server job
    pub fn param_server_job(mut self, job: &str) -> Self {
        self.0.param_server_job = job.to_string();
        self
    }

    /// Set the job coordinating the evaluation instead of the parameter server job
    pub fn master_job(mut self, job: Option<&str>) -> Self {
        self.0.master_job = job.map(|j| j.to_string());
        self
    }

    /// Set the weighting of the experts opinions
    pub fn weighting(mut self, weighting: Weighting) -> Self {
        self.0.weighting = weighting;
        self
    }

    /// Set the hyperparameters estimation strategy
    pub fn training(mut self, training: ExpertTraining) -> Self {
        self.0.training = training;
        self
    }

    /// Set the number of threads of each task of the cluster runtime
    pub fn threads_per_task(mut self, threads_per_task: usize) -> Self {
        self.0.threads_per_task = threads_per_task;
        self
    }
}

impl<F: Float, Mean: RegressionModel<F>, Corr: CorrelationModel<F>> ParamGuard
    for DistributedRbcmParams<F, Mean, Corr>
{
    type Checked = DistributedRbcmValidParams<F, Mean, Corr>;
    type Error = CommitteeError;

    fn check_ref(&self) -> Result<&Self::Checked> {
        let params = &self.0;
        if params.architecture.is_empty() || params.architecture.contains(&0) {
            return Err(CommitteeError::InvalidValueError(format!(
                "Architecture should be non empty with positive branching factors, got {:?}",
                params.architecture
            )));
        }
        params.cluster_spec.validate()?;
        for job in [params.worker_job.as_str(), params.coordinator_job()] {
            if params.cluster_spec.num_tasks(job).is_none() {
                return Err(CommitteeError::PlacementError(format!(
                    "Job `{job}` not found in cluster {}",
                    params.cluster_spec
                )));
            }
        }
        if params.threads_per_task == 0 {
            return Err(CommitteeError::InvalidValueError(
                "Number of threads per task should be greater than 0".to_string(),
            ));
        }
        Ok(params)
    }

    fn check(self) -> Result<Self::Checked> {
        self.check_ref()?;
        Ok(self.0)
    }
}

impl<F: Float, Mean: RegressionModel<F>, Corr: CorrelationModel<F>, D: Data<Elem = F>>
    Fit<ArrayBase<D, Ix2>, ArrayBase<D, Ix2>, CommitteeError>
    for DistributedRbcmValidParams<F, Mean, Corr>
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
    Fit<ArrayBase<D, Ix2>, ArrayBase<D, Ix1>, CommitteeError>
    for DistributedRbcmValidParams<F, Mean, Corr>
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::committee::CommitteeParams;
    use approx::assert_abs_diff_eq;
    use distgp_gp::correlation_models::SquaredExponentialCorr;
    use distgp_gp::mean_models::ZeroMean;
    use distgp_gp::{Gpr, ParamTuning, ThetaTuning};
    use linfa::prelude::Dataset;
    use ndarray::{array, Array, Ix1};

    fn gp_params() -> GpValidParams<f64, ZeroMean, SquaredExponentialCorr> {
        Gpr::params()
            .theta_tuning(ThetaTuning::Fixed(array![2.0]))
            .variance(ParamTuning::Fixed(1.0))
            .noise_variance(ParamTuning::Fixed(1e-3))
            .check()
            .unwrap()
    }

    fn spec() -> ClusterSpec {
        ClusterSpec::from_json(
            r#"{"worker": ["w0:2222", "w1:2222", "w2:2222"], "ps": ["ps0:2222"], "master": ["m0:2222"]}"#,
        )
        .unwrap()
    }

    fn dataset() -> Dataset<f64, f64, Ix1> {
        let x = Array::linspace(0., 6., 36).insert_axis(Axis(1));
        let y = x.column(0).mapv(|v: f64| v.sin());
        Dataset::new(x, y)
    }

    #[test]
    fn test_validation() {
        let bad = |arch: Vec<usize>| DistributedRbcmParams::new(gp_params(), arch, spec()).check();
        assert!(bad(vec![]).is_err());
        assert!(bad(vec![2, 0]).is_err());
        assert!(bad(vec![2, 2]).is_ok());
        assert!(DistributedRbcmParams::new(gp_params(), vec![2], spec())
            .worker_job("gpu")
            .check()
            .is_err());
        assert!(DistributedRbcmParams::new(gp_params(), vec![2], spec())
            .master_job(Some("chief"))
            .check()
            .is_err());
        assert!(DistributedRbcmParams::new(gp_params(), vec![2], spec())
            .threads_per_task(0)
            .check()
            .is_err());
    }

    #[test]
    fn test_tree_shape_and_placement() {
        let committee = DistributedRbcmParams::new(gp_params(), vec![2, 3], spec())
            .weighting(Weighting::Equal)
            .fit(&dataset())
            .unwrap();
        assert_eq!(committee.n_experts(), 6);
        let root = committee.root();
        assert_eq!(root.kind_name(), "rBCM(Ones)");
        let nodes = root.nodes();
        assert_eq!(nodes[1].0, "committee.0");
        assert_eq!(nodes[1].1.kind_name(), "gPoE(Equal)");
        assert_eq!(nodes[2].0, "committee.0.0");
        assert_eq!(nodes[6].0, "committee.1.0");

        let devices = root.effective_devices(None);
        assert_eq!(devices[0].1.as_ref().unwrap().to_string(), "/job:ps/task:0");
        assert_eq!(devices[1].1.as_ref().unwrap().to_string(), "/job:ps/task:0");
        // 4th expert on the first worker again
        assert_eq!(devices[6].1.as_ref().unwrap().to_string(), "/job:worker/task:0");
        assert_eq!(devices[7].1.as_ref().unwrap().to_string(), "/job:worker/task:1");
        assert_eq!(committee.target().unwrap().as_deref(), Some("grpc://ps0:2222"));
    }

    #[test]
    fn test_single_layer_and_master() {
        let committee = DistributedRbcmParams::new(gp_params(), vec![3], spec())
            .master_job(Some("master"))
            .fit(&dataset())
            .unwrap();
        assert_eq!(committee.root().kind_name(), "rBCM(DifferentialEntropy)");
        assert_eq!(committee.root().nodes().len(), 4);
        assert_eq!(committee.target().unwrap().as_deref(), Some("grpc://m0:2222"));
    }

    #[test]
    fn test_three_layers() {
        let params = DistributedRbcmParams::new(gp_params(), vec![2, 2, 3], spec())
            .check()
            .unwrap();
        let committee = params.fit(&dataset()).unwrap();
        let kinds: Vec<String> = committee
            .root()
            .nodes()
            .iter()
            .take(3)
            .map(|(_, n)| n.kind_name())
            .collect();
        assert_eq!(kinds, vec!["rBCM(Ones)", "gPoE(Ones)", "gPoE(DifferentialEntropy)"]);
        assert_eq!(committee.n_experts(), 12);
    }

    #[test]
    fn test_hierarchical_equals_flat_rbcm() {
        let ds = dataset();
        let x = array![[0.2], [1.1], [2.9], [4.4], [5.8], [8.0]];
        for weighting in [Weighting::Ones, Weighting::DifferentialEntropy] {
            let flat = CommitteeParams::new(gp_params())
                .n_experts(6)
                .reduction(Reduction::RBcm(weighting))
                .fit(&ds)
                .unwrap();
            let distributed = DistributedRbcmParams::new(gp_params(), vec![2, 3], spec())
                .weighting(weighting)
                .threads_per_task(2)
                .fit(&ds)
                .unwrap();
            let (flat_mean, flat_var) = flat.predict_valvar(&x).unwrap();
            let (mean, var) = distributed.predict_valvar(&x).unwrap();
            assert_abs_diff_eq!(mean, flat_mean, epsilon = 1e-9);
            assert_abs_diff_eq!(var, flat_var, epsilon = 1e-9);
            assert_abs_diff_eq!(
                distributed.log_likelihood(),
                flat.log_likelihood(),
                epsilon = 1e-9
            );
        }
    }

    #[test]
    fn test_build_tree_requires_all_experts() {
        let params = DistributedRbcmParams::new(gp_params(), vec![2, 2], spec())
            .check()
            .unwrap();
        assert!(params.build_tree(vec![]).is_err());
    }
}
