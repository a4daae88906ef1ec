use crate::cluster::Cluster;
use crate::errors::{CommitteeError, Result};
use crate::placement::{DeviceSpec, Placement};
use crate::reduction::{divide_prior, Opinion, Reduction};
use crate::weights::Weighting;

use distgp_gp::correlation_models::CorrelationModel;
use distgp_gp::mean_models::RegressionModel;
use distgp_gp::GaussianProcess;
use linfa::Float;
use log::trace;
use ndarray::{Array2, ArrayView2};
use rayon::prelude::*;
#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};

/// Kind of a committee node
#[derive(Clone, Debug)]
#[cfg_attr(
    feature = "serializable",
    derive(Serialize, Deserialize),
    serde(bound(
        serialize = "F: Serialize, Mean: Serialize, Corr: Serialize",
        deserialize = "F: Deserialize<'de>, Mean: Deserialize<'de>, Corr: Deserialize<'de>"
    ))
)]
pub enum NodeKind<F: Float, Mean: RegressionModel<F>, Corr: CorrelationModel<F>> {
    /// A GP expert trained on a chunk of data
    Expert(GaussianProcess<F, Mean, Corr>),
    /// Combination of the opinions of several children
    Reduction {
        /// Combination rule
        reduction: Reduction,
        /// Children nodes
        children: Vec<CommitteeNode<F, Mean, Corr>>,
    },
    /// Division of the opinion of a single child by its weighted prior
    PriorDivision {
        /// Weight of the child prior
        weighting: Weighting,
        /// Child node
        child: Box<CommitteeNode<F, Mean, Corr>>,
    },
}

/// A node of a committee tree of GP experts
#[derive(Clone, Debug)]
#[cfg_attr(
    feature = "serializable",
    derive(Serialize, Deserialize),
    serde(bound(
        serialize = "F: Serialize, Mean: Serialize, Corr: Serialize",
        deserialize = "F: Deserialize<'de>, Mean: Deserialize<'de>, Corr: Deserialize<'de>"
    ))
)]
pub struct CommitteeNode<F: Float, Mean: RegressionModel<F>, Corr: CorrelationModel<F>> {
    name: String,
    placement: Placement,
    kind: NodeKind<F, Mean, Corr>,
}

impl<F: Float, Mean: RegressionModel<F>, Corr: CorrelationModel<F>> CommitteeNode<F, Mean, Corr> {
    /// Leaf node holding a GP expert
    pub fn expert(name: &str, gp: GaussianProcess<F, Mean, Corr>) -> Self {
        Self::new(name, NodeKind::Expert(gp))
    }

    /// Node combining the opinions of its children
    pub fn reduction(
        name: &str,
        reduction: Reduction,
        children: Vec<CommitteeNode<F, Mean, Corr>>,
    ) -> Self {
        Self::new(
            name,
            NodeKind::Reduction {
                reduction,
                children,
            },
        )
    }

    /// Node dividing the opinion of `child` by its weighted prior
    pub fn prior_division(
        name: &str,
        weighting: Weighting,
        child: CommitteeNode<F, Mean, Corr>,
    ) -> Self {
        Self::new(
            name,
            NodeKind::PriorDivision {
                weighting,
                child: Box::new(child),
            },
        )
    }

    fn new(name: &str, kind: NodeKind<F, Mean, Corr>) -> Self {
        CommitteeNode {
            name: name.to_string(),
            placement: Placement::Inherit,
            kind,
        }
    }

    /// Set the placement of the node
    pub fn with_placement(mut self, placement: Placement) -> Self {
        self.placement = placement;
        self
    }

    /// Local name of the node
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Placement of the node
    pub fn placement(&self) -> &Placement {
        &self.placement
    }

    /// Change the placement of the node
    pub fn set_placement(&mut self, placement: Placement) {
        self.placement = placement;
    }

    /// Kind of the node
    pub fn kind(&self) -> &NodeKind<F, Mean, Corr> {
        &self.kind
    }

    /// Direct children of the node
    pub fn children(&self) -> Vec<&CommitteeNode<F, Mean, Corr>> {
        match &self.kind {
            NodeKind::Expert(_) => vec![],
            NodeKind::Reduction { children, .. } => children.iter().collect(),
            NodeKind::PriorDivision { child, .. } => vec![child.as_ref()],
        }
    }

    fn children_mut(&mut self) -> Vec<&mut CommitteeNode<F, Mean, Corr>> {
        match &mut self.kind {
            NodeKind::Expert(_) => vec![],
            NodeKind::Reduction { children, .. } => children.iter_mut().collect(),
            NodeKind::PriorDivision { child, .. } => vec![child.as_mut()],
        }
    }

    /// Short description of the node kind
    pub fn kind_name(&self) -> String {
        match &self.kind {
            NodeKind::Expert(gp) => format!("Expert({} points)", gp.training_data().0.nrows()),
            NodeKind::Reduction { reduction, .. } => reduction.to_string(),
            NodeKind::PriorDivision { weighting, .. } => format!("PriorDivision({weighting})"),
        }
    }

    /// Nodes of the tree rooted at this node, depth first in pre-order,
    /// with their long name `root.child.grandchild`
    pub fn nodes(&self) -> Vec<(String, &CommitteeNode<F, Mean, Corr>)> {
        let mut nodes = vec![];
        self.collect_nodes(None, &mut nodes);
        nodes
    }

    fn collect_nodes<'a>(
        &'a self,
        prefix: Option<&str>,
        nodes: &mut Vec<(String, &'a CommitteeNode<F, Mean, Corr>)>,
    ) {
        let long_name = match prefix {
            Some(p) => format!("{p}.{}", self.name),
            None => self.name.clone(),
        };
        nodes.push((long_name.clone(), self));
        for child in self.children() {
            child.collect_nodes(Some(&long_name), nodes);
        }
    }

    /// GP experts at the leaves of the tree, left to right
    pub fn experts(&self) -> Vec<&GaussianProcess<F, Mean, Corr>> {
        self.nodes()
            .into_iter()
            .filter_map(|(_, node)| match &node.kind {
                NodeKind::Expert(gp) => Some(gp),
                _ => None,
            })
            .collect()
    }

    /// Number of experts of the tree
    pub fn n_experts(&self) -> usize {
        self.experts().len()
    }

    /// Find a node of the tree given its long name
    pub fn find_mut(&mut self, long_name: &str) -> Option<&mut CommitteeNode<F, Mean, Corr>> {
        if long_name == self.name {
            return Some(self);
        }
        let rest = long_name
            .strip_prefix(self.name.as_str())
            .and_then(|r| r.strip_prefix('.'))?;
        let child_name = rest.split('.').next()?;
        self.children_mut()
            .into_iter()
            .find(|c| c.name == child_name)
            .and_then(|c| c.find_mut(rest))
    }

    /// Effective device of every node (depth first, pre-order) when this node
    /// is evaluated under the `parent` device
    pub fn effective_devices(
        &self,
        parent: Option<&DeviceSpec>,
    ) -> Vec<(String, Option<DeviceSpec>)> {
        let mut devices = vec![];
        self.collect_devices(None, parent, &mut devices);
        devices
    }

    fn collect_devices(
        &self,
        prefix: Option<&str>,
        parent: Option<&DeviceSpec>,
        devices: &mut Vec<(String, Option<DeviceSpec>)>,
    ) {
        let long_name = match prefix {
            Some(p) => format!("{p}.{}", self.name),
            None => self.name.clone(),
        };
        let device = self.placement.resolve(parent);
        devices.push((long_name.clone(), device.clone()));
        for child in self.children() {
            child.collect_devices(Some(&long_name), device.as_ref(), devices);
        }
    }

    /// Marginal log likelihood: sum of the experts log likelihoods
    pub fn log_likelihood(&self) -> F {
        match &self.kind {
            NodeKind::Expert(gp) => gp.log_likelihood(),
            _ => self
                .children()
                .iter()
                .fold(F::zero(), |acc, c| acc + c.log_likelihood()),
        }
    }

    /// Prior mean and variance (n, L) at `x`. The prior of a reduction is the mean of
    /// its children priors.
    pub fn prior_mean_var(&self, x: &ArrayView2<F>) -> Result<(Array2<F>, Array2<F>)> {
        match &self.kind {
            NodeKind::Expert(gp) => Ok(gp.prior_mean_var(x)?),
            NodeKind::PriorDivision { child, .. } => child.prior_mean_var(x),
            NodeKind::Reduction { children, .. } => {
                if children.is_empty() {
                    return Err(CommitteeError::InvalidValueError(format!(
                        "Reduction `{}` has no child",
                        self.name
                    )));
                }
                let priors = children
                    .iter()
                    .map(|c| c.prior_mean_var(x))
                    .collect::<Result<Vec<_>>>()?;
                let n = F::cast(priors.len());
                let (mut prior_mean, mut prior_var) = (
                    Array2::zeros(priors[0].0.dim()),
                    Array2::zeros(priors[0].1.dim()),
                );
                for (mean, var) in priors.iter() {
                    prior_mean += mean;
                    prior_var += var;
                }
                Ok((prior_mean / n, prior_var / n))
            }
        }
    }

    /// Posterior mean (n, L) and covariance (n, n) at `x`, only available for an expert
    pub fn posterior_mean_cov(&self, x: &ArrayView2<F>) -> Result<(Array2<F>, Array2<F>)> {
        match &self.kind {
            NodeKind::Expert(gp) => Ok(gp.posterior_mean_cov(x)?),
            _ => Err(CommitteeError::NotImplemented(format!(
                "Full covariance through {} node `{}`",
                self.kind_name(),
                self.name
            ))),
        }
    }

    /// Opinion of the node at `x`, the node being evaluated on its effective device given
    /// the effective device of its parent. Children are evaluated in parallel.
    pub fn opinion(
        &self,
        x: &ArrayView2<F>,
        cluster: &Cluster,
        parent: Option<&DeviceSpec>,
    ) -> Result<Opinion<F>> {
        let device = self.placement.resolve(parent);
        cluster.run(device.as_ref(), || self.evaluate(x, cluster, device.as_ref()))?
    }

    fn evaluate(
        &self,
        x: &ArrayView2<F>,
        cluster: &Cluster,
        device: Option<&DeviceSpec>,
    ) -> Result<Opinion<F>> {
        trace!(
            "Evaluate {} `{}` on {}",
            self.kind_name(),
            self.name,
            device.map_or("local".to_string(), |d| d.to_string())
        );
        match &self.kind {
            NodeKind::Expert(gp) => {
                let (mean, var) = gp.posterior_mean_var(x)?;
                let (prior_mean, prior_var) = gp.prior_mean_var(x)?;
                Ok(Opinion::expert(mean, var, prior_mean, prior_var))
            }
            NodeKind::Reduction {
                reduction,
                children,
            } => {
                let opinions = children
                    .par_iter()
                    .map(|c| c.opinion(x, cluster, device))
                    .collect::<Result<Vec<_>>>()?;
                reduction.combine(&opinions)
            }
            NodeKind::PriorDivision { weighting, child } => {
                let opinion = child.opinion(x, cluster, device)?;
                Ok(divide_prior(weighting, opinion))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::ClusterSpec;
    use approx::assert_abs_diff_eq;
    use distgp_gp::correlation_models::SquaredExponentialCorr;
    use distgp_gp::mean_models::ZeroMean;
    use distgp_gp::{Gpr, ParamTuning, ThetaTuning};
    use linfa::ParamGuard;
    use ndarray::{array, s, Array, Axis};

    type Node = CommitteeNode<f64, ZeroMean, SquaredExponentialCorr>;

    fn experts(n: usize) -> Vec<GaussianProcess<f64, ZeroMean, SquaredExponentialCorr>> {
        let x = Array::linspace(0., 4., 4 * n).insert_axis(Axis(1));
        let y = x.mapv(|v: f64| v.sin());
        let params = Gpr::params()
            .theta_tuning(ThetaTuning::Fixed(array![1.0]))
            .variance(ParamTuning::Fixed(1.0))
            .noise_variance(ParamTuning::Fixed(1e-2))
            .check()
            .unwrap();
        let chunks: Vec<_> = (0..n)
            .map(|i| (x.slice(s![4 * i..4 * (i + 1), ..]), y.slice(s![4 * i..4 * (i + 1), ..])))
            .collect();
        params.fit_shared(&chunks).unwrap()
    }

    fn tree() -> Node {
        let mut gps = experts(4).into_iter();
        let mut group = |name: &str| {
            let leaves = (0..2)
                .map(|i| Node::expert(&i.to_string(), gps.next().unwrap()))
                .collect();
            Node::reduction(name, Reduction::GPoE(Weighting::DifferentialEntropy), leaves)
        };
        let children = vec![group("0"), group("1")];
        Node::reduction("committee", Reduction::RBcm(Weighting::Ones), children)
    }

    #[test]
    fn test_nodes_and_names() {
        let tree = tree();
        let names: Vec<String> = tree.nodes().into_iter().map(|(n, _)| n).collect();
        assert_eq!(
            names,
            vec![
                "committee",
                "committee.0",
                "committee.0.0",
                "committee.0.1",
                "committee.1",
                "committee.1.0",
                "committee.1.1"
            ]
        );
        assert_eq!(tree.n_experts(), 4);
        assert_eq!(tree.nodes()[1].1.kind_name(), "gPoE(DifferentialEntropy)");
    }

    #[test]
    fn test_find_and_place() {
        let mut tree = tree();
        assert!(tree.find_mut("committee.2").is_none());
        assert!(tree.find_mut("other").is_none());
        tree.set_placement(Placement::pin("/job:ps/task:0").unwrap());
        tree.find_mut("committee.1")
            .unwrap()
            .set_placement(Placement::pin("/job:worker/task:1").unwrap());
        tree.find_mut("committee.1.0")
            .unwrap()
            .set_placement(Placement::pin("/device:CPU:0").unwrap());
        tree.find_mut("committee.0.1")
            .unwrap()
            .set_placement(Placement::Reset);

        let devices: Vec<(String, Option<String>)> = tree
            .effective_devices(None)
            .into_iter()
            .map(|(n, d)| (n, d.map(|d| d.to_string())))
            .collect();
        let expected = vec![
            ("committee", Some("/job:ps/task:0")),
            ("committee.0", Some("/job:ps/task:0")),
            ("committee.0.0", Some("/job:ps/task:0")),
            ("committee.0.1", None),
            ("committee.1", Some("/job:worker/task:1")),
            ("committee.1.0", Some("/job:worker/task:1/device:CPU:0")),
            ("committee.1.1", Some("/job:worker/task:1")),
        ];
        for ((name, device), (ename, edevice)) in devices.iter().zip(expected.iter()) {
            assert_eq!(name.as_str(), *ename);
            assert_eq!(device.as_deref(), *edevice);
        }
    }

    #[test]
    fn test_log_likelihood_is_sum() {
        let tree = tree();
        let expected: f64 = tree.experts().iter().map(|gp| gp.log_likelihood()).sum();
        assert_abs_diff_eq!(tree.log_likelihood(), expected, epsilon = 1e-12);
    }

    #[test]
    fn test_opinion_on_cluster_matches_local() {
        let x = array![[0.3], [1.7], [3.9]];
        let mut tree = tree();
        let local = tree.opinion(&x.view(), &Cluster::local(), None).unwrap();

        let spec = ClusterSpec::new()
            .with_job("worker", ["w0:2222", "w1:2222"])
            .with_job("ps", ["ps0:2222"]);
        let cluster = Cluster::new(&spec, 2, None).unwrap();
        tree.set_placement(Placement::pin("/job:ps").unwrap());
        tree.find_mut("committee.0.1")
            .unwrap()
            .set_placement(Placement::pin("/job:worker/task:1").unwrap());
        let remote = tree.opinion(&x.view(), &cluster, None).unwrap();
        assert_abs_diff_eq!(local.mean, remote.mean, epsilon = 1e-12);
        assert_abs_diff_eq!(local.var, remote.var, epsilon = 1e-12);

        // unknown task
        tree.set_placement(Placement::pin("/job:ps/task:3").unwrap());
        assert!(tree.opinion(&x.view(), &cluster, None).is_err());
    }

    #[test]
    fn test_prior_and_covariance() {
        let x = array![[0.3], [1.7]];
        let tree = tree();
        let (prior_mean, prior_var) = tree.prior_mean_var(&x.view()).unwrap();
        assert_abs_diff_eq!(prior_mean, Array2::<f64>::zeros((2, 1)));
        // kernel variance plus noise variance
        assert_abs_diff_eq!(prior_var, Array2::from_elem((2, 1), 1.01), epsilon = 1e-12);
        assert!(matches!(
            tree.posterior_mean_cov(&x.view()),
            Err(CommitteeError::NotImplemented(_))
        ));
        let leaf = tree.nodes()[2].1;
        assert_eq!(leaf.posterior_mean_cov(&x.view()).unwrap().1.dim(), (2, 2));
    }

    #[test]
    fn test_prior_division_of_expert() {
        let x = array![[0.3], [1.7]];
        let gp = experts(1).remove(0);
        let expert = Node::expert("0", gp.clone());
        let node = Node::prior_division("div", Weighting::Ones, expert);
        let opinion = node.opinion(&x.view(), &Cluster::local(), None).unwrap();
        let (mean, var) = gp.posterior_mean_var(&x).unwrap();
        assert_abs_diff_eq!(opinion.mean, mean, epsilon = 1e-12);
        assert_abs_diff_eq!(opinion.var, var, epsilon = 1e-12);
        assert_eq!(node.n_experts(), 1);
    }
}
