//! This library implements committees of [Gaussian Process](distgp_gp) experts.
//!
//! Training data is split in contiguous chunks, one GP expert being conditioned on each chunk,
//! the experts sharing (or not, see [ExpertTraining]) their hyperparameters. At prediction, the
//! opinions (predictive means and variances) of the experts are combined by the nodes of a tree
//! of reductions (see [Reduction]):
//!
//! * product of experts (PoE) and generalized product of experts (gPoE),
//! * Bayesian committee machine (BCM) and robust BCM (rBCM), which correct the combined precision
//!   with the prior of the experts.
//!
//! Each node of the tree can be placed on a device of a cluster described by a [ClusterSpec]
//! (see [Placement] and [DeviceSpec]). The [Cluster] runtime gives one thread pool to each task of
//! the cluster and evaluates the nodes on the task they are placed on.
//! [DistributedRbcmParams] builds a multi-layer rBCM whose experts are spread over the tasks
//! of a worker job.
//!
//! # Example
//!
//! ```no_run
//! use distgp_committee::{Committee, Reduction, Weighting};
//! use distgp_gp::Gpr;
//! use linfa::prelude::*;
//! use linfa::ParamGuard;
//! use ndarray::{Array, Axis};
//!
//! let xt = Array::linspace(0., 10., 200).insert_axis(Axis(1));
//! let yt = xt.column(0).mapv(|v: f64| v.sin());
//!
//! let committee = Committee::params(Gpr::params().check().expect("valid GP params"))
//!     .n_experts(8)
//!     .reduction(Reduction::RBcm(Weighting::DifferentialEntropy))
//!     .fit(&Dataset::new(xt, yt))
//!     .expect("Committee fitted");
//!
//! let (mean, var) = committee
//!     .predict_valvar(&Array::linspace(0., 10., 20).insert_axis(Axis(1)))
//!     .expect("Committee prediction");
//! println!("{}", committee.summary());
//! ```
#![warn(missing_docs)]
#![warn(rustdoc::broken_intra_doc_links)]

mod cluster;
mod committee;
mod distributed;
mod errors;
mod placement;
mod reduction;
mod tree;
mod weights;

pub use cluster::{Cluster, ClusterSpec};
pub use committee::{
    Committee, CommitteeParams, CommitteeValidParams, ExpertTraining, COMMITTEE_ROOT_NAME,
};
pub use distributed::{DistributedRbcmParams, DistributedRbcmValidParams};
pub use errors::*;
pub use placement::{DeviceSpec, Placement};
pub use reduction::{divide_prior, mean_prior, Opinion, Reduction};
pub use tree::{CommitteeNode, NodeKind};
pub use weights::Weighting;
