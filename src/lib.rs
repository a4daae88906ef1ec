//! Gaussian process regression and committees of GP experts distributed over a cluster.
//!
//! This crate gathers:
//!
//! * [gp]: exact GP regression with hyperparameters estimated by maximizing the marginal
//!   log likelihood, possibly shared by several chunks of data,
//! * [committee]: committees of GP experts (PoE, gPoE, BCM, rBCM) organized as trees of
//!   reductions whose nodes are evaluated on the tasks of a cluster.
//!
//! # Example
//!
//! ```no_run
//! use distgp::prelude::*;
//! use linfa::prelude::*;
//! use ndarray::{array, Array, Axis};
//!
//! let xt = Array::linspace(0., 10., 400).insert_axis(Axis(1));
//! let yt = xt.column(0).mapv(|v: f64| v.sin());
//!
//! let spec = ClusterSpec::from_json(
//!     r#"{"worker": ["w0:2222", "w1:2222"], "ps": ["ps0:2222"]}"#,
//! ).expect("cluster spec");
//! let gp_params = Gpr::params().check().expect("valid GP params");
//! let committee = DistributedRbcmParams::new(gp_params, vec![2, 4], spec)
//!     .fit(&Dataset::new(xt, yt))
//!     .expect("Committee fitted");
//!
//! let (mean, var) = committee.predict_valvar(&array![[2.5], [7.5]]).expect("prediction");
//! println!("{}", committee.summary());
//! ```
#![warn(missing_docs)]

pub use distgp_committee as committee;
pub use distgp_gp as gp;

/// Common types
pub mod prelude {
    pub use distgp_committee::{
        ClusterSpec, Committee, CommitteeError, CommitteeNode, CommitteeParams, DeviceSpec,
        DistributedRbcmParams, ExpertTraining, Placement, Reduction, Weighting,
    };
    pub use distgp_gp::correlation_models::SquaredExponentialCorr;
    pub use distgp_gp::mean_models::{ConstantMean, ZeroMean};
    pub use distgp_gp::{GaussianProcess, GpError, Gpr, ParamTuning, ThetaTuning};
    pub use linfa::ParamGuard;
}

#[cfg(test)]
mod tests {
    use super::prelude::*;
    use approx::assert_abs_diff_eq;
    use linfa::prelude::{Dataset, Fit};
    use ndarray::{array, Array, Axis};

    #[test]
    fn test_committee_of_one_expert_is_the_gp() {
        let env = env_logger::Env::new().filter_or("DISTGP_LOG", "info");
        let _ = env_logger::Builder::from_env(env).is_test(true).try_init();
        let xt = Array::linspace(0., 4., 12).insert_axis(Axis(1));
        let yt = xt.column(0).mapv(|v: f64| (2. * v).cos());
        let dataset = Dataset::new(xt, yt);
        let gp_params = Gpr::params()
            .theta_tuning(ThetaTuning::Fixed(array![1.5]))
            .variance(ParamTuning::Fixed(1.0))
            .noise_variance(ParamTuning::Fixed(1e-4))
            .check()
            .unwrap();
        let gp = gp_params.fit(&dataset).unwrap();
        let spec = ClusterSpec::new()
            .with_job("worker", ["localhost:2222"])
            .with_job("ps", ["localhost:2223"]);
        let committee = DistributedRbcmParams::new(gp_params, vec![1], spec)
            .weighting(Weighting::Ones)
            .fit(&dataset)
            .unwrap();

        let x = array![[0.3], [1.7], [3.9]];
        let (gp_mean, gp_var) = gp.posterior_mean_var(&x).unwrap();
        let (mean, var) = committee.predict_valvar(&x).unwrap();
        assert_abs_diff_eq!(mean, gp_mean, epsilon = 1e-8);
        assert_abs_diff_eq!(var, gp_var, epsilon = 1e-8);
    }
}
