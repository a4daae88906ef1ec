//! Cluster description and the runtime evaluating committee nodes on its tasks.
//!
//! A [ClusterSpec] maps job names to the addresses of their tasks, it is usually read
//! from a json document such as:
//!
//! ```json
//! {"worker": ["w0:2222", "w1:2222"], "ps": ["ps0:2222"]}
//! ```
//!
//! A [Cluster] gives each task of the spec its own thread pool. Operations placed on
//! a device `/job:<job>/task:<i>` run in the pool of that task.
use crate::errors::{CommitteeError, Result};
use crate::placement::DeviceSpec;

use log::info;
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

/// Addresses of the tasks of each job of a cluster
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClusterSpec {
    jobs: BTreeMap<String, Vec<String>>,
}

impl ClusterSpec {
    /// Empty spec, that is a local in-process cluster
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) a job with the given task addresses
    pub fn with_job<S: Into<String>>(
        mut self,
        job: &str,
        addresses: impl IntoIterator<Item = S>,
    ) -> Self {
        self.jobs.insert(
            job.to_string(),
            addresses.into_iter().map(|a| a.into()).collect(),
        );
        self
    }

    /// Read and validate a spec from a json string
    pub fn from_json(json: &str) -> Result<Self> {
        let spec: ClusterSpec = serde_json::from_str(json)?;
        spec.validate()?;
        Ok(spec)
    }

    /// Read and validate a spec from a json file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        Self::from_json(&data)
    }

    /// Json representation of the spec
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Job names
    pub fn jobs(&self) -> impl Iterator<Item = &str> {
        self.jobs.keys().map(|k| k.as_str())
    }

    /// Number of tasks of `job` if it exists
    pub fn num_tasks(&self, job: &str) -> Option<usize> {
        self.jobs.get(job).map(|tasks| tasks.len())
    }

    /// Address of the given task of `job` if it exists
    pub fn task_address(&self, job: &str, task: usize) -> Option<&str> {
        self.jobs
            .get(job)
            .and_then(|tasks| tasks.get(task))
            .map(|a| a.as_str())
    }

    /// Whether the spec has no job
    pub fn is_local(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Check every job has at least one task and addresses are not empty
    pub fn validate(&self) -> Result<()> {
        for (job, tasks) in self.jobs.iter() {
            if job.is_empty() {
                return Err(CommitteeError::ClusterError(
                    "Job name should not be empty".to_string(),
                ));
            }
            if tasks.is_empty() {
                return Err(CommitteeError::ClusterError(format!(
                    "Job `{job}` should have at least one task"
                )));
            }
            if tasks.iter().any(|a| a.trim().is_empty()) {
                return Err(CommitteeError::ClusterError(format!(
                    "Job `{job}` has an empty task address"
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Display for ClusterSpec {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let jobs: Vec<String> = self
            .jobs
            .iter()
            .map(|(job, tasks)| format!("{job}: {}", tasks.join(", ")))
            .collect();
        write!(f, "{{{}}}", jobs.join("; "))
    }
}

/// Runtime of a cluster: one thread pool per task
pub struct Cluster {
    spec: ClusterSpec,
    pools: BTreeMap<(String, usize), ThreadPool>,
    target: Option<String>,
}

impl fmt::Debug for Cluster {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Cluster")
            .field("spec", &self.spec)
            .field("tasks", &self.pools.keys().collect::<Vec<_>>())
            .field("target", &self.target)
            .finish()
    }
}

impl Cluster {
    /// In-process cluster without any job: every operation runs on the caller
    pub fn local() -> Self {
        Cluster {
            spec: ClusterSpec::new(),
            pools: BTreeMap::new(),
            target: None,
        }
    }

    /// Start the runtime of the given cluster with `threads_per_task` threads for each task.
    /// The session target is the address of the `coordinator` task when given
    /// (task 0 when unspecified).
    pub fn new(
        spec: &ClusterSpec,
        threads_per_task: usize,
        coordinator: Option<&DeviceSpec>,
    ) -> Result<Self> {
        spec.validate()?;
        if threads_per_task == 0 {
            return Err(CommitteeError::ClusterError(
                "Number of threads per task should be greater than 0".to_string(),
            ));
        }
        let mut pools = BTreeMap::new();
        for (job, tasks) in spec.jobs.iter() {
            for task in 0..tasks.len() {
                let name = format!("{job}-{task}");
                let pool = ThreadPoolBuilder::new()
                    .num_threads(threads_per_task)
                    .thread_name(move |i| format!("{name}-{i}"))
                    .build()
                    .map_err(|err| CommitteeError::ClusterError(err.to_string()))?;
                pools.insert((job.clone(), task), pool);
            }
        }
        let target = match coordinator.and_then(|d| d.job.as_deref().map(|j| (j, d.task))) {
            Some((job, task)) => {
                let task = task.unwrap_or(0);
                let address = spec.task_address(job, task).ok_or_else(|| {
                    CommitteeError::PlacementError(format!(
                        "Unknown coordinator task /job:{job}/task:{task} in cluster {spec}"
                    ))
                })?;
                Some(format!("grpc://{address}"))
            }
            None => None,
        };
        info!(
            "Cluster started with {} tasks (target {})",
            pools.len(),
            target.as_deref().unwrap_or("local")
        );
        Ok(Cluster {
            spec: spec.clone(),
            pools,
            target,
        })
    }

    /// Spec this runtime was started from
    pub fn spec(&self) -> &ClusterSpec {
        &self.spec
    }

    /// Session target `grpc://<address>` of the coordinating task, `None` when local
    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    /// Run `op` on the task designated by `device`. Without device or job, `op` runs on
    /// the caller thread. A device naming a job without task runs on task 0.
    pub fn run<R, OP>(&self, device: Option<&DeviceSpec>, op: OP) -> Result<R>
    where
        R: Send,
        OP: FnOnce() -> R + Send,
    {
        match device.and_then(|d| d.job.as_ref().map(|job| (job, d.task.unwrap_or(0)))) {
            None => Ok(op()),
            Some((job, task)) => {
                let pool = self.pools.get(&(job.clone(), task)).ok_or_else(|| {
                    CommitteeError::PlacementError(format!(
                        "Unknown task /job:{job}/task:{task} in cluster {}",
                        self.spec
                    ))
                })?;
                Ok(pool.install(op))
            }
        }
    }
}

impl Drop for Cluster {
    fn drop(&mut self) {
        if !self.pools.is_empty() {
            info!(
                "Cluster stopped (target {})",
                self.target.as_deref().unwrap_or("local")
            );
        }
    }
}
