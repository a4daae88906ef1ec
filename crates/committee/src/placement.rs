use crate::errors::{CommitteeError, Result};
#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A (partial) device specification such as `/job:worker/replica:0/task:1/device:GPU:0`
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub struct DeviceSpec {
    /// Job name
    pub job: Option<String>,
    /// Replica index
    pub replica: Option<usize>,
    /// Task index within the job
    pub task: Option<usize>,
    /// Device type, upper case (CPU, GPU)
    pub device_type: Option<String>,
    /// Device index, `None` meaning any device of the given type
    pub device_index: Option<usize>,
}

impl DeviceSpec {
    /// Device of the given task of a job
    pub fn task(job: &str, task: usize) -> Self {
        DeviceSpec {
            job: Some(job.to_string()),
            task: Some(task),
            ..Default::default()
        }
    }

    /// Whether no field is specified
    pub fn is_empty(&self) -> bool {
        self == &DeviceSpec::default()
    }

    /// Merge `other` onto this device: fields specified by `other` override ours,
    /// unspecified ones are kept.
    pub fn merge(&self, other: &DeviceSpec) -> DeviceSpec {
        let (device_type, device_index) = if other.device_type.is_some() {
            (other.device_type.clone(), other.device_index)
        } else {
            (
                self.device_type.clone(),
                other.device_index.or(self.device_index),
            )
        };
        DeviceSpec {
            job: other.job.clone().or_else(|| self.job.clone()),
            replica: other.replica.or(self.replica),
            task: other.task.or(self.task),
            device_type,
            device_index,
        }
    }
}

fn parse_index(segment: &str, value: &str) -> Result<usize> {
    value.parse().map_err(|_| {
        CommitteeError::PlacementError(format!("Bad index `{value}` in device segment `{segment}`"))
    })
}

impl FromStr for DeviceSpec {
    type Err = CommitteeError;

    fn from_str(s: &str) -> Result<Self> {
        let mut spec = DeviceSpec::default();
        for segment in s.split('/').filter(|seg| !seg.is_empty()) {
            let parts: Vec<&str> = segment.split(':').collect();
            match parts.as_slice() {
                ["job", job] if !job.is_empty() => spec.job = Some(job.to_string()),
                ["replica", r] => spec.replica = Some(parse_index(segment, r)?),
                ["task", t] => spec.task = Some(parse_index(segment, t)?),
                ["device", kind] => {
                    spec.device_type = Some(kind.to_uppercase());
                    spec.device_index = None;
                }
                ["device", kind, "*"] => {
                    spec.device_type = Some(kind.to_uppercase());
                    spec.device_index = None;
                }
                ["device", kind, index] => {
                    spec.device_type = Some(kind.to_uppercase());
                    spec.device_index = Some(parse_index(segment, index)?);
                }
                // legacy short forms `/cpu:0`, `/gpu:1`
                [kind, index] if kind.eq_ignore_ascii_case("cpu") || kind.eq_ignore_ascii_case("gpu") => {
                    spec.device_type = Some(kind.to_uppercase());
                    spec.device_index = if *index == "*" {
                        None
                    } else {
                        Some(parse_index(segment, index)?)
                    };
                }
                _ => {
                    return Err(CommitteeError::PlacementError(format!(
                        "Unknown device segment `{segment}` in `{s}`"
                    )))
                }
            }
        }
        Ok(spec)
    }
}

impl fmt::Display for DeviceSpec {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if let Some(job) = &self.job {
            write!(f, "/job:{job}")?;
        }
        if let Some(replica) = self.replica {
            write!(f, "/replica:{replica}")?;
        }
        if let Some(task) = self.task {
            write!(f, "/task:{task}")?;
        }
        if let Some(kind) = &self.device_type {
            match self.device_index {
                Some(index) => write!(f, "/device:{kind}:{index}")?,
                None => write!(f, "/device:{kind}:*")?,
            }
        }
        Ok(())
    }
}

/// Placement of a committee node
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub enum Placement {
    /// Use the device of the parent node
    #[default]
    Inherit,
    /// Clear the device inherited from the parent node
    Reset,
    /// Merge the given device onto the device of the parent node
    Pin(DeviceSpec),
}

impl Placement {
    /// Pin to a device given as a string
    pub fn pin(device: &str) -> Result<Self> {
        Ok(Placement::Pin(device.parse()?))
    }

    /// Effective device given the effective device of the parent node
    pub fn resolve(&self, parent: Option<&DeviceSpec>) -> Option<DeviceSpec> {
        match self {
            Placement::Inherit => parent.cloned(),
            Placement::Reset => None,
            Placement::Pin(device) => Some(match parent {
                Some(p) => p.merge(device),
                None => device.clone(),
            }),
        }
    }
}

impl fmt::Display for Placement {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Placement::Inherit => write!(f, "inherit"),
            Placement::Reset => write!(f, "no device"),
            Placement::Pin(device) => write!(f, "{device}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_device() {
        let spec: DeviceSpec = "/job:worker/replica:0/task:1/device:GPU:0".parse().unwrap();
        assert_eq!(spec.job.as_deref(), Some("worker"));
        assert_eq!(spec.replica, Some(0));
        assert_eq!(spec.task, Some(1));
        assert_eq!(spec.device_type.as_deref(), Some("GPU"));
        assert_eq!(spec.device_index, Some(0));
        assert_eq!(spec.to_string(), "/job:worker/replica:0/task:1/device:GPU:0");
    }

    #[test]
    fn test_parse_partial_devices() {
        let spec: DeviceSpec = "/job:ps".parse().unwrap();
        assert_eq!(spec, DeviceSpec {
            job: Some("ps".to_string()),
            ..Default::default()
        });
        let cpu: DeviceSpec = "/cpu:0".parse().unwrap();
        assert_eq!(cpu.to_string(), "/device:CPU:0");
        assert_eq!(cpu, "/device:CPU:0".parse().unwrap());
        let any_gpu: DeviceSpec = "/device:gpu:*".parse().unwrap();
        assert_eq!(any_gpu.to_string(), "/device:GPU:*");
        assert!("".parse::<DeviceSpec>().unwrap().is_empty());
    }

    #[test]
    fn test_parse_errors() {
        assert!("/job:worker/task:x".parse::<DeviceSpec>().is_err());
        assert!("/spoon:1".parse::<DeviceSpec>().is_err());
        assert!("/job:".parse::<DeviceSpec>().is_err());
    }

    #[test]
    fn test_merge() {
        let worker: DeviceSpec = "/job:worker".parse().unwrap();
        let gpu: DeviceSpec = "/device:GPU:0".parse().unwrap();
        let spoon: DeviceSpec = "/job:spoon".parse().unwrap();
        let merged = worker.merge(&gpu);
        assert_eq!(merged.to_string(), "/job:worker/device:GPU:0");
        assert_eq!(merged.merge(&spoon).to_string(), "/job:spoon/device:GPU:0");
        assert_eq!(worker.merge(&"/job:ps".parse().unwrap()).to_string(), "/job:ps");
    }

    #[test]
    fn test_placement_resolution() {
        let parent: DeviceSpec = "/job:worker/task:2".parse().unwrap();
        assert_eq!(Placement::Inherit.resolve(Some(&parent)), Some(parent.clone()));
        assert_eq!(Placement::Inherit.resolve(None), None);
        assert_eq!(Placement::Reset.resolve(Some(&parent)), None);
        let pinned = Placement::pin("/device:CPU:1").unwrap();
        assert_eq!(
            pinned.resolve(Some(&parent)).unwrap().to_string(),
            "/job:worker/task:2/device:CPU:1"
        );
        assert_eq!(pinned.resolve(None).unwrap().to_string(), "/device:CPU:1");
    }
}
