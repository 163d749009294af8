//! Container image specification types.

use serde::{Deserialize, Serialize};

/// Container image specification.
///
/// Represents a Docker image reference together with the policy that decides
/// when it gets pulled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerImage {
    /// Full image reference (registry/repository:tag@digest).
    reference: String,

    /// Image pull policy.
    pub pull_policy: ImagePullPolicy,
}

impl ContainerImage {
    /// Creates a new container image from a reference string.
    ///
    /// # Examples
    ///
    /// ```
    /// use multihost_orchestrator::container::ContainerImage;
    ///
    /// let image = ContainerImage::new("quay.io/coreos/etcd:v2.3.8");
    /// assert_eq!(image.reference(), "quay.io/coreos/etcd:v2.3.8");
    /// ```
    pub fn new(reference: impl Into<String>) -> Self {
        Self {
            reference: reference.into(),
            pull_policy: ImagePullPolicy::default(),
        }
    }

    /// Creates an image with a specific pull policy.
    pub fn with_pull_policy(mut self, policy: ImagePullPolicy) -> Self {
        self.pull_policy = policy;
        self
    }

    /// Returns the full image reference.
    pub fn reference(&self) -> &str {
        &self.reference
    }
}

/// Image pull policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImagePullPolicy {
    /// Always pull the image.
    Always,

    /// Pull if not present locally.
    #[default]
    IfNotPresent,

    /// Never pull (image must be present).
    Never,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pull_policy() {
        let image = ContainerImage::new("quay.io/coreos/flannel:v0.13.1-rc1");
        assert_eq!(image.reference(), "quay.io/coreos/flannel:v0.13.1-rc1");
        assert_eq!(image.pull_policy, ImagePullPolicy::IfNotPresent);

        let image = image.with_pull_policy(ImagePullPolicy::Never);
        assert_eq!(image.pull_policy, ImagePullPolicy::Never);
    }

    #[test]
    fn test_pull_policy_serde() {
        let policy: ImagePullPolicy = serde_json::from_str("\"Always\"").unwrap();
        assert_eq!(policy, ImagePullPolicy::Always);
    }
}
