//! Managed-Kubernetes resource kinds and their vendor status labels.

mod addon;
mod attachment;
mod cluster;
mod encryption;
mod endpoint;
mod endpoint_vip;
mod log_agent;
mod node_pool;

pub use addon::{Addon, AddonSpec};
pub use attachment::{AttachmentSpec, ClusterAttachment};
pub use cluster::{Cluster, ClusterSpec};
pub use encryption::{EncryptionProtection, EncryptionSpec};
pub use endpoint::{ClusterEndpoint, EndpointAccess, EndpointSpec};
pub use endpoint_vip::{ClusterEndpointVip, EndpointVipSpec};
pub use log_agent::{LogAgent, LogAgentSpec};
pub use node_pool::{NodePool, NodePoolSpec};
