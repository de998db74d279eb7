//! Read-only mock Kubernetes API server for testing.
//!
//! Serves version, discovery, and GET/LIST of a fixed set of objects over
//! HTTP, reachable through a generated kubeconfig.

pub mod discovery;
mod helpers;
pub mod http;

pub use discovery::{DiscoveryMode, MockApiResource, MockDiscovery};
pub use http::{HttpMockK8sServer, RunningHttpMockK8sServer};
