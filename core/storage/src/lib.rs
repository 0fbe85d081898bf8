//! Object storage client for buckets provisioned through COSI.
//!
//! A workload reads the bucket-info document mounted by the COSI node
//! adapter, hands it to [`create_backend`], and gets back one backend
//! implementing [`ObjectBackend`]. Which backend is built depends on the
//! declared protocols: S3 takes priority over Azure.
//!
//! # Design Principles
//! - Backend isolation: consumers only see the `ObjectBackend` trait
//! - Fail fast: inconsistent bucket info is rejected before any client exists
//! - Lazy connectivity: construction never touches the network
//! - Caller-driven cancellation: every operation honors an [`OpContext`]

pub mod azure;
pub mod config;
pub mod context;
pub mod provider;
pub mod registry;
pub mod s3;
mod transfer;

pub use azure::AzureBackend;
pub use config::{AuthenticationType, AzureSecret, BucketInfo, S3Secret, DEFAULT_BUCKET_INFO_PATH};
pub use context::OpContext;
pub use provider::{stream_from_bytes, stream_from_reader, ByteSink, ByteStream, ObjectBackend};
pub use registry::{create_backend, create_default_registry, BackendConstructor, BackendRegistry};
pub use s3::S3Backend;
