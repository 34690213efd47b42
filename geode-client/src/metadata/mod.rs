//! Partition metadata used for single-hop routing.

mod client_metadata;
mod service;

pub use client_metadata::{
    group_by_server_to_buckets, prune_nodes, BucketLocationAdvisor, BucketSet, ClientMetadata,
    ServerToBucketsMap,
};
pub use service::{ClientMetadataService, MetadataFetcher, PartitionAttributes};
