//! Per-pool service keeping the bucket maps of partitioned regions fresh.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use geode_core::protocol::BucketServerLocation;
use geode_core::{CacheableKey, Result, ServerLocation};
use tokio::sync::{mpsc, watch};

use super::client_metadata::{group_by_server_to_buckets, BucketSet, ClientMetadata, ServerToBucketsMap};

/// Partitioning attributes of a region as reported by a server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionAttributes {
    /// Number of buckets.
    pub total_num_buckets: i32,
    /// Region this one is colocated with.
    pub colocated_with: Option<String>,
}

/// Fetches metadata from the servers; implemented by the pool.
#[async_trait]
pub trait MetadataFetcher: Send + Sync {
    /// Returns the partitioning attributes of `region`, `None` if it is not
    /// partitioned.
    async fn partition_attributes(&self, region: &str) -> Result<Option<PartitionAttributes>>;

    /// Returns every bucket owner of `region`.
    async fn bucket_locations(&self, region: &str) -> Result<Vec<BucketServerLocation>>;
}

/// Keeps bucket ownership per region and answers routing lookups.
///
/// Lookups never block on I/O: a missing or stale map is queued for refresh
/// and the caller routes through any server meanwhile.
#[derive(Debug)]
pub struct ClientMetadataService {
    metadata: RwLock<HashMap<String, Arc<ClientMetadata>>>,
    attributes: RwLock<HashMap<String, Option<PartitionAttributes>>>,
    pending: Mutex<HashSet<String>>,
    refresh_tx: mpsc::UnboundedSender<String>,
    bucket_timeouts: Mutex<HashMap<String, HashMap<i32, Instant>>>,
    bucket_wait_timeout: Duration,
    server_group: String,
}

impl ClientMetadataService {
    /// Creates the service and the receiving end of its refresh queue.
    pub fn new(
        server_group: impl Into<String>,
        bucket_wait_timeout: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<String>) {
        let (refresh_tx, refresh_rx) = mpsc::unbounded_channel();
        let service = Self {
            metadata: RwLock::new(HashMap::new()),
            attributes: RwLock::new(HashMap::new()),
            pending: Mutex::new(HashSet::new()),
            refresh_tx,
            bucket_timeouts: Mutex::new(HashMap::new()),
            bucket_wait_timeout,
            server_group: server_group.into(),
        };
        (service, refresh_rx)
    }

    /// Returns the metadata of `region`, if known.
    pub fn get_client_metadata(&self, region: &str) -> Option<Arc<ClientMetadata>> {
        self.metadata
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(region)
            .cloned()
    }

    /// Installs metadata for its region.
    pub fn insert_metadata(&self, metadata: ClientMetadata) {
        let region = metadata.region().to_string();
        self.metadata
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(region, Arc::new(metadata));
    }

    /// Returns true if `region` is known not to be partitioned.
    pub fn is_known_unpartitioned(&self, region: &str) -> bool {
        matches!(
            self.attributes
                .read()
                .unwrap_or_else(|e| e.into_inner())
                .get(region),
            Some(None)
        )
    }

    /// Returns the server to send a request for `key_hash` to: the primary
    /// when `is_primary`, any owner otherwise.
    ///
    /// Unknown metadata queues a refresh and returns `None`.
    pub fn get_bucket_server_location(
        &self,
        region: &str,
        key_hash: i32,
        is_primary: bool,
    ) -> Option<BucketServerLocation> {
        let Some(metadata) = self.get_client_metadata(region) else {
            if !self.is_known_unpartitioned(region) {
                self.enqueue_for_metadata_refresh(region);
            }
            return None;
        };
        let bucket_id = metadata.bucket_id_for(key_hash);
        if is_primary && self.is_bucket_marked_for_timeout(region, bucket_id) {
            return None;
        }
        metadata.server_location(bucket_id, is_primary).cloned()
    }

    /// Queues `region` for refresh; repeated calls before the refresh runs
    /// are coalesced.
    pub fn enqueue_for_metadata_refresh(&self, region: &str) {
        let newly_queued = self
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(region.to_string());
        if newly_queued {
            tracing::debug!(region = %region, "metadata refresh queued");
            if self.refresh_tx.send(region.to_string()).is_err() {
                self.pending
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .remove(region);
            }
        }
    }

    /// Drops `location` from every bucket of every region.
    ///
    /// A bucket whose only owner was `location` becomes unowned; routing for
    /// it falls back to any server until the next refresh, which is queued.
    pub fn remove_bucket_server_location(&self, location: &ServerLocation) {
        let affected: Vec<String> = {
            let mut maps = self.metadata.write().unwrap_or_else(|e| e.into_inner());
            let mut affected = Vec::new();
            for (region, metadata) in maps.iter_mut() {
                if metadata.servers().contains(location) {
                    Arc::make_mut(metadata).remove_location(location);
                    affected.push(region.clone());
                }
            }
            affected
        };
        for region in affected {
            tracing::debug!(region = %region, server = %location, "removed server from bucket map");
            self.enqueue_for_metadata_refresh(&region);
        }
    }

    /// Marks the primary bucket of `key_hash` so single-hop routing skips it
    /// for the bucket wait timeout. A zero timeout disables marking.
    pub fn mark_bucket_for_timeout(&self, region: &str, bucket_id: i32) {
        if self.bucket_wait_timeout.is_zero() {
            return;
        }
        self.bucket_timeouts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(region.to_string())
            .or_default()
            .insert(bucket_id, Instant::now() + self.bucket_wait_timeout);
    }

    /// Returns true if `bucket_id` of `region` is still marked.
    pub fn is_bucket_marked_for_timeout(&self, region: &str, bucket_id: i32) -> bool {
        if self.bucket_wait_timeout.is_zero() {
            return false;
        }
        let mut timeouts = self
            .bucket_timeouts
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        let Some(buckets) = timeouts.get_mut(region) else {
            return false;
        };
        match buckets.get(&bucket_id) {
            Some(until) if Instant::now() < *until => true,
            Some(_) => {
                buckets.remove(&bucket_id);
                false
            }
            None => false,
        }
    }

    /// Groups every bucket of `region` by server.
    pub fn group_by_server_to_all_buckets(
        &self,
        region: &str,
        optimize_for_write: bool,
    ) -> Option<ServerToBucketsMap> {
        let Some(metadata) = self.get_client_metadata(region) else {
            self.enqueue_for_metadata_refresh(region);
            return None;
        };
        let buckets: BucketSet = (0..metadata.total_num_buckets()).collect();
        group_by_server_to_buckets(metadata.as_ref(), &buckets, optimize_for_write)
    }

    /// Groups `keys` by the server owning their bucket.
    ///
    /// Keys whose bucket has no known owner are spread over the mapped
    /// servers. Returns `None` when no key can be mapped, in which case all
    /// keys go to one server.
    pub fn get_server_to_filter_map<K: CacheableKey>(
        &self,
        keys: &[K],
        region: &str,
        is_primary: bool,
    ) -> Option<HashMap<ServerLocation, Vec<K>>> {
        let metadata = match self.get_client_metadata(region) {
            Some(metadata) => metadata,
            None => {
                if !self.is_known_unpartitioned(region) {
                    self.enqueue_for_metadata_refresh(region);
                }
                return None;
            }
        };

        let mut map: HashMap<ServerLocation, Vec<K>> = HashMap::new();
        let mut bucket_servers: HashMap<i32, ServerLocation> = HashMap::new();
        let mut left = Vec::new();
        for key in keys {
            let bucket_id = metadata.bucket_id_for(key.hashcode());
            let server = match bucket_servers.get(&bucket_id) {
                Some(server) => server.clone(),
                None => match metadata.server_location(bucket_id, is_primary) {
                    Some(location) => {
                        bucket_servers.insert(bucket_id, location.location.clone());
                        location.location.clone()
                    }
                    None => {
                        left.push(key.clone());
                        continue;
                    }
                },
            };
            map.entry(server).or_default().push(key.clone());
        }

        if map.is_empty() {
            return None;
        }
        if !left.is_empty() {
            let servers: BTreeSet<ServerLocation> = map.keys().cloned().collect();
            let per_server = left.len() / servers.len() + 1;
            let mut remaining = left.into_iter();
            for server in servers {
                let chunk: Vec<K> = remaining.by_ref().take(per_server).collect();
                if chunk.is_empty() {
                    break;
                }
                if let Some(list) = map.get_mut(&server) {
                    list.extend(chunk);
                }
            }
        }
        Some(map)
    }

    /// Fetches fresh metadata for `region` through `fetcher`.
    pub async fn refresh(&self, fetcher: &dyn MetadataFetcher, region: &str) -> Result<()> {
        let known = self
            .attributes
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(region)
            .cloned();
        let attributes = match known {
            Some(attributes) => attributes,
            None => {
                let fetched = fetcher.partition_attributes(region).await?;
                self.attributes
                    .write()
                    .unwrap_or_else(|e| e.into_inner())
                    .insert(region.to_string(), fetched.clone());
                fetched
            }
        };
        let Some(attributes) = attributes else {
            tracing::debug!(region = %region, "region is not partitioned");
            return Ok(());
        };

        let source = attributes.colocated_with.as_deref().unwrap_or(region);
        let locations = fetcher.bucket_locations(source).await?;
        let mut by_bucket: HashMap<i32, Vec<BucketServerLocation>> = HashMap::new();
        for location in locations {
            by_bucket.entry(location.bucket_id).or_default().push(location);
        }

        let mut metadata = ClientMetadata::new(
            region,
            attributes.total_num_buckets,
            attributes.colocated_with.clone(),
        );
        for (bucket_id, locations) in by_bucket {
            metadata.update_bucket(bucket_id, locations, &self.server_group);
        }
        tracing::debug!(
            region = %region,
            buckets = attributes.total_num_buckets,
            servers = metadata.servers().len(),
            "metadata refreshed"
        );
        if let Some(parent) = &attributes.colocated_with {
            if self.get_client_metadata(parent).is_none() {
                self.insert_metadata(metadata.for_region(parent.clone(), None));
            }
        }
        self.insert_metadata(metadata);
        Ok(())
    }

    /// Drains the refresh queue until `shutdown` flips.
    pub async fn run_refresh_worker(
        self: Arc<Self>,
        fetcher: Arc<dyn MetadataFetcher>,
        mut queue: mpsc::UnboundedReceiver<String>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            let region = tokio::select! {
                region = queue.recv() => match region {
                    Some(region) => region,
                    None => break,
                },
                _ = shutdown.changed() => break,
            };
            self.pending
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&region);
            if let Err(e) = self.refresh(fetcher.as_ref(), &region).await {
                tracing::warn!(region = %region, error = %e, "metadata refresh failed");
            }
        }
        tracing::debug!("metadata refresh worker stopped");
    }
}
