//! Bucket ownership of one partitioned region, and the pure grouping
//! functions built on it.

use std::collections::{BTreeSet, HashMap};

use geode_core::protocol::BucketServerLocation;
use geode_core::ServerLocation;
use rand::seq::SliceRandom;

/// A set of bucket ids.
pub type BucketSet = BTreeSet<i32>;

/// Servers mapped to the buckets each should be asked for.
pub type ServerToBucketsMap = HashMap<ServerLocation, BucketSet>;

/// Source of bucket ownership advice.
pub trait BucketLocationAdvisor {
    /// Returns every server hosting `bucket_id`, primary first.
    fn advise_server_locations(&self, bucket_id: i32) -> Vec<ServerLocation>;

    /// Returns the server hosting the primary copy of `bucket_id`.
    fn advise_primary_server_location(&self, bucket_id: i32) -> Option<ServerLocation>;
}

/// Bucket ownership of one partitioned region.
#[derive(Debug, Clone)]
pub struct ClientMetadata {
    region: String,
    total_num_buckets: i32,
    colocated_with: Option<String>,
    buckets: Vec<Vec<BucketServerLocation>>,
}

impl ClientMetadata {
    /// Creates metadata with `total_num_buckets` buckets and no known owner.
    pub fn new(
        region: impl Into<String>,
        total_num_buckets: i32,
        colocated_with: Option<String>,
    ) -> Self {
        let total_num_buckets = total_num_buckets.max(1);
        Self {
            region: region.into(),
            total_num_buckets,
            colocated_with,
            buckets: vec![Vec::new(); total_num_buckets as usize],
        }
    }

    /// Returns the region name.
    pub fn region(&self) -> &str {
        &self.region
    }

    /// Returns the number of buckets.
    pub fn total_num_buckets(&self) -> i32 {
        self.total_num_buckets
    }

    /// Returns the region this one is colocated with.
    pub fn colocated_with(&self) -> Option<&str> {
        self.colocated_with.as_deref()
    }

    /// Maps a key hash to its bucket.
    pub fn bucket_id_for(&self, key_hash: i32) -> i32 {
        (key_hash % self.total_num_buckets).abs()
    }

    /// Replaces the owners of `bucket_id`.
    ///
    /// Servers outside `server_group` are dropped; primaries are stored
    /// first, each half shuffled so reads spread over replicas.
    pub fn update_bucket(
        &mut self,
        bucket_id: i32,
        locations: Vec<BucketServerLocation>,
        server_group: &str,
    ) {
        if bucket_id < 0 || bucket_id >= self.total_num_buckets {
            tracing::debug!(region = %self.region, bucket_id, "ignoring out of range bucket");
            return;
        }
        let (mut primaries, mut secondaries): (Vec<_>, Vec<_>) = locations
            .into_iter()
            .filter(|l| l.in_group(server_group))
            .partition(|l| l.is_primary);
        let mut rng = rand::thread_rng();
        primaries.shuffle(&mut rng);
        secondaries.shuffle(&mut rng);
        primaries.extend(secondaries);
        self.buckets[bucket_id as usize] = primaries;
    }

    /// Returns the owners of `bucket_id`, primaries first.
    pub fn locations(&self, bucket_id: i32) -> &[BucketServerLocation] {
        usize::try_from(bucket_id)
            .ok()
            .and_then(|i| self.buckets.get(i))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Picks a server for `bucket_id`: the primary when `is_primary`, any
    /// owner otherwise.
    pub fn server_location(&self, bucket_id: i32, is_primary: bool) -> Option<&BucketServerLocation> {
        let locations = self.locations(bucket_id);
        if is_primary {
            locations.first().filter(|l| l.is_primary)
        } else {
            locations.choose(&mut rand::thread_rng())
        }
    }

    /// Removes `location` from every bucket; returns true if it owned any.
    pub fn remove_location(&mut self, location: &ServerLocation) -> bool {
        let mut removed = false;
        for bucket in &mut self.buckets {
            let before = bucket.len();
            bucket.retain(|l| &l.location != location);
            removed |= bucket.len() != before;
        }
        removed
    }

    /// Returns every server owning at least one bucket.
    pub fn servers(&self) -> BTreeSet<ServerLocation> {
        self.buckets
            .iter()
            .flatten()
            .map(|l| l.location.clone())
            .collect()
    }

    /// Returns a copy registered under another region name, used for
    /// colocated regions.
    pub fn for_region(&self, region: impl Into<String>, colocated_with: Option<String>) -> Self {
        Self {
            region: region.into(),
            colocated_with,
            ..self.clone()
        }
    }
}

impl BucketLocationAdvisor for ClientMetadata {
    fn advise_server_locations(&self, bucket_id: i32) -> Vec<ServerLocation> {
        self.locations(bucket_id)
            .iter()
            .map(|l| l.location.clone())
            .collect()
    }

    fn advise_primary_server_location(&self, bucket_id: i32) -> Option<ServerLocation> {
        self.server_location(bucket_id, true)
            .map(|l| l.location.clone())
    }
}

/// Maps every candidate server of `buckets` to the buckets it can serve.
///
/// Returns `None` if any bucket has no candidate at all, in which case the
/// caller must fall back to routing through any server.
pub fn prune_nodes(
    advisor: &dyn BucketLocationAdvisor,
    buckets: &BucketSet,
) -> Option<ServerToBucketsMap> {
    let mut map = ServerToBucketsMap::new();
    for &bucket_id in buckets {
        let locations = advisor.advise_server_locations(bucket_id);
        if locations.is_empty() {
            tracing::debug!(bucket_id, "no server for bucket, pruning gives up");
            return None;
        }
        for location in locations {
            map.entry(location).or_default().insert(bucket_id);
        }
    }
    Some(map)
}

/// Groups `buckets` by the server each should be sent to.
///
/// For writes every bucket goes to its primary; buckets without a known
/// primary are added to one of the mapped servers, which forwards them.
/// For reads the candidates from [`prune_nodes`] are reduced to a small
/// covering set, greedily taking the server that serves the most
/// uncovered buckets.
pub fn group_by_server_to_buckets(
    advisor: &dyn BucketLocationAdvisor,
    buckets: &BucketSet,
    optimize_for_write: bool,
) -> Option<ServerToBucketsMap> {
    if optimize_for_write {
        let mut map = ServerToBucketsMap::new();
        let mut without_primary = Vec::new();
        for &bucket_id in buckets {
            match advisor.advise_primary_server_location(bucket_id) {
                Some(location) => {
                    map.entry(location).or_default().insert(bucket_id);
                }
                None => without_primary.push(bucket_id),
            }
        }
        let first = map.keys().min().cloned()?;
        if let Some(set) = map.get_mut(&first) {
            set.extend(without_primary);
        }
        return Some(map);
    }

    let mut candidates = prune_nodes(advisor, buckets)?;
    let mut covered = BucketSet::new();
    let mut result = ServerToBucketsMap::new();
    while covered.len() < buckets.len() {
        let best = candidates
            .iter()
            .map(|(server, set)| (set.difference(&covered).count(), server))
            .filter(|(gain, _)| *gain > 0)
            .max_by(|a, b| a.0.cmp(&b.0).then_with(|| b.1.cmp(a.1)))
            .map(|(_, server)| server.clone());
        let Some(server) = best else {
            break;
        };
        if let Some(set) = candidates.remove(&server) {
            let fresh: BucketSet = set.difference(&covered).copied().collect();
            covered.extend(fresh.iter().copied());
            result.insert(server, fresh);
        }
    }
    Some(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server(port: u16) -> ServerLocation {
        ServerLocation::new("10.0.0.1", port)
    }

    fn bucket(port: u16, id: i32, primary: bool) -> BucketServerLocation {
        BucketServerLocation::new(server(port), id, primary, 1)
    }

    fn metadata() -> ClientMetadata {
        let mut md = ClientMetadata::new("orders", 4, None);
        md.update_bucket(0, vec![bucket(1, 0, true), bucket(2, 0, false)], "");
        md.update_bucket(1, vec![bucket(2, 1, true), bucket(1, 1, false)], "");
        md.update_bucket(2, vec![bucket(3, 2, true)], "");
        md
    }

    #[test]
    fn test_bucket_id_is_non_negative() {
        let md = ClientMetadata::new("r", 113, None);
        assert_eq!(md.bucket_id_for(-5), 5);
        assert_eq!(md.bucket_id_for(226), 0);
        assert!(md.bucket_id_for(i32::MIN) < 113);
    }

    #[test]
    fn test_primary_listed_first() {
        let mut md = ClientMetadata::new("r", 1, None);
        md.update_bucket(
            0,
            vec![bucket(2, 0, false), bucket(3, 0, false), bucket(1, 0, true)],
            "",
        );
        assert_eq!(md.locations(0)[0].location, server(1));
        assert_eq!(md.server_location(0, true).unwrap().location, server(1));
        assert!(md.server_location(0, false).is_some());
    }

    #[test]
    fn test_server_group_filter() {
        let mut md = ClientMetadata::new("r", 1, None);
        md.update_bucket(
            0,
            vec![
                bucket(1, 0, true).with_server_groups(vec!["east".into()]),
                bucket(2, 0, false).with_server_groups(vec!["west".into()]),
            ],
            "west",
        );
        assert_eq!(md.locations(0).len(), 1);
        assert!(md.server_location(0, true).is_none());
    }

    #[test]
    fn test_prune_nodes_disjoint_single_candidates() {
        let mut md = ClientMetadata::new("r", 2, None);
        md.update_bucket(0, vec![bucket(1, 0, true)], "");
        md.update_bucket(1, vec![bucket(2, 1, true)], "");
        let buckets: BucketSet = [0, 1].into_iter().collect();
        let pruned = prune_nodes(&md, &buckets).unwrap();
        assert_eq!(pruned.len(), 2);
        assert!(pruned[&server(1)].contains(&0));
        assert!(pruned[&server(2)].contains(&1));
    }

    #[test]
    fn test_prune_nodes_is_union_of_candidates() {
        let buckets: BucketSet = [0, 1, 2].into_iter().collect();
        let pruned = prune_nodes(&metadata(), &buckets).unwrap();
        let servers: BTreeSet<_> = pruned.keys().cloned().collect();
        assert_eq!(servers, [server(1), server(2), server(3)].into_iter().collect());
    }

    #[test]
    fn test_prune_nodes_absent_when_any_bucket_unowned() {
        let buckets: BucketSet = [0, 3].into_iter().collect();
        assert!(prune_nodes(&metadata(), &buckets).is_none());
    }

    #[test]
    fn test_group_for_write_uses_primaries() {
        let buckets: BucketSet = [0, 1, 2, 3].into_iter().collect();
        let grouped = group_by_server_to_buckets(&metadata(), &buckets, true).unwrap();
        let total: usize = grouped.values().map(BTreeSet::len).sum();
        assert_eq!(total, 4);
        assert!(grouped[&server(2)].contains(&1));
        assert!(grouped[&server(3)].contains(&2));
        // bucket 3 has no primary and rides along with the first server
        assert!(grouped[&server(1)].contains(&3));
    }

    #[test]
    fn test_group_for_read_covers_every_bucket_once() {
        let buckets: BucketSet = [0, 1, 2].into_iter().collect();
        let grouped = group_by_server_to_buckets(&metadata(), &buckets, false).unwrap();
        let mut all = BucketSet::new();
        for set in grouped.values() {
            for id in set {
                assert!(all.insert(*id), "bucket {} assigned twice", id);
            }
        }
        assert_eq!(all, buckets);
        assert_eq!(grouped.len(), 2);
    }

    #[test]
    fn test_remove_location() {
        let mut md = metadata();
        assert!(md.remove_location(&server(1)));
        assert!(md.server_location(0, true).is_none());
        assert_eq!(md.locations(0).len(), 1);
        assert!(!md.servers().contains(&server(1)));
        assert!(!md.remove_location(&server(1)));
    }
}
