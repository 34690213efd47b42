//! Locator client: server discovery and locator list maintenance.

use std::collections::HashSet;
use std::sync::RwLock;
use std::time::Duration;

use geode_core::protocol::{LocatorRequest, LocatorResponse};
use geode_core::{GeodeError, Result, ServerLocation};
use rand::seq::SliceRandom;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Talks to the locators of one pool.
///
/// The locator list is only read under a short lock to take a snapshot;
/// network I/O happens without holding any lock, so concurrent callers
/// query in parallel.
#[derive(Debug)]
pub struct LocatorClient {
    locators: RwLock<Vec<ServerLocation>>,
    known_servers: RwLock<Vec<ServerLocation>>,
    server_group: String,
    connect_timeout: Duration,
    retry_attempts: i32,
}

impl LocatorClient {
    /// Creates a client for `locators`.
    pub fn new(
        locators: Vec<ServerLocation>,
        server_group: impl Into<String>,
        connect_timeout: Duration,
        retry_attempts: i32,
    ) -> Self {
        Self {
            locators: RwLock::new(locators),
            known_servers: RwLock::new(Vec::new()),
            server_group: server_group.into(),
            connect_timeout,
            retry_attempts,
        }
    }

    /// Returns a snapshot of the locator list.
    pub fn locators(&self) -> Vec<ServerLocation> {
        self.locators
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Returns the servers reported by the last successful server listing.
    pub fn known_servers(&self) -> Vec<ServerLocation> {
        self.known_servers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Returns the server group filter.
    pub fn server_group(&self) -> &str {
        &self.server_group
    }

    /// Sends `request` to one locator and reads its response.
    pub async fn query_locator(
        locator: &ServerLocation,
        request: &LocatorRequest,
        limit: Duration,
    ) -> Result<LocatorResponse> {
        let exchange = async {
            let mut stream = TcpStream::connect(locator.address()).await.map_err(|e| {
                GeodeError::NotConnected(format!("failed to connect to locator {}: {}", locator, e))
            })?;
            stream.set_nodelay(true)?;
            stream.write_all(&request.encode()?).await?;
            let mut response = Vec::new();
            stream.read_to_end(&mut response).await?;
            LocatorResponse::decode(&response)
        };
        timeout(limit, exchange).await.map_err(|_| {
            GeodeError::Timeout(format!(
                "locator {} did not answer within {:?}",
                locator, limit
            ))
        })?
    }

    /// Sends `request` to the locators in random order until one answers.
    pub async fn query(&self, request: &LocatorRequest) -> Result<LocatorResponse> {
        let mut snapshot = self.locators();
        snapshot.shuffle(&mut rand::thread_rng());

        for locator in &snapshot {
            match Self::query_locator(locator, request, self.connect_timeout).await {
                Ok(response) => return Ok(response),
                Err(e) => {
                    tracing::warn!(locator = %locator, error = %e, "locator query failed");
                }
            }
        }
        Err(GeodeError::NoAvailableLocators(format!(
            "none of {} locator(s) answered",
            snapshot.len()
        )))
    }

    /// Asks the locators for a server to open a new connection to.
    #[tracing::instrument(name = "locator.find_server", skip(self, excluded), fields(excluded = excluded.len()))]
    pub async fn get_endpoint_for_new_connection(
        &self,
        excluded: &HashSet<ServerLocation>,
    ) -> Result<ServerLocation> {
        let attempts = if self.retry_attempts < 0 {
            1
        } else {
            self.retry_attempts as usize + 1
        };
        let mut excluded: Vec<ServerLocation> = excluded.iter().cloned().collect();
        excluded.sort();
        let request = LocatorRequest::ClientConnection {
            server_group: self.server_group.clone(),
            excluded,
        };

        let mut last_error = None;
        for _ in 0..attempts {
            match self.query(&request).await {
                Ok(LocatorResponse::ClientConnection {
                    server: Some(server),
                }) => return Ok(server),
                Ok(LocatorResponse::ClientConnection { server: None }) => {
                    last_error = Some(GeodeError::NotConnected("no servers found".to_string()));
                }
                Ok(other) => {
                    return Err(GeodeError::Protocol(format!(
                        "unexpected locator response {:?}",
                        other
                    )))
                }
                Err(e) => last_error = Some(e),
            }
        }
        Err(last_error
            .unwrap_or_else(|| GeodeError::NoAvailableLocators("no locators".to_string())))
    }

    /// Asks the locators for every live server and remembers the answer.
    pub async fn get_all_servers(&self) -> Result<Vec<ServerLocation>> {
        let request = LocatorRequest::GetAllServers {
            server_group: self.server_group.clone(),
        };
        match self.query(&request).await? {
            LocatorResponse::GetAllServers { servers } => {
                *self
                    .known_servers
                    .write()
                    .unwrap_or_else(|e| e.into_inner()) = servers.clone();
                Ok(servers)
            }
            other => Err(GeodeError::Protocol(format!(
                "unexpected locator response {:?}",
                other
            ))),
        }
    }

    /// Asks the locators for servers to host subscription queues.
    ///
    /// Returns whether an existing durable queue was found and the servers,
    /// primary candidate first.
    pub async fn get_queue_servers(
        &self,
        client_id: Vec<u8>,
        redundancy: i32,
        excluded: &HashSet<ServerLocation>,
        find_durable: bool,
    ) -> Result<(bool, Vec<ServerLocation>)> {
        let mut excluded: Vec<ServerLocation> = excluded.iter().cloned().collect();
        excluded.sort();
        let request = LocatorRequest::QueueConnection {
            server_group: self.server_group.clone(),
            client_id,
            redundancy,
            excluded,
            find_durable,
        };
        match self.query(&request).await? {
            LocatorResponse::QueueConnection {
                durable_queue_found,
                servers,
            } => Ok((durable_queue_found, servers)),
            other => Err(GeodeError::Protocol(format!(
                "unexpected locator response {:?}",
                other
            ))),
        }
    }

    /// Refreshes the locator list from the locators themselves.
    pub async fn update_locators(&self) -> Result<()> {
        let request = LocatorRequest::LocatorList {
            server_group: self.server_group.clone(),
        };
        let discovered = match self.query(&request).await? {
            LocatorResponse::LocatorList { locators, .. } => locators,
            other => {
                return Err(GeodeError::Protocol(format!(
                    "unexpected locator response {:?}",
                    other
                )))
            }
        };
        if discovered.is_empty() {
            return Ok(());
        }

        let mut current = self.locators.write().unwrap_or_else(|e| e.into_inner());
        let merged = merge_locators(&current, discovered);
        if *current != merged {
            tracing::debug!(count = merged.len(), "locator list updated");
            *current = merged;
        }
        Ok(())
    }
}

/// Merges a freshly discovered locator list into the current one: the
/// discovered locators first, in their order, then every current locator
/// that was not discovered.
pub fn merge_locators(
    current: &[ServerLocation],
    discovered: Vec<ServerLocation>,
) -> Vec<ServerLocation> {
    let mut merged = discovered;
    for locator in current {
        if !merged.contains(locator) {
            merged.push(locator.clone());
        }
    }
    merged
}
