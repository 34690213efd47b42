//! Locator request and response messages.
//!
//! A locator exchange is a single request and a single response over a
//! short-lived connection. The request is preceded by the gossip version and
//! the client's version ordinal; both payloads are fixed-id objects.

use bytes::Bytes;

use super::location::ServerLocation;
use crate::error::{GeodeError, Result};
use crate::serialization::ds_code::{self, dsfid};
use crate::serialization::{
    read_typed_string, write_typed_string, DataInput, DataOutput, ObjectDataInput,
    ObjectDataOutput,
};

/// Gossip version written before every locator request.
pub const GOSSIP_VERSION: i32 = 1002;

/// Version ordinal this client announces to locators and servers.
pub const CLIENT_VERSION_ORDINAL: i16 = 150;

/// A request sent to a locator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocatorRequest {
    /// Ask for the locators the locator knows about.
    LocatorList {
        /// Server group filter, empty for all.
        server_group: String,
    },
    /// Ask for every live server.
    GetAllServers {
        /// Server group filter, empty for all.
        server_group: String,
    },
    /// Ask for the least loaded server to open a connection to.
    ClientConnection {
        /// Server group filter, empty for all.
        server_group: String,
        /// Servers the client does not want.
        excluded: Vec<ServerLocation>,
    },
    /// Ask for servers to host subscription queues.
    QueueConnection {
        /// Server group filter, empty for all.
        server_group: String,
        /// Serialized client membership id.
        client_id: Vec<u8>,
        /// Number of redundant queues wanted, `-1` for all servers.
        redundancy: i32,
        /// Servers the client does not want.
        excluded: Vec<ServerLocation>,
        /// True if the locator should look for an existing durable queue.
        find_durable: bool,
    },
}

/// A response sent by a locator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocatorResponse {
    /// Known locators and whether the cluster's load is balanced.
    LocatorList {
        /// Locator endpoints in locator-preferred order.
        locators: Vec<ServerLocation>,
        /// True if server load is balanced.
        is_balanced: bool,
    },
    /// Every live server.
    GetAllServers {
        /// Live servers.
        servers: Vec<ServerLocation>,
    },
    /// Server selected for a new connection, if any.
    ClientConnection {
        /// Selected server.
        server: Option<ServerLocation>,
    },
    /// Servers selected for subscription queues.
    QueueConnection {
        /// True if a durable queue for the client already exists.
        durable_queue_found: bool,
        /// Selected servers, the existing durable primary first.
        servers: Vec<ServerLocation>,
    },
}

fn write_locations<W: DataOutput>(output: &mut W, locations: &[ServerLocation]) -> Result<()> {
    output.write_int(locations.len() as i32)?;
    for location in locations {
        location.write_to(output)?;
    }
    Ok(())
}

fn read_locations<R: DataInput>(input: &mut R) -> Result<Vec<ServerLocation>> {
    let count = input.read_int()?;
    if count < 0 {
        return Ok(Vec::new());
    }
    let mut locations = Vec::with_capacity(input.capacity_for(count, ServerLocation::MIN_ENCODED_SIZE));
    for _ in 0..count {
        locations.push(ServerLocation::read_from(input)?);
    }
    Ok(locations)
}

fn write_header<W: DataOutput>(output: &mut W, id: i8) -> Result<()> {
    output.write_byte(ds_code::FIXED_ID_BYTE)?;
    output.write_byte(id)
}

fn read_header<R: DataInput>(input: &mut R) -> Result<i8> {
    let code = input.read_byte()?;
    if code != ds_code::FIXED_ID_BYTE {
        return Err(GeodeError::Protocol(format!(
            "locator message starts with type code {}, expected fixed id",
            code
        )));
    }
    input.read_byte()
}

fn read_group<R: DataInput>(input: &mut R) -> Result<String> {
    Ok(read_typed_string(input)?.unwrap_or_default())
}

impl LocatorRequest {
    /// Returns the fixed id of the request.
    pub fn dsfid(&self) -> i8 {
        match self {
            LocatorRequest::LocatorList { .. } => dsfid::LOCATOR_LIST_REQUEST,
            LocatorRequest::GetAllServers { .. } => dsfid::GET_ALL_SERVERS_REQUEST,
            LocatorRequest::ClientConnection { .. } => dsfid::CLIENT_CONNECTION_REQUEST,
            LocatorRequest::QueueConnection { .. } => dsfid::QUEUE_CONNECTION_REQUEST,
        }
    }

    /// Writes the request object.
    pub fn write_to<W: DataOutput>(&self, output: &mut W) -> Result<()> {
        write_header(output, self.dsfid())?;
        match self {
            LocatorRequest::LocatorList { server_group }
            | LocatorRequest::GetAllServers { server_group } => {
                write_typed_string(output, Some(server_group.as_str()))
            }
            LocatorRequest::ClientConnection {
                server_group,
                excluded,
            } => {
                write_typed_string(output, Some(server_group.as_str()))?;
                write_locations(output, excluded)
            }
            LocatorRequest::QueueConnection {
                server_group,
                client_id,
                redundancy,
                excluded,
                find_durable,
            } => {
                write_typed_string(output, Some(server_group.as_str()))?;
                output.write_byte_array(Some(client_id.as_slice()))?;
                output.write_int(*redundancy)?;
                write_locations(output, excluded)?;
                output.write_bool(*find_durable)
            }
        }
    }

    /// Reads a request object.
    pub fn read_from<R: DataInput>(input: &mut R) -> Result<Self> {
        let id = read_header(input)?;
        match id {
            dsfid::LOCATOR_LIST_REQUEST => Ok(LocatorRequest::LocatorList {
                server_group: read_group(input)?,
            }),
            dsfid::GET_ALL_SERVERS_REQUEST => Ok(LocatorRequest::GetAllServers {
                server_group: read_group(input)?,
            }),
            dsfid::CLIENT_CONNECTION_REQUEST => Ok(LocatorRequest::ClientConnection {
                server_group: read_group(input)?,
                excluded: read_locations(input)?,
            }),
            dsfid::QUEUE_CONNECTION_REQUEST => Ok(LocatorRequest::QueueConnection {
                server_group: read_group(input)?,
                client_id: input.read_byte_array()?.unwrap_or_default(),
                redundancy: input.read_int()?,
                excluded: read_locations(input)?,
                find_durable: input.read_bool()?,
            }),
            other => Err(GeodeError::Protocol(format!(
                "unknown locator request id {}",
                other
            ))),
        }
    }

    /// Encodes the request with its gossip preamble, ready to send.
    pub fn encode(&self) -> Result<Bytes> {
        let mut output = ObjectDataOutput::new();
        output.write_int(GOSSIP_VERSION)?;
        output.write_int(CLIENT_VERSION_ORDINAL as i32)?;
        self.write_to(&mut output)?;
        Ok(output.freeze())
    }

    /// Decodes a request sent with [`LocatorRequest::encode`].
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut input = ObjectDataInput::new(data);
        let gossip = input.read_int()?;
        if gossip != GOSSIP_VERSION {
            return Err(GeodeError::Protocol(format!(
                "unsupported gossip version {}",
                gossip
            )));
        }
        let _ordinal = input.read_int()?;
        Self::read_from(&mut input)
    }
}

impl LocatorResponse {
    /// Returns the fixed id of the response.
    pub fn dsfid(&self) -> i8 {
        match self {
            LocatorResponse::LocatorList { .. } => dsfid::LOCATOR_LIST_RESPONSE,
            LocatorResponse::GetAllServers { .. } => dsfid::GET_ALL_SERVERS_RESPONSE,
            LocatorResponse::ClientConnection { .. } => dsfid::CLIENT_CONNECTION_RESPONSE,
            LocatorResponse::QueueConnection { .. } => dsfid::QUEUE_CONNECTION_RESPONSE,
        }
    }

    /// Writes the response object.
    pub fn write_to<W: DataOutput>(&self, output: &mut W) -> Result<()> {
        write_header(output, self.dsfid())?;
        match self {
            LocatorResponse::LocatorList {
                locators,
                is_balanced,
            } => {
                write_locations(output, locators)?;
                output.write_bool(*is_balanced)
            }
            LocatorResponse::GetAllServers { servers } => write_locations(output, servers),
            LocatorResponse::ClientConnection { server } => match server {
                Some(location) => {
                    output.write_bool(true)?;
                    location.write_to(output)
                }
                None => output.write_bool(false),
            },
            LocatorResponse::QueueConnection {
                durable_queue_found,
                servers,
            } => {
                output.write_bool(*durable_queue_found)?;
                write_locations(output, servers)
            }
        }
    }

    /// Reads a response object.
    pub fn read_from<R: DataInput>(input: &mut R) -> Result<Self> {
        let id = read_header(input)?;
        match id {
            dsfid::LOCATOR_LIST_RESPONSE => Ok(LocatorResponse::LocatorList {
                locators: read_locations(input)?,
                is_balanced: input.read_bool()?,
            }),
            dsfid::GET_ALL_SERVERS_RESPONSE => Ok(LocatorResponse::GetAllServers {
                servers: read_locations(input)?,
            }),
            dsfid::CLIENT_CONNECTION_RESPONSE => {
                let found = input.read_bool()?;
                let server = if found {
                    Some(ServerLocation::read_from(input)?)
                } else {
                    None
                };
                Ok(LocatorResponse::ClientConnection { server })
            }
            dsfid::QUEUE_CONNECTION_RESPONSE => Ok(LocatorResponse::QueueConnection {
                durable_queue_found: input.read_bool()?,
                servers: read_locations(input)?,
            }),
            other => Err(GeodeError::Protocol(format!(
                "unknown locator response id {}",
                other
            ))),
        }
    }

    /// Encodes the response object.
    pub fn encode(&self) -> Result<Bytes> {
        let mut output = ObjectDataOutput::new();
        self.write_to(&mut output)?;
        Ok(output.freeze())
    }

    /// Decodes a response object.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut input = ObjectDataInput::new(data);
        Self::read_from(&mut input)
    }
}
