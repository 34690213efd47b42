//! Server endpoints and bucket ownership records.

use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

use crate::error::{GeodeError, Result};
use crate::serialization::{read_typed_string, write_typed_string, DataInput, DataOutput};

/// A server or locator endpoint, compared by value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServerLocation {
    host: String,
    port: u16,
}

impl ServerLocation {
    /// Smallest encoding: a null host string and the port.
    pub const MIN_ENCODED_SIZE: usize = 5;

    /// Creates a location for `host:port`.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Returns the host name or address.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Returns the port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Returns the `host:port` form accepted by `TcpStream::connect`.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Writes the location as a typed host string followed by an `i32` port.
    pub fn write_to<W: DataOutput>(&self, output: &mut W) -> Result<()> {
        write_typed_string(output, Some(self.host.as_str()))?;
        output.write_int(self.port as i32)
    }

    /// Reads a location written by [`ServerLocation::write_to`].
    pub fn read_from<R: DataInput>(input: &mut R) -> Result<Self> {
        let host = read_typed_string(input)?.unwrap_or_default();
        let port = input.read_int()?;
        let port = u16::try_from(port)
            .map_err(|_| GeodeError::Serialization(format!("invalid port {}", port)))?;
        Ok(Self { host, port })
    }
}

impl fmt::Display for ServerLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl From<SocketAddr> for ServerLocation {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip().to_string(), addr.port())
    }
}

impl FromStr for ServerLocation {
    type Err = GeodeError;

    fn from_str(s: &str) -> Result<Self> {
        let (host, port) = s.rsplit_once(':').ok_or_else(|| {
            GeodeError::IllegalArgument(format!("endpoint '{}' is not host:port", s))
        })?;
        if host.is_empty() {
            return Err(GeodeError::IllegalArgument(format!(
                "endpoint '{}' has an empty host",
                s
            )));
        }
        let port = port.parse::<u16>().map_err(|e| {
            GeodeError::IllegalArgument(format!("endpoint '{}' has an invalid port: {}", s, e))
        })?;
        Ok(Self::new(host, port))
    }
}

/// A server hosting a copy of one bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketServerLocation {
    /// The hosting server.
    pub location: ServerLocation,
    /// Bucket id.
    pub bucket_id: i32,
    /// True if this server holds the primary copy.
    pub is_primary: bool,
    /// Ownership version, bumped by the server on every move.
    pub version: i8,
    /// Server groups the hosting server belongs to.
    pub server_groups: Vec<String>,
}

impl BucketServerLocation {
    /// Smallest encoding: a location, bucket id, primary flag, version and
    /// an empty group count.
    pub const MIN_ENCODED_SIZE: usize = ServerLocation::MIN_ENCODED_SIZE + 10;

    /// Creates a record without server groups.
    pub fn new(location: ServerLocation, bucket_id: i32, is_primary: bool, version: i8) -> Self {
        Self {
            location,
            bucket_id,
            is_primary,
            version,
            server_groups: Vec::new(),
        }
    }

    /// Adds server groups, builder style.
    pub fn with_server_groups(mut self, groups: Vec<String>) -> Self {
        self.server_groups = groups;
        self
    }

    /// Returns true if the server is in `group`; an empty group matches all.
    pub fn in_group(&self, group: &str) -> bool {
        group.is_empty() || self.server_groups.iter().any(|g| g == group)
    }

    /// Writes the record.
    pub fn write_to<W: DataOutput>(&self, output: &mut W) -> Result<()> {
        self.location.write_to(output)?;
        output.write_int(self.bucket_id)?;
        output.write_bool(self.is_primary)?;
        output.write_byte(self.version)?;
        output.write_int(self.server_groups.len() as i32)?;
        for group in &self.server_groups {
            write_typed_string(output, Some(group.as_str()))?;
        }
        Ok(())
    }

    /// Reads a record written by [`BucketServerLocation::write_to`].
    pub fn read_from<R: DataInput>(input: &mut R) -> Result<Self> {
        let location = ServerLocation::read_from(input)?;
        let bucket_id = input.read_int()?;
        let is_primary = input.read_bool()?;
        let version = input.read_byte()?;
        let count = input.read_int()?;
        let mut server_groups = Vec::with_capacity(input.capacity_for(count, 1));
        for _ in 0..count {
            if let Some(group) = read_typed_string(input)? {
                server_groups.push(group);
            }
        }
        Ok(Self {
            location,
            bucket_id,
            is_primary,
            version,
            server_groups,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serialization::{ObjectDataInput, ObjectDataOutput};

    #[test]
    fn test_parse_endpoint() {
        let loc: ServerLocation = "cache-1.example.com:40404".parse().unwrap();
        assert_eq!(loc.host(), "cache-1.example.com");
        assert_eq!(loc.port(), 40404);
        assert_eq!(loc.to_string(), "cache-1.example.com:40404");
    }

    #[test]
    fn test_parse_invalid_endpoint() {
        assert!("no-port".parse::<ServerLocation>().is_err());
        assert!(":10334".parse::<ServerLocation>().is_err());
        assert!("host:99999".parse::<ServerLocation>().is_err());
    }

    #[test]
    fn test_value_equality_and_ordering() {
        let a = ServerLocation::new("a", 1);
        assert_eq!(a, ServerLocation::new("a", 1));
        assert!(a < ServerLocation::new("a", 2));
        assert!(a < ServerLocation::new("b", 0));
    }

    #[test]
    fn test_bucket_location_wire_form() {
        let record = BucketServerLocation::new(ServerLocation::new("10.0.0.5", 40404), 17, true, 3)
            .with_server_groups(vec!["east".to_string()]);
        let mut output = ObjectDataOutput::new();
        record.write_to(&mut output).unwrap();
        let bytes = output.into_bytes();
        let mut input = ObjectDataInput::new(&bytes);
        assert_eq!(BucketServerLocation::read_from(&mut input).unwrap(), record);
        assert_eq!(input.remaining(), 0);
    }

    #[test]
    fn test_bucket_location_with_bogus_group_count() {
        let record = BucketServerLocation::new(ServerLocation::new("10.0.0.5", 40404), 1, false, 0);
        let mut output = ObjectDataOutput::new();
        record.write_to(&mut output).unwrap();
        let mut bytes = output.into_bytes();
        let count = bytes.len() - 4;
        bytes[count..].copy_from_slice(&i32::MAX.to_be_bytes());
        let mut input = ObjectDataInput::new(&bytes);
        assert!(BucketServerLocation::read_from(&mut input).is_err());
    }

    #[test]
    fn test_in_group() {
        let record = BucketServerLocation::new(ServerLocation::new("h", 1), 0, false, 0)
            .with_server_groups(vec!["east".to_string()]);
        assert!(record.in_group(""));
        assert!(record.in_group("east"));
        assert!(!record.in_group("west"));
    }
}
