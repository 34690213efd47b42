//! Type codes that prefix serialized objects on the wire.

/// Fixed-id object whose id fits in one byte.
pub const FIXED_ID_BYTE: i8 = 1;
/// Fixed-id object whose id takes two bytes.
pub const FIXED_ID_SHORT: i8 = 2;
/// Fixed-id object whose id takes four bytes.
pub const FIXED_ID_INT: i8 = 3;
/// Client membership identifier.
pub const CLIENT_PROXY_MEMBERSHIP_ID: i8 = 38;
/// A null object.
pub const NULL_OBJ: i8 = 41;
/// String encoded as `u16` modified UTF-8.
pub const CACHEABLE_STRING: i8 = 42;
/// A Java-serialized object, used by servers for throwables.
pub const JAVA_SERIALIZABLE: i8 = 44;
/// Byte array.
pub const CACHEABLE_BYTES: i8 = 46;
/// Array of objects.
pub const CACHEABLE_OBJECT_ARRAY: i8 = 52;
/// Boolean.
pub const CACHEABLE_BOOLEAN: i8 = 53;
/// 16-bit integer.
pub const CACHEABLE_INT16: i8 = 56;
/// 32-bit integer.
pub const CACHEABLE_INT32: i8 = 57;
/// 64-bit integer.
pub const CACHEABLE_INT64: i8 = 58;
/// 64-bit float.
pub const CACHEABLE_DOUBLE: i8 = 60;
/// Growable list of objects.
pub const CACHEABLE_ARRAY_LIST: i8 = 65;
/// A null string.
pub const CACHEABLE_NULL_STRING: i8 = 69;
/// ASCII string with a `u16` length.
pub const CACHEABLE_ASCII_STRING: i8 = 87;
/// ASCII string with an `i32` length.
pub const CACHEABLE_ASCII_STRING_HUGE: i8 = 88;
/// UTF-16 string with an `i32` character count.
pub const CACHEABLE_STRING_HUGE: i8 = 89;

/// Data serializable fixed ids used by the locator protocol.
pub mod dsfid {
    /// Request for the locators known to a locator.
    pub const LOCATOR_LIST_REQUEST: i8 = -54;
    /// Response carrying a locator list.
    pub const LOCATOR_LIST_RESPONSE: i8 = -53;
    /// Request for a server to open a connection to.
    pub const CLIENT_CONNECTION_REQUEST: i8 = -51;
    /// Response naming a server to connect to.
    pub const CLIENT_CONNECTION_RESPONSE: i8 = -50;
    /// Request for subscription queue servers.
    pub const QUEUE_CONNECTION_REQUEST: i8 = -49;
    /// Response naming subscription queue servers.
    pub const QUEUE_CONNECTION_RESPONSE: i8 = -48;
    /// Request for every live server.
    pub const GET_ALL_SERVERS_REQUEST: i8 = -43;
    /// Response listing every live server.
    pub const GET_ALL_SERVERS_RESPONSE: i8 = -42;
}
