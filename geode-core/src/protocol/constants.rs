//! Protocol constants for the Geode client/server wire protocol.

/// Size of a request or reply header:
/// `msg_type i32, payload_len i32, num_parts i32, tx_id i32, flags u8`.
pub const MESSAGE_HEADER_SIZE: usize = 17;

/// Size of the first header of a chunked response:
/// `msg_type i32, num_parts i32, tx_id i32, chunk_len i32, flags u8`.
pub const CHUNK_FIRST_HEADER_SIZE: usize = 17;

/// Size of every later chunk header: `chunk_len i32, flags u8`.
pub const CHUNK_HEADER_SIZE: usize = 5;

/// Size of a part header: `len i32, is_object u8`.
pub const PART_HEADER_SIZE: usize = 5;

/// Upper bound on a single message or chunk payload.
pub const MAX_MESSAGE_SIZE: usize = 512 * 1024 * 1024;

/// Transaction id carried by requests outside any transaction.
pub const NO_TRANSACTION: i32 = -1;

/// Chunk flag marking the final chunk of a response.
pub const LAST_CHUNK_FLAG: u8 = 0x01;

/// Header flag asking the client to refresh partition metadata.
pub const REFRESH_METADATA_FLAG: u8 = 0x04;

/// Default locator port.
pub const DEFAULT_LOCATOR_PORT: u16 = 10334;

/// Default cache server port.
pub const DEFAULT_SERVER_PORT: u16 = 40404;

// Message type constants.

/// Get request.
pub const REQUEST: i32 = 0;
/// Response carrying data.
pub const RESPONSE: i32 = 1;
/// Response carrying a server exception.
pub const EXCEPTION: i32 = 2;
/// Get failed on the server.
pub const REQUEST_DATA_ERROR: i32 = 3;
/// Liveness check.
pub const PING: i32 = 5;
/// Acknowledgement without data.
pub const REPLY: i32 = 6;
/// Put request.
pub const PUT: i32 = 7;
/// Put failed on the server.
pub const PUT_DATA_ERROR: i32 = 8;
/// Destroy request.
pub const DESTROY: i32 = 9;
/// Destroy failed on the server.
pub const DESTROY_DATA_ERROR: i32 = 10;
/// Server push: entry invalidated.
pub const LOCAL_INVALIDATE: i32 = 15;
/// Server push: entry destroyed.
pub const LOCAL_DESTROY: i32 = 16;
/// Server push: region destroyed.
pub const LOCAL_DESTROY_REGION: i32 = 17;
/// Client is closing its connection.
pub const CLOSE_CONNECTION: i32 = 18;
/// Register interest in keys of a region.
pub const REGISTER_INTEREST: i32 = 20;
/// Register interest failed.
pub const REGISTER_INTEREST_DATA_ERROR: i32 = 21;
/// Unregister interest in keys of a region.
pub const UNREGISTER_INTEREST: i32 = 22;
/// Server push: entry created.
pub const LOCAL_CREATE: i32 = 27;
/// Server push: entry updated.
pub const LOCAL_UPDATE: i32 = 28;
/// Promote a secondary subscription queue to primary.
pub const MAKE_PRIMARY: i32 = 31;
/// Query request.
pub const QUERY: i32 = 34;
/// Query failed on the server.
pub const QUERY_DATA_ERROR: i32 = 35;
/// Clear a region; also pushed by servers.
pub const CLEAR_REGION: i32 = 36;
/// Containment check request.
pub const CONTAINS_KEY: i32 = 38;
/// Key set request.
pub const KEY_SET: i32 = 40;
/// Acknowledge delivered subscription events.
pub const PERIODIC_ACK: i32 = 52;
/// Durable client is ready for queued events.
pub const CLIENT_READY: i32 = 53;
/// Server push: marker that initial events were delivered.
pub const CLIENT_MARKER: i32 = 54;
/// Bulk put request.
pub const PUTALL: i32 = 56;
/// Execute a function on a region.
pub const EXECUTE_REGION_FUNCTION: i32 = 59;
/// Region function result chunk.
pub const EXECUTE_REGION_FUNCTION_RESULT: i32 = 60;
/// Region function failed on the server.
pub const EXECUTE_REGION_FUNCTION_ERROR: i32 = 61;
/// Execute a function on a server.
pub const EXECUTE_FUNCTION: i32 = 62;
/// Request bucket ownership of a partitioned region.
pub const GET_CLIENT_PR_METADATA: i32 = 71;
/// Bucket ownership response chunk.
pub const RESPONSE_CLIENT_PR_METADATA: i32 = 72;
/// Request the partition attributes of a region.
pub const GET_CLIENT_PARTITION_ATTRIBUTES: i32 = 73;
/// Partition attributes response.
pub const RESPONSE_CLIENT_PARTITION_ATTRIBUTES: i32 = 74;
/// Bucket ownership request failed.
pub const GET_CLIENT_PR_METADATA_ERROR: i32 = 75;
/// Region size request.
pub const SIZE: i32 = 81;
/// Invalidate request.
pub const INVALIDATE: i32 = 83;
/// Invalidate failed on the server.
pub const INVALIDATE_ERROR: i32 = 84;
/// Commit the transaction named in the header.
pub const COMMIT: i32 = 85;
/// Commit failed because of a conflict.
pub const COMMIT_ERROR: i32 = 86;
/// Roll back the transaction named in the header.
pub const ROLLBACK: i32 = 87;
/// Move the transaction named in the header to this server.
pub const TX_FAILOVER: i32 = 88;
/// Transaction synchronization callback.
pub const TX_SYNCHRONIZATION: i32 = 90;
/// Server push: keepalive on a subscription channel.
pub const SERVER_TO_CLIENT_PING: i32 = 99;
/// Bulk get request.
pub const GET_ALL_70: i32 = 100;

/// Returns a printable name for a message type.
pub fn message_type_name(message_type: i32) -> &'static str {
    match message_type {
        REQUEST => "REQUEST",
        RESPONSE => "RESPONSE",
        EXCEPTION => "EXCEPTION",
        REQUEST_DATA_ERROR => "REQUEST_DATA_ERROR",
        PING => "PING",
        REPLY => "REPLY",
        PUT => "PUT",
        PUT_DATA_ERROR => "PUT_DATA_ERROR",
        DESTROY => "DESTROY",
        DESTROY_DATA_ERROR => "DESTROY_DATA_ERROR",
        LOCAL_INVALIDATE => "LOCAL_INVALIDATE",
        LOCAL_DESTROY => "LOCAL_DESTROY",
        LOCAL_DESTROY_REGION => "LOCAL_DESTROY_REGION",
        CLOSE_CONNECTION => "CLOSE_CONNECTION",
        REGISTER_INTEREST => "REGISTER_INTEREST",
        REGISTER_INTEREST_DATA_ERROR => "REGISTER_INTEREST_DATA_ERROR",
        UNREGISTER_INTEREST => "UNREGISTER_INTEREST",
        LOCAL_CREATE => "LOCAL_CREATE",
        LOCAL_UPDATE => "LOCAL_UPDATE",
        MAKE_PRIMARY => "MAKE_PRIMARY",
        QUERY => "QUERY",
        QUERY_DATA_ERROR => "QUERY_DATA_ERROR",
        CLEAR_REGION => "CLEAR_REGION",
        CONTAINS_KEY => "CONTAINS_KEY",
        KEY_SET => "KEY_SET",
        PERIODIC_ACK => "PERIODIC_ACK",
        CLIENT_READY => "CLIENT_READY",
        CLIENT_MARKER => "CLIENT_MARKER",
        PUTALL => "PUTALL",
        EXECUTE_REGION_FUNCTION => "EXECUTE_REGION_FUNCTION",
        EXECUTE_REGION_FUNCTION_RESULT => "EXECUTE_REGION_FUNCTION_RESULT",
        EXECUTE_REGION_FUNCTION_ERROR => "EXECUTE_REGION_FUNCTION_ERROR",
        EXECUTE_FUNCTION => "EXECUTE_FUNCTION",
        GET_CLIENT_PR_METADATA => "GET_CLIENT_PR_METADATA",
        RESPONSE_CLIENT_PR_METADATA => "RESPONSE_CLIENT_PR_METADATA",
        GET_CLIENT_PARTITION_ATTRIBUTES => "GET_CLIENT_PARTITION_ATTRIBUTES",
        RESPONSE_CLIENT_PARTITION_ATTRIBUTES => "RESPONSE_CLIENT_PARTITION_ATTRIBUTES",
        GET_CLIENT_PR_METADATA_ERROR => "GET_CLIENT_PR_METADATA_ERROR",
        SIZE => "SIZE",
        INVALIDATE => "INVALIDATE",
        INVALIDATE_ERROR => "INVALIDATE_ERROR",
        COMMIT => "COMMIT",
        COMMIT_ERROR => "COMMIT_ERROR",
        ROLLBACK => "ROLLBACK",
        TX_FAILOVER => "TX_FAILOVER",
        TX_SYNCHRONIZATION => "TX_SYNCHRONIZATION",
        SERVER_TO_CLIENT_PING => "SERVER_TO_CLIENT_PING",
        GET_ALL_70 => "GET_ALL_70",
        _ => "UNKNOWN",
    }
}

/// Returns true for message types that carry a server-side failure.
pub fn is_error_type(message_type: i32) -> bool {
    matches!(
        message_type,
        EXCEPTION
            | REQUEST_DATA_ERROR
            | PUT_DATA_ERROR
            | DESTROY_DATA_ERROR
            | REGISTER_INTEREST_DATA_ERROR
            | QUERY_DATA_ERROR
            | EXECUTE_REGION_FUNCTION_ERROR
            | GET_CLIENT_PR_METADATA_ERROR
            | INVALIDATE_ERROR
            | COMMIT_ERROR
    )
}
