/// Current hybrid packet protocol version, carried in the `v` field.
pub const PACKET_PROTOCOL_VERSION: &str = "1";
/// Minimum RSA modulus size accepted for workspace key pairs.
pub const MIN_RSA_KEY_BITS: usize = 2048;
/// Maximum size for a single message body in bytes, before encryption.
pub const MAX_MESSAGE_SIZE_BYTES: usize = 64 * 1024;
/// Header carrying the caller's user id on key service requests.
pub const USER_ID_HEADER: &str = "x-user-id";
