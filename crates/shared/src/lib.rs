//! Shared ids, errors and the wire contracts exchanged
//! between the key service and its clients.

pub mod api;
pub mod constants;
pub mod error;
pub mod ids;
