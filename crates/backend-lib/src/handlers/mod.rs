//! Request handlers: realtime frames and the REST API.

pub mod live;
pub mod messages;
pub mod presence;
