//! Real-time connection layer

pub mod broadcast;
pub mod connection;
pub mod handler;
pub mod identity;
pub mod protocol;
pub mod router;
