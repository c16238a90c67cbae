//! The realtime delivery subsystem: connection registry, socket lifecycle,
//! fan-out, membership mirror sync, and the per-instance bus subscriber.

pub mod delivery;
pub mod frames;
pub mod membership;
pub mod registry;
pub mod socket;
pub mod subscriber;

pub use delivery::DeliveryEngine;
pub use frames::{ClientFrame, ServerFrame};
pub use membership::MembershipSync;
pub use registry::{ConnectionHandle, ConnectionRegistry, SocketCommand};
pub use socket::ws_handler;
pub use subscriber::spawn_subscriber;
