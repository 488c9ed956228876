//! The channel-handler contract, the process-wide registry, and the
//! illustrative provider handlers built against that contract.

pub mod handler;
pub mod registry;
pub mod split;

pub mod bluesms;
pub mod chirp;
pub mod rocketchat;
pub mod startmobile;
pub mod telegram;
pub mod whatsapp_cloud;

pub use handler::{
    Handler, HandlerCtx, HttpMethod, InboundRequest, RouteRoot, RouteSpec, RouterError,
    RouterOutcome, SendErrorKind, SendOutcome,
};
pub use registry::HandlerRegistry;

/// The zero-or-more events one handler invocation produces.
pub type ChannelEventBatch = Vec<courier_core::types::ChannelEventPayload>;
