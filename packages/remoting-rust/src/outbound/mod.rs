//! Outbound decorators: context-propagating clients and the factory that
//! produces them.

mod client;
mod factory;

pub use client::ContextClient;
pub use factory::ContextClientFactory;
