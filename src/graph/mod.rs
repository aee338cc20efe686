//! Microsoft Graph access for Exchange Online.
//!
//! The [`Dispatcher`] attaches credentials to outbound calls; the
//! [`ExchangeClient`] maps mail and calendar operations onto it.

pub mod client;
pub mod dispatcher;
pub mod models;

#[cfg(test)]
pub(crate) mod testing;

pub use client::{DraftRequest, EventQuery, ExchangeClient, FreeBusyQuery, MessageQuery};
pub use dispatcher::{ApiResponse, Dispatcher, OutboundRequest};
