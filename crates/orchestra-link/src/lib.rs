//! Orchestra Link - request-reply transport
//!
//! A request-reply link allows exactly one outstanding request: send, then
//! wait for exactly one reply. This crate makes that discipline explicit:
//! - [`frame`]: newline-delimited JSON framing with a size bound
//! - [`transport`]: connectors and channels that track their own state
//! - [`link`]: a single owned channel checked out per exchange and torn
//!   down whenever an exchange does not complete cleanly
//! - [`reply`]: the serving side, one reply per received request
//!
//! # Example
//!
//! ```rust,ignore
//! use orchestra_link::{RequestReplyLink, TcpConnector};
//! use std::time::Duration;
//!
//! let link = RequestReplyLink::new(TcpConnector::new("127.0.0.1:5555"));
//! let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
//! let reply = link.exchange(&serde_json::json!({"action": "ping"}), deadline).await?;
//! ```

#![warn(unreachable_pub)]

pub mod error;
pub mod frame;
pub mod link;
pub mod reply;
pub mod transport;

pub use error::LinkError;
pub use frame::{read_frame, write_frame, DEFAULT_MAX_FRAME_BYTES};
pub use link::{LinkStats, RequestReplyLink};
pub use reply::ReplySocket;
pub use transport::{Channel, ChannelState, Connector, TcpChannel, TcpConnector};
