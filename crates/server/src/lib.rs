//! An OpenID Connect authorization server that federates login to pluggable
//! upstream identity connectors.
//!
//! The server validates authorization requests against registered clients,
//! tracks each flow in a session, hands the user agent to a connector for the
//! actual login and finally exchanges single-use codes for signed ID tokens.

pub mod api;
pub mod client;
pub mod clock;
pub mod config;
pub mod connector;
pub mod entity;
pub mod error;
pub mod key;
pub mod oauth2;
pub mod session;
