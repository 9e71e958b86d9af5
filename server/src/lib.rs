//! # Pong Match Server Library
//!
//! Authoritative real-time server for two- and four-player Pong. Players are
//! grouped by the matchmaking queues, bound to a match over one of two
//! interchangeable transports, and simulated by a single global tick.
//!
//! ## Architecture Design
//!
//! ### Single Event Loop
//! One [`network::Server`] owns the lobby (queues and match registry). HTTP
//! handlers and connection tasks talk to it through a command channel, and
//! the same loop drives the fixed-period tick that steps every match. Every
//! match mutation happens on that one task, so matches need no locks.
//!
//! ### Transport-Agnostic Matches
//! Matches only see [`session::Session`] handles. The raw WebSocket transport
//! ([`gateway`]) and the newline-delimited fallback stream ([`fallback`])
//! each provide an adapter.
//!
//! ### Decoupled Persistence
//! Finished duo matches are handed to the [`recorder::ResultRecorder`],
//! which updates ratings and history on the blocking pool without delaying
//! the tick.
//!
//! ## Module Organization
//!
//! - [`arena`]: ball and paddle physics for both layouts
//! - [`game`]: the match state machine, readiness, countdown and scoring
//! - [`matchmaking`]: FIFO queues that group waiting players
//! - [`registry`]: table of active matches
//! - [`lobby`]: queues and registry behind one service
//! - [`session`]: connection handle abstraction and its two adapters
//! - [`network`]: the server loop and its command handle
//! - [`gateway`], [`fallback`]: the two transports and the HTTP API
//! - [`recorder`], [`store`]: Elo ratings, match history, collaborators
//! - [`config`], [`error`]

pub mod arena;
pub mod config;
pub mod error;
pub mod fallback;
pub mod game;
pub mod gateway;
pub mod lobby;
pub mod matchmaking;
pub mod network;
pub mod recorder;
pub mod registry;
pub mod session;
pub mod store;

pub use config::ServerConfig;
pub use network::{Server, ServerHandle, ServerMessage};
