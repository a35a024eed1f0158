//! ZapCRM core library — messaging gateway client, connection lifecycle,
//! chat sessions, and contact synchronization shared by the CLI and UI
//! frontends.

pub mod chat;
pub mod config;
pub mod connection;
pub mod directory;
pub mod gateway;
pub mod model;
pub mod notify;
pub mod webhook;
