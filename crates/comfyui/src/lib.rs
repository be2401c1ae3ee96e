//! Client side of the ComfyUI protocol used by the video worker.
//!
//! The HTTP endpoints live in [`api`], the WebSocket push channel in
//! [`client`], [`reconnect`], [`messages`] and [`processor`], and history
//! parsing in [`outputs`]. [`session::ComfyUISession`] runs one workflow
//! through all of them.

pub mod api;
pub mod client;
pub mod messages;
pub mod outputs;
pub mod processor;
pub mod reconnect;
pub mod session;
