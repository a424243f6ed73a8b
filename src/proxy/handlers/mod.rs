// Handlers module - endpoint handlers

pub mod proxy;
pub mod session;
pub mod websocket;
