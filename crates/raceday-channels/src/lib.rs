//! # Raceday Channels
//! Outbound delivery-channel implementations behind the `DeliveryHandler`
//! contract. Chat direct messages are the reference implementation; the
//! webhook channel covers integrations. Email slots in behind the same
//! trait when it lands.

pub mod chat;
pub mod classify;
pub mod webhook;

pub use chat::ChatDmChannel;
pub use webhook::WebhookChannel;
