//! # Raceday Core
//!
//! Shared foundation for the Raceday background-work engine: configuration,
//! the error taxonomy, domain types, the capability contracts the engine
//! consumes from the rest of the platform, and the in-process event bus.
//!
//! Nothing in this crate talks to a database or the network — those live in
//! `raceday-domain` (reference SQLite implementation of the contracts) and
//! `raceday-channels` (outbound delivery).

pub mod config;
pub mod error;
pub mod events;
pub mod traits;
pub mod types;

pub use config::RacedayConfig;
pub use error::{DeliveryError, RacedayError, Result};
pub use events::{DomainEvent, EventBus, EventListener};
pub use types::{Race, RaceStatus, RaceTime, Tournament};
