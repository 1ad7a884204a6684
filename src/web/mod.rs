//! The session-aware HTTP client and its endpoint surfaces.

pub mod apikey;
pub mod client;
pub mod inventory;
pub mod limiter;
pub mod session;
pub mod trades;

pub use client::{HostKind, SessionField, WebClient, DEFAULT_MAX_TRIES};
pub use inventory::{InventoryFilter, MAX_ITEMS_IN_SINGLE_INVENTORY_REQUEST};
pub use session::Universe;
pub use trades::{TradeOfferResult, MAX_ITEMS_PER_TRADE, MAX_TRADES_PER_ACCOUNT};
