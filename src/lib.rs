//! tetatet: anonymous one-on-one chat relay for Telegram.
//!
//! Users wait in a pairing queue, get matched with a random stranger and
//! chat through the bot without learning who is on the other side.
//! Reports accumulate into bans; a single moderator gets a small command
//! surface.
//!
//! Layers, leaf first: [`types`], [`store`], [`pairing`], [`policy`],
//! [`notify`], [`session`], [`telegram`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod logging;
pub mod types;

pub mod notify;
pub mod pairing;
pub mod policy;
pub mod store;

pub mod session;
pub mod telegram;
