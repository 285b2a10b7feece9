//! Card scanner: photograph a trading card, identify it with a vision model and keep a
//! local, sortable collection of the cards you confirm.
//!
//! The pipeline is capture ([`capture`]) -> identify ([`gemini`], [`normalize`]) ->
//! confirm ([`card_scanner`]) -> persist ([`collection`], [`database`]). Each stage sits
//! behind a trait in [`traits`], so a UI can drive it and tests can swap in fakes.

pub mod capture;
pub mod card_scanner;
pub mod collection;
pub mod config;
pub mod database;
pub mod error;
pub mod gemini;
pub mod models;
pub mod normalize;
pub mod traits;
