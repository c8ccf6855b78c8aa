//! Stacked-alpha video compositing
//!
//! Frames carry their color in the top half and an alpha mask in the bottom
//! half. The [`player::Player`] recombines them on a GPU (or the CPU
//! fallback) and fits the result to a container with the [`layout`] engine.

#[macro_use]
pub mod macros;

pub mod compositor;
pub mod config;
pub mod gpu;
pub mod layout;
pub mod manager;
pub mod media;
pub mod observer;
pub mod player;
pub mod scheduler;

pub use player::{Player, PlayerOptions};
