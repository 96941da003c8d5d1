//! Adaptive ambient-light sensing and backlight actuation.
//!
//! The crate continuously estimates ambient light from a noisy optical
//! sensor and drives a stepped display backlight to match, with outlier
//! rejection, screen-bleed correction, a solar-position-aware sampling
//! cadence and hysteresis against flicker. Device drivers, ephemeris and any
//! front-end are external collaborators behind the traits in [`sensors`],
//! [`backlight`] and [`solar`].

pub mod backlight;
pub mod config;
pub mod control;
pub mod filter;
pub mod guard;
pub mod mapper;
pub mod record;
pub mod sensors;
pub mod solar;
mod utils;

pub use config::Settings;
pub use control::{Collaborators, LoopController, LoopHandle};
