//! Background tasks spawned once at startup.

pub mod delivery;
pub mod detector;
pub mod prune;
