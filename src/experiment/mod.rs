pub mod blocks;
pub mod build_cache;
pub mod commands;
pub mod contiki;
pub mod params;
pub mod structure;
pub mod templates;
pub mod wsn;
