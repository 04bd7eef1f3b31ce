pub mod settings;
pub mod simulation;

pub use settings::Settings;
