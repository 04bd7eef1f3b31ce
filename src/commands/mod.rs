pub mod behavior;
pub mod context;
pub mod descriptor;
pub mod lexer;
pub mod monitor;
pub mod pipeline;
pub mod registry;
