pub mod pool;
pub mod process;
