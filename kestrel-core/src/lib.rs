pub mod chess;
pub mod env;
pub mod network;
pub mod zero;
