//! Request handlers.

pub mod account;
pub mod analyses;
pub mod health;
pub mod uploads;
pub mod webhook;

pub use account::*;
pub use analyses::*;
pub use health::*;
pub use uploads::*;
pub use webhook::*;
