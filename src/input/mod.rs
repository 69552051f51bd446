//! Input handling module
//!
//! Keyboard and mouse state fed from winit events.

mod state;

pub use state::Input;
