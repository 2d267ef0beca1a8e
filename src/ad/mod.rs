pub mod loader;
pub mod selector;
pub mod tracked;
