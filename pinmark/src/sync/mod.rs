pub mod cache;
pub mod cursor;
pub mod engine;
pub mod model;
pub mod reconcile;
pub mod session;
