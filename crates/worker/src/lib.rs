pub mod detector;
pub mod error;
pub mod hooks;
pub mod messenger;
pub mod notify;
pub mod routes;
pub mod scheduler;
pub mod state;
