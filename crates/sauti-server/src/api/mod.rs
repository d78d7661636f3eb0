pub mod health;
pub mod request_context;
pub mod router;
pub mod voice;

pub use router::create_router;
