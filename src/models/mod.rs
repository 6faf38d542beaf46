pub mod ratelimit;
pub mod repository;
pub mod state;
