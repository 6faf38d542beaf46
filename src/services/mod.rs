pub mod credentials;
pub mod lister;
pub mod orchestrator;
pub mod ratelimit;
pub mod scanner;
pub mod transport;
