pub mod observer;
pub mod report;
