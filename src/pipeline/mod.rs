pub mod analyzer;
pub mod auth;
pub mod batch_update;
pub mod fetcher;
pub mod generator;
pub mod html;
pub mod planner;
pub mod progress;
pub mod rendered;
pub mod response;
pub mod rollback;
pub mod runner;
#[cfg(test)]
mod tests;
