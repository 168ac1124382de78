pub mod engine;
pub mod topic;

pub use engine::SubscriptionRegistry;

#[cfg(test)]
mod tests;
