mod account_sync;
mod identity_propagation;

pub use account_sync::run_account_sync;
pub use identity_propagation::run_identity_propagation;
