pub mod budget;
pub mod errors;
pub mod intake;
pub mod reference_sync;
pub mod transactions;
