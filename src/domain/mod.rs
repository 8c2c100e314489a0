pub mod budget;
pub mod einvoice;
pub mod environment;
pub mod intake;
pub mod models;
pub mod reference;
