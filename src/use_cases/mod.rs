pub mod election;
pub mod ids;
pub mod session;
pub mod timeout;
