// The clients defined here wrap reqwest for the external collaborators:
// the TURN credential vendor and the analytics endpoint.

pub mod metrics;
pub mod turn;
