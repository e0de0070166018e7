pub mod conversations;
pub mod liveness;
pub mod messages;
pub mod readiness;
pub mod trials;
