//! Escalation assessment and routing.

pub mod policy;

pub use policy::EscalationPolicy;
