//! Table expiration: the per-table decision and its dataset-wide application.

pub mod config;
pub mod policy;
pub mod propagation;

pub use config::{BaseDate, ExpirationPolicy, ExpirationValue, PropagationOptions};
pub use policy::{Decision, ExpirationError, SkipReason, TableExpiration, decide};
pub use propagation::{
    ExpirationPropagator, PropagationError, PropagationFailure, PropagationReport, TableAction,
    TableOutcome,
};
