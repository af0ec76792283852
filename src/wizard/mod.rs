//! Intake wizard — the founder registration flow.
//!
//! A registrant moves through a fixed sequence of steps. Progress lives in a
//! `Session` that is mirrored in a local cache and persisted to the record
//! server after every step. On every entry the wizard reconciles those
//! sources and recomputes where the user should land.

pub mod catalog;
pub mod manager;
pub mod merge;
pub mod model;
pub mod reconcile;
pub mod resolver;
pub mod validation;

#[cfg(test)]
pub(crate) mod testing;

pub use catalog::{StepCatalog, StepDescriptor, StepKey};
pub use manager::{ActiveSession, StepOutcome, WizardManager};
pub use model::{
    AuxiliaryState, ProcessingResult, Reservation, ReservationStatus, Session, SessionRecord,
    StepData,
};
pub use reconcile::{
    BootstrapContext, BootstrapMode, BootstrapOutcome, Degradation, EmailLookup, Reconciler,
    ReservationClaim, Strategy,
};
pub use resolver::resolve_step_index;
