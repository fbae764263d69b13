//! Reconciliation controller that keeps ephemeral build-farm workers
//! aligned with dispatcher backlog (see `SPEC_FULL.md`).

pub mod context;
pub mod controller;
pub mod deployer;
pub mod engine;
pub mod error;
pub mod policy;
pub mod reconciler;
pub mod retirement;
pub mod roster;
pub mod sizer;
pub mod status;
