//! Local-first repositories.
//!
//! Every write goes to the local store with `is_synced = 0` and a fresh
//! `updated_at`; the next sync cycle pushes it.

mod branches;
mod profiles;

pub use branches::BranchRepo;
pub use profiles::ProfileRepo;
