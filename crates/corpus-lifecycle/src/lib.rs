//! Soft-delete lifecycle for the corpus knowledge store.
//!
//! Documents move `active → deleting → {active | purging → purged}`. The
//! trash manager drives the transitions; the sweeper retires expired trash
//! entries on its own schedule, talking to the request path only through
//! persisted state.

pub mod sweeper;
pub mod trash;

pub use sweeper::PurgeSweeper;
pub use trash::TrashManager;
