//! Catalog writes: primary selection, upserts and deletes, domain-model
//! cleanup, and tagging.

pub mod domain;
pub mod mutate;
pub mod primary;
pub mod tagging;

pub use domain::DomainModel;
pub use mutate::{CatalogMutator, MutationSummary};
pub use primary::{PrimaryChoice, select_primary};
pub use tagging::{TagSummary, groups_for_paths, tag_paths};
