pub mod vault;

pub use vault::{build_legislator_index, write_vote_note, VaultPaths};
