pub mod identity;
pub mod blob;
pub mod record;
pub mod lookup;
pub mod key;
pub mod diff;

pub use identity::DiscIdentity;
pub use record::{IrdRecord, FileHashes, FileHash};
pub use lookup::{KeyDatabase, LookupConfig, RedumpClient};
pub use key::{KeyCandidate, KeyResolver, KeySource, ResolveHints};
pub use diff::{diff, diff_paths, DiffEntry, DiffReport};
