pub mod identity;
pub mod store;
pub mod types;

pub use identity::{KEY_SEPARATOR, LEGACY_SUFFIX, PHASE_MARKER, PhaseIdentity, Scope, derive_key, slugify};
pub use store::PhaseLegacyStore;
pub use types::{LegacyError, LegacyRecord, LegacyResult};
