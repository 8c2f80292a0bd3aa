//! Profile sync flow: load the signed-in user's profile, edit it, upload an
//! avatar and save through one shared path.

pub mod saver;
pub mod sync;

pub use self::saver::{ProfileSaver, SaveOutcome};
pub use self::sync::{Notice, ProfileSync, SyncState};
