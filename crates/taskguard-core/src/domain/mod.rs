//! Domain model (keys, records, policy, outcomes, events, errors).

pub mod errors;
pub mod events;
pub mod handle;
pub mod ids;
pub mod key;
pub mod outcome;
pub mod record;
pub mod state;

pub use self::errors::{ErrorKind, GuardError};
pub use self::events::GuardEvent;
pub use self::handle::LockHandle;
pub use self::ids::RunId;
pub use self::key::{LockKey, ResourceId, TaskType};
pub use self::outcome::{Acquisition, Outcome, RejectReason, ReleaseOutcome};
pub use self::record::{Admission, LockRecord};
pub use self::state::{LockPolicy, LockStatus, TerminalStatus};
