pub mod consistent_hashing;
pub mod events;
pub mod hash_ring;
pub mod migration;

pub use events::{Departure, LeaveReason, MembershipEventSink};
pub use hash_ring::{HashRing, RingEntry};
pub use migration::{plan_departures, MigrationPlan, MigrationTask};
