//! Server state: users, channels, and the single-owner [`world::World`]
//! container the engine task mutates.

pub mod channel;
pub mod persistence;
pub mod uid;
pub mod user;
pub mod world;

pub use channel::{Channel, ListModeEntry, Membership, Topic};
pub use uid::UidGenerator;
pub use user::{RegProgress, User, UserModes};
pub use world::{Link, RegOutcome, World};
