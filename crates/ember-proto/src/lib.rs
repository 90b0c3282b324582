//! ember-proto - the protocol layer of the Ember IRC daemon.
//!
//! Pure data transforms with no I/O: case-mapping, token streams, glob and
//! CIDR matching, line parsing with IRCv3 tags, wire serialization, numeric
//! replies and IRCv3 standard replies. The daemon crate owns all state and
//! networking; everything here is independently testable.

pub mod casemap;
pub mod cidr;
pub mod line;
pub mod message;
pub mod numeric;
pub mod reply;
pub mod serialize;
pub mod tags;
pub mod tokens;
pub mod wildcard;

pub use casemap::Casemap;
pub use line::{parse_line, LineError, ParseLimits};
pub use message::{Message, Tag};
pub use numeric::{Numeric, NumericBuilder};
pub use reply::{ReplyKind, StandardReply};
pub use tokens::{parse_ports, SepStream, TokenStream};
