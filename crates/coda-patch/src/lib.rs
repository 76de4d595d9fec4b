//! # coda-patch
//!
//! Pure text engines used by the Coda loop. Nothing here touches the
//! filesystem or spawns processes; every function is deterministic.
//!
//! - [`locate`] finds a fragment in a document while ignoring all whitespace,
//!   then maps the match back to exact byte offsets in the original text.
//! - [`apply`] applies an ordered replacement set all-or-nothing.
//! - [`count_unsafe`] measures how much code sits inside unsafe blocks.

mod apply;
mod locate;
mod safety;

pub use apply::{apply, apply_proposal};
pub use locate::{count_occurrences, locate, normalize, Span};
pub use safety::{count_unsafe, count_unsafe_with_keyword, strip_comments, SafetyScanner};
