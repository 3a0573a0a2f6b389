#![forbid(unsafe_code)]

//! Rivulet: a push-pull reactive timeline.
//!
//! The crate maintains a DAG of reactive values owned by a [`Timeline`]
//! and propagates updates from inputs to dependents. Three kinds of
//! reactive value are exposed:
//!
//! - [`Event`] — a value that exists only at discrete instants.
//! - [`State`] — a stepwise function of time, always carrying a value.
//! - [`Behavior`] — a sampled value, consulted at sampling time only.
//!
//! Updates are pushed to listeners or to dirty markers and pulled on
//! demand at the next read, so unobserved parts of the graph cost
//! nothing until sampled. With time travel enabled the timeline records
//! every external update and can restore any recorded frame.
//!
//! # Example
//!
//! ```
//! use rivulet_core::{Scope, Timeline, TimelineConfig};
//!
//! let timeline = Timeline::new(Scope::new(), TimelineConfig::new());
//! let a = timeline.mutable_state(1, Some("a"));
//! let b = timeline.mutable_state(2, Some("b"));
//! let sum = a.combine_with(&b, |x, y| x + y);
//! assert_eq!(sum.value(), 3);
//!
//! a.set(10).unwrap();
//! assert_eq!(sum.value(), 12);
//! ```
//!
//! Events fire, states step, and folds accumulate:
//!
//! ```
//! use rivulet_core::{EventState, Scope, State, Timeline, TimelineConfig};
//!
//! let timeline = Timeline::new(Scope::new(), TimelineConfig::new());
//! let clicks = timeline.broadcast_event::<u32>(Some("clicks"));
//! let total = State::fold(0u32, &clicks.event(), |acc, n| acc + n);
//!
//! clicks.send(2).unwrap();
//! clicks.send(3).unwrap();
//! assert_eq!(total.value(), 5);
//! assert_eq!(clicks.sample(), EventState::Fired(3));
//! ```

mod behavior;
mod error;
mod event;
mod node;
mod occurrence;
mod scope;
mod state;
mod timeline;

pub use behavior::Behavior;
pub use error::{Result, TimelineError};
pub use event::{BroadcastEvent, Event};
pub use node::{ListenerId, NodeId};
pub use occurrence::{EventState, Leftmost, MergeStrategy};
pub use scope::{CancelToken, Scope};
pub use state::{MutableState, State, Subscription};
pub use timeline::{
    DEFAULT_CLOCK_TICK, ClockFactory, ExternalEvent, Timeline, TimelineConfig, broadcast_event,
    current_timeline, initialize, mutable_state_of, next_state, reset_state, rollback_state,
};
