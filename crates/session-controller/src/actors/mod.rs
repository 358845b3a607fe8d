//! Actor model implementation.
//!
//! Two actors per call, mirroring the two halves of the negotiation:
//!
//! - [`session::SessionActor`] runs the signaling state machine and owns
//!   the relay channel.
//! - [`coordinator::CoordinatorActor`] owns the media engine handle and
//!   the remote candidate buffer.
//!
//! All mutating operations of a session execute on these two tasks in
//! mailbox order; public entry points post and never block the caller.

pub mod coordinator;
pub mod messages;
pub mod session;

pub use coordinator::{CoordinatorActor, CoordinatorHandle};
pub use messages::{
    CandidateStage, ConnectionState, CoordinatorCommand, CoordinatorEvent, CoordinatorState,
    SessionCommand, SessionEvent,
};
pub use session::{SessionActor, SessionHandle};
