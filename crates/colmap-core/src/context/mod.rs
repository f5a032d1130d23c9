//! Persistence and flush contexts.

pub(crate) mod flush;
mod persistence;

pub use flush::{BatchingFlushContext, FlushContext, FlushMode, ImmediateFlushContext, Undo};
pub(crate) use persistence::LoadedValues;
pub use persistence::{ContextTarget, Options, PersistenceContext};
