//! The concurrent tracking engine: object store, worker pool, shared
//! snapshot state, and the tick orchestrator that ties them together.

pub mod object;
mod orchestrator;
mod pool;
mod state;

pub use object::{
    ObjectHandle, ObjectStore, TrackedObject, DECAY_APOGEE_KM, MOON_CATALOG_ID, SUN_CATALOG_ID,
};
pub use orchestrator::*;
pub use pool::*;
pub use state::*;
