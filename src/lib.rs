//! Astrometric matching engine.
//!
//! Astromatch identifies detected CCD stars against a reference catalog when
//! the pointing, pixel scale and orientation of the frame are only roughly
//! known. It searches for the similarity transform (rotation, scale,
//! translation) that maps detected pixel positions onto catalog positions
//! projected with a provisional guess, then folds that transform back into a
//! refined sky-to-pixel projection.

pub mod catalog;
pub mod fitting;
pub mod geom;
pub mod grid;
pub mod kdtree;
pub mod matcher;
pub mod orchestrator;
pub mod pipeline;
pub mod retry;
pub mod triangles;
pub mod tweak;
pub mod verify;
