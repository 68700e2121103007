//! Pipeline stages.
//!
//! Each module owns one stage of the sorting workflow: session/electrode
//! registration, sort-group assignment, recording preparation, sorter
//! execution, quality metrics, curation, and finalization. Stages share the
//! core store handle and engine seams; control flows session → grouping →
//! recording → sorting → metrics → curation (repeatable) → finalize.

pub mod curation;
pub mod finalize;
pub mod grouping;
pub mod metrics;
pub mod recording;
pub mod session;
pub mod sorting;
