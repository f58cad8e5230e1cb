//! End-to-end dispatch scenarios, kept separate from the per-module unit
//! tests rather than inline in the modules they exercise.
