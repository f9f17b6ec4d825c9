// Test harness: in-memory backends, GL call recording and the scenario runner
//
// Compiled for unit tests and for the `integration_tests` binary
// (feature `test-harness`).

pub mod fake_gl;
pub mod loopback;
pub mod permutations;
pub mod runner;
pub mod scripted;
pub mod validators;
