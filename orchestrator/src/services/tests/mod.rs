//! Service-level tests

mod checkpoint;
