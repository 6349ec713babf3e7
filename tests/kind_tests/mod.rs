//! Integration tests for migrator
//!
//! Tests are organized by the story they tell:
//!
//! - `migrate_e2e`: a namespace with a configmap and a pod moves to an
//!   empty destination, and a destination that already holds a conflicting
//!   object reports the conflict without aborting

mod migrate_e2e;
