//! User-visible synchronization primitives: mutexes and condition
//! variables, both backed by queue-based blocking rather than spinning.

pub mod condvar;
pub mod mutex;
