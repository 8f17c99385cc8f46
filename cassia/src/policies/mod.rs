//! This module holds policies, which are entities that allow configuring
//! the driver's behaviour in various aspects. The common feature of all policies
//! is that users can implement a policy on their own (because they simply need
//! to implement a certain trait), allowing flexible customizability of the driver.
//!
//! This includes:
//! - [load balancing](load_balancing), which decides which nodes a request is sent to,
//! - [retry](retry), which decides whether and where a failed request is sent again.

pub mod load_balancing;
pub mod retry;
