//! # Architecture Abstraction Layer
//!
//! Provides a hardware abstraction boundary for the scheduler.
//! Currently implements the Cortex-M4 port; the scheduler itself only sees
//! stack pointers as addresses and timestamps as integers.

pub mod cortex_m4;
