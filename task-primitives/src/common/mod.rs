// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Small shared helpers used by more than one subsystem.

mod fifo_waiters;

pub use fifo_waiters::FifoWaiters;
