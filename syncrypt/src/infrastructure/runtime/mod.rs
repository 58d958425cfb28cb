// /////////////////////////////////////////////////////////////////////////////
// Syncrypt RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Runtime Infrastructure
//!
//! Resource governance for the async runtime: global cipher tokens and the
//! per-vault tracked operation semaphores.

pub mod resource_manager;

pub use resource_manager::{
    OpSemaphores, ResourceManager, TrackedPermit, TrackedSemaphore, CIPHER_TOKENS, RESOURCE_MANAGER,
};
