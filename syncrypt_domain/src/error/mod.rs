// /////////////////////////////////////////////////////////////////////////////
// Syncrypt RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Domain Error Module
//!
//! Error types for the vault synchronization domain. Every failure mode the
//! sync engine can observe is represented here so that callers can branch on
//! the *kind* of failure rather than string-matching messages.
//!
//! ## Error Categories
//!
//! - **Authentication**: credentials or tokens rejected by the server
//! - **Protocol**: unexpected lines, framing, or size mismatches on the wire
//! - **Data integrity**: padding, hash mismatches, undecodable object maps
//! - **Revision log**: signature or parent-chain violations
//! - **Infrastructure**: filesystem and socket failures, configuration issues

mod sync_error;

pub use sync_error::SyncError;
