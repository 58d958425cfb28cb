// /////////////////////////////////////////////////////////////////////////////
// Syncrypt RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Sync Events
//!
//! Notifications the core emits for observers (stat displays, GUIs). Events
//! are fire-and-forget: the engine never blocks on a slow or absent
//! subscriber.

/// Observable progress of the sync engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// A bundle's sizes and crypt hash were recomputed
    BundleUpdated { relpath: String },
    /// A bundle's encrypted body reached the server
    UploadCompleted { relpath: String },
    /// A bundle was restored from the server and verified
    DownloadCompleted { relpath: String },
    /// A revision was validated and applied locally
    RevisionApplied { revision_id: String },
    /// A push finished
    PushCompleted { uploaded: usize, revisions: usize },
    /// A pull finished
    PullCompleted { applied: usize, downloaded: usize },
}
