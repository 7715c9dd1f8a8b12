/*
 * NamespaceLabel Operator - Declarative namespace labels for Kubernetes
 * Copyright (C) 2025 NamespaceLabel team
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published
 * by the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program. If not, see <https://www.gnu.org/licenses/>.
 */

#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc, clippy::doc_markdown)]

//! NamespaceLabel operator core library
//!
//! Syncs the labels declared by `NamespaceLabel` resources onto the namespace
//! they live in, keeping cluster-management labels intact and retracting
//! labels when a `NamespaceLabel` is deleted.

pub mod config;
pub mod controller;
pub mod crds;
pub mod labels;
pub mod store;

// Re-export commonly used types
pub use config::OperatorConfig;
pub use controller::{ReconcileOutcome, Reconciler};
pub use crds::{NamespaceLabel, NamespaceLabelSpec};
pub use store::{ObjectKey, ObjectStore, StoreError};
