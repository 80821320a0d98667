/*
 * 5D Labs Agent Platform - Fragment Render Controller
 * Copyright (C) 2025 5D Labs
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

//! Render controller library
//!
//! Watches `FragmentGroup` and `Fragment` resources and keeps one rendered,
//! content-addressed `Fragment` per group. The crate contains the CRDs, the
//! reconciliation engine (work queue, dispatcher, reconciler, retry handling)
//! and a Kubernetes-backed repository used by the `render-controller` binary.

pub mod crds;
pub mod render;

// Re-export commonly used types
pub use crds::{
    Fragment, FragmentGroup, FragmentGroupSpec, FragmentGroupStatus, FragmentSpec,
    RenderedConfiguration,
};
pub use render::bootstrap::{run_bootstrap, BootstrapOutput};
pub use render::config::RenderConfig;
pub use render::controller::RenderController;
pub use render::types::{Error, Result};
