// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Document schema registration and validation.
//!
//! The key-value backend and the schema registry are both external
//! collaborators by contract: the Document Engine only needs a name ->
//! validator lookup at the `insert`/`update` call site. `registry.rs`
//! pins that contract down the way the teacher's `schema::validation`
//! module pinned down row validation against a `Schema`.

pub mod registry;

pub use registry::{permissive, SchemaRegistry, SchemaValidator};
