// Shared test fixtures and utilities for integration tests
//
// This module provides:
// - Application/state builders over in-memory stores (helpers.rs)
// - Request helpers driving the axum router through tower::ServiceExt
// - JWT fixtures for the authentication tests

pub mod helpers;
