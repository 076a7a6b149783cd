// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain Tag Validation
//!
//! Trajectories and patterns are grouped by a short domain tag such as
//! `python`, `k8s.deploy` or `sql_migrations`. Tags are ASCII, start with an
//! alphanumeric character and stay within [`MAX_DOMAIN_LEN`] bytes.

use once_cell::sync::Lazy;
use regex::Regex;

use super::errors::{CortexError, CortexResult};

pub const MAX_DOMAIN_LEN: usize = 64;

static DOMAIN_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.\-]*$").expect("valid domain tag pattern"));

pub fn validate_domain(domain: &str) -> CortexResult<()> {
    if domain.is_empty() || domain.len() > MAX_DOMAIN_LEN || !DOMAIN_TAG.is_match(domain) {
        return Err(CortexError::InvalidDomain(domain.to_string()));
    }
    Ok(())
}
