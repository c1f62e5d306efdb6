// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Bearer credential to principal resolution.
//!
//! Token issuance and rotation happen outside this service; the node only
//! checks what it is handed.

use crate::config::NodeConfig;
use caseline_kernel::sync::Principal;
use caseline_kernel::types::CaseId;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("unauthorized")]
pub struct Unauthorized;

pub trait PrincipalResolver: Send + Sync {
    fn resolve(&self, credential: &str) -> Result<Principal, Unauthorized>;
}

/// Fixed token table loaded from configuration.
#[derive(Default)]
pub struct StaticTokenResolver {
    tokens: HashMap<String, Principal>,
}

impl StaticTokenResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(cfg: &NodeConfig) -> Self {
        let mut resolver = Self::new();
        if let Some(token) = &cfg.admin_token {
            resolver = resolver.with_admin(token);
        }
        for (case_id, token) in &cfg.case_tokens {
            resolver = resolver.with_case(*case_id, token);
        }
        if resolver.tokens.is_empty() {
            tracing::warn!("No tokens configured: every request will be rejected");
        }
        resolver
    }

    pub fn with_admin(mut self, token: &str) -> Self {
        self.tokens.insert(token.to_string(), Principal::Administrator);
        self
    }

    pub fn with_case(mut self, case_id: CaseId, token: &str) -> Self {
        self.tokens.insert(token.to_string(), Principal::Case(case_id));
        self
    }
}

impl PrincipalResolver for StaticTokenResolver {
    fn resolve(&self, credential: &str) -> Result<Principal, Unauthorized> {
        if credential.is_empty() {
            return Err(Unauthorized);
        }
        self.tokens.get(credential).copied().ok_or(Unauthorized)
    }
}
