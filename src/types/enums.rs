// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Closed vocabularies persisted with every event.

use core::fmt;
use serde::{Deserialize, Serialize};

/// Clinical lane of an event. Always derived server side.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Track {
    Labor,
    Postpartum,
    Meta,
}

impl Track {
    pub fn as_str(&self) -> &'static str {
        match self {
            Track::Labor => "labor",
            Track::Postpartum => "postpartum",
            Track::Meta => "meta",
        }
    }
}

/// Provenance of an event, stamped by the ingestion path.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Woman,
    Midwife,
    System,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Woman => "woman",
            Source::Midwife => "midwife",
            Source::System => "system",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseStatus {
    Active,
    Closed,
}

impl CaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaseStatus::Active => "active",
            CaseStatus::Closed => "closed",
        }
    }
}

impl fmt::Display for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for CaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
