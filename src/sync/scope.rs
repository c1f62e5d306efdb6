// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Caller identity and the single-case scope every operation runs under.

use crate::error::SyncError;
use crate::types::{CaseId, Source};

/// Who is calling, as vouched for by an external principal resolver.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Principal {
    /// Patient side client bound to exactly one case.
    Case(CaseId),
    /// Midwife side client with access to every case.
    Administrator,
}

impl Principal {
    pub fn can_access(&self, case_id: CaseId) -> bool {
        match self {
            Principal::Case(own) => *own == case_id,
            Principal::Administrator => true,
        }
    }

    pub fn authorize(&self, case_id: CaseId) -> Result<(), SyncError> {
        if self.can_access(case_id) {
            Ok(())
        } else {
            Err(SyncError::Forbidden)
        }
    }

    pub fn require_administrator(&self) -> Result<(), SyncError> {
        match self {
            Principal::Administrator => Ok(()),
            Principal::Case(_) => Err(SyncError::Forbidden),
        }
    }

    /// Provenance stamped onto events this principal submits.
    pub fn source(&self) -> Source {
        match self {
            Principal::Case(_) => Source::Woman,
            Principal::Administrator => Source::Midwife,
        }
    }

    /// Label sent to real-time observers.
    pub fn user_type(&self) -> &'static str {
        match self {
            Principal::Case(_) => "woman",
            Principal::Administrator => "midwife",
        }
    }

    /// Subject sent to real-time observers. Administrator tokens carry none.
    pub fn user_id(&self) -> Option<String> {
        match self {
            Principal::Case(case_id) => Some(case_id.to_string()),
            Principal::Administrator => None,
        }
    }
}

/// A principal narrowed to one case.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CallerScope {
    case_id: CaseId,
    source: Source,
}

impl CallerScope {
    /// Narrow a principal to a case.
    ///
    /// Case-bound principals may omit the case or repeat their own.
    /// Administrators must name one.
    pub fn resolve(principal: &Principal, requested: Option<CaseId>) -> Result<Self, SyncError> {
        let case_id = match (principal, requested) {
            (Principal::Case(own), None) => *own,
            (Principal::Case(own), Some(req)) if *own == req => req,
            (Principal::Case(_), Some(_)) => return Err(SyncError::Forbidden),
            (Principal::Administrator, Some(req)) => req,
            (Principal::Administrator, None) => {
                return Err(SyncError::InvalidInput("case_id_required".to_string()))
            }
        };
        Ok(Self {
            case_id,
            source: principal.source(),
        })
    }

    /// Scope for events the server itself originates.
    pub fn system(case_id: CaseId) -> Self {
        Self {
            case_id,
            source: Source::System,
        }
    }

    pub fn case_id(&self) -> CaseId {
        self.case_id
    }

    pub fn source(&self) -> Source {
        self.source
    }
}
