// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Track classification.
//!
//! Maps an event type onto one of the three lanes. Total and pure: every
//! string has a lane, unknown and empty types fall back to `meta`.

use crate::types::Track;

const LABOR_TYPES: &[&str] = &["labor_event", "set_labor_active"];
const POSTPARTUM_TYPES: &[&str] = &["postpartum_checkin", "set_postpartum_active"];
const META_TYPES: &[&str] = &["note", "visit_task"];

/// Classify an event type. Rules are checked in priority order.
pub fn classify(event_type: &str) -> Track {
    if event_type.starts_with("contraction_") {
        return Track::Labor;
    }
    if LABOR_TYPES.contains(&event_type) {
        return Track::Labor;
    }
    if POSTPARTUM_TYPES.contains(&event_type) {
        return Track::Postpartum;
    }
    if event_type.starts_with("alert_") {
        return Track::Meta;
    }
    if META_TYPES.contains(&event_type) {
        return Track::Meta;
    }
    Track::Meta
}
