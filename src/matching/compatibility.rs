//! Pairing compatibility between two users

use crate::types::{GenderPreference, UserProfile};

/// Whether `a` wants to be paired with `b`
pub fn wants(a: &UserProfile, b: &UserProfile) -> bool {
    match a.looking_for {
        GenderPreference::Any => true,
        GenderPreference::Only(gender) => b.declared_gender == Some(gender),
    }
}

/// Two users are compatible iff each wants the other
pub fn compatible(a: &UserProfile, b: &UserProfile) -> bool {
    wants(a, b) && wants(b, a)
}
