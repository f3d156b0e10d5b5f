//! Comparison of dotted version strings used by `semver_*` match types.
//!
//! Versions are compared only up to the precision of the target version, so a target of `2.0`
//! matches any user version `2.0.x`. Pre-release (`-`) and build (`+`) suffixes are kept as an
//! extra opaque component.
use std::cmp::Ordering;

use crate::conditions::ConditionError;

const PRE_RELEASE: char = '-';
const BUILD: char = '+';

/// Compare `user` version against `target` version.
///
/// Returns `Ordering::Greater` if `user` is newer than `target`, `Ordering::Less` if it is older
/// and `Ordering::Equal` if both match up to the precision of `target`.
pub fn compare(target: &str, user: &str) -> Result<Ordering, ConditionError> {
    let target_is_pre_release = is_pre_release(target);
    let user_is_pre_release = is_pre_release(user);

    let target_parts = split(target)?;
    let user_parts = split(user)?;

    for (idx, target_part) in target_parts.iter().enumerate() {
        let Some(user_part) = user_parts.get(idx) else {
            return Ok(if target_is_pre_release {
                Ordering::Greater
            } else {
                Ordering::Less
            });
        };

        if is_numeric(user_part) && is_numeric(target_part) {
            match compare_numeric(user_part, target_part) {
                Ordering::Equal => {}
                other => return Ok(other),
            }
        } else {
            match user_part.cmp(target_part) {
                Ordering::Less => {
                    return Ok(if target_is_pre_release && !user_is_pre_release {
                        Ordering::Greater
                    } else {
                        Ordering::Less
                    });
                }
                Ordering::Greater => {
                    return Ok(if user_is_pre_release && !target_is_pre_release {
                        Ordering::Less
                    } else {
                        Ordering::Greater
                    });
                }
                Ordering::Equal => {}
            }
        }
    }

    if user_is_pre_release && !target_is_pre_release {
        return Ok(Ordering::Less);
    }

    Ok(Ordering::Equal)
}

/// A version is a pre-release if `-` appears before any `+`.
fn is_pre_release(version: &str) -> bool {
    match (version.find(PRE_RELEASE), version.find(BUILD)) {
        (Some(dash), Some(plus)) => dash < plus,
        (Some(_), None) => true,
        _ => false,
    }
}

/// A version has build metadata if `+` appears before any `-`.
fn is_build(version: &str) -> bool {
    match (version.find(PRE_RELEASE), version.find(BUILD)) {
        (Some(dash), Some(plus)) => plus < dash,
        (None, Some(_)) => true,
        _ => false,
    }
}

/// Split a version into its dotted numeric components followed by the suffix, if any.
fn split(version: &str) -> Result<Vec<&str>, ConditionError> {
    if version.contains(' ') {
        return Err(ConditionError::InvalidSemanticVersion);
    }

    let (prefix, suffix) = if is_pre_release(version) {
        split_once(version, PRE_RELEASE)
    } else if is_build(version) {
        split_once(version, BUILD)
    } else {
        (version, None)
    };

    let dot_count = prefix.matches('.').count();
    if dot_count > 2 {
        return Err(ConditionError::InvalidSemanticVersion);
    }

    let mut parts: Vec<&str> = prefix.split('.').collect();
    if parts.len() != dot_count + 1 || !parts.iter().all(|part| is_numeric(part)) {
        return Err(ConditionError::InvalidSemanticVersion);
    }

    parts.extend(suffix);
    Ok(parts)
}

fn split_once(version: &str, separator: char) -> (&str, Option<&str>) {
    match version.split_once(separator) {
        Some((prefix, suffix)) => (prefix, Some(suffix)),
        None => (version, None),
    }
}

fn is_numeric(part: &str) -> bool {
    !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit())
}

/// Compare two digit strings by numeric value without overflowing.
fn compare_numeric(a: &str, b: &str) -> Ordering {
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}
