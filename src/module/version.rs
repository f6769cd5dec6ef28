//! Semantic version parsing and compatibility checking
//!
//! The compatibility rule is deliberately narrower than full semver ranges:
//! major versions must match exactly and the provider's minor must be at
//! least the required minor. Patch levels never affect compatibility.

/// Parsed `MAJOR.MINOR.PATCH` version. Anything after the patch number
/// (pre-release/build tags) is accepted and ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

/// Parse a full module version. Requires all three numeric components.
pub fn parse(s: &str) -> Option<Version> {
    let mut parts = s.splitn(3, '.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next()?.parse().ok()?;
    let rest = parts.next()?;
    // Patch may carry a tag: "3-beta", "3+build.1"
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    let tag = &rest[digits.len()..];
    if !tag.is_empty() && !tag.starts_with('-') && !tag.starts_with('+') {
        return None;
    }
    Some(Version {
        major,
        minor,
        patch: digits.parse().ok()?,
    })
}

/// Parsed version requirement: `MAJOR`, `MAJOR.MINOR`, or a full version
/// whose patch is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Requirement {
    pub major: u64,
    pub minor: Option<u64>,
}

/// Parse a dependency version requirement.
pub fn parse_requirement(s: &str) -> Option<Requirement> {
    let mut parts = s.splitn(3, '.');
    let major = parts.next()?.parse().ok()?;
    let minor = match parts.next() {
        Some(m) => Some(m.parse().ok()?),
        None => None,
    };
    if let Some(patch) = parts.next() {
        // Full version used as a requirement: patch must at least look numeric
        let digits: String = patch.chars().take_while(|c| c.is_ascii_digit()).collect();
        if digits.is_empty() {
            return None;
        }
    }
    Some(Requirement { major, minor })
}

/// Check a provider version against a requirement.
///
/// Returns `Err(reason)` on mismatch: major must match exactly, provider
/// minor must be >= required minor.
pub fn check_compatible(required: &str, provided: &str) -> Result<(), String> {
    let requirement = parse_requirement(required)
        .ok_or_else(|| format!("unparseable version requirement {:?}", required))?;
    let version =
        parse(provided).ok_or_else(|| format!("unparseable provider version {:?}", provided))?;

    if version.major != requirement.major {
        return Err(format!(
            "major version mismatch (required {}, provided {})",
            requirement.major, version.major
        ));
    }
    if let Some(min_minor) = requirement.minor {
        if version.minor < min_minor {
            return Err(format!(
                "minor version too low (required >= {}, provided {})",
                min_minor, version.minor
            ));
        }
    }
    Ok(())
}
