//! Image reference helpers

/// The `latest` variant of a tagged reference
///
/// Returns `None` when the reference is untagged (it already means `latest`)
/// or is already tagged `latest`. A colon before the last `/` is a registry
/// port, not a tag.
pub fn latest_variant(reference: &str) -> Option<String> {
    let colon = reference.rfind(':')?;
    if let Some(slash) = reference.rfind('/') {
        if colon < slash {
            return None;
        }
    }

    let (base, tag) = (&reference[..colon], &reference[colon + 1..]);
    if tag == "latest" {
        return None;
    }

    Some(format!("{}:latest", base))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tagged_reference() {
        assert_eq!(
            latest_variant("registry.local/app:1.2.0").as_deref(),
            Some("registry.local/app:latest")
        );
    }

    #[test]
    fn test_registry_port_is_not_a_tag() {
        assert_eq!(
            latest_variant("host:5000/team/app:1.0").as_deref(),
            Some("host:5000/team/app:latest")
        );
        assert_eq!(latest_variant("host:5000/team/app"), None);
    }

    #[test]
    fn test_latest_and_untagged_need_nothing() {
        assert_eq!(latest_variant("app:latest"), None);
        assert_eq!(latest_variant("app"), None);
    }
}
