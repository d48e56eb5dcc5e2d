//! Typed key definitions.

use crate::define_object_key;

// =============================================================================
// Watched Resources
// =============================================================================

define_object_key!(ResourceId, "resource");

// =============================================================================
// Scaling Targets
// =============================================================================

define_object_key!(TargetRef, "target");

#[cfg(test)]
mod tests {
    use super::*;
    use crate::IdError;
    use proptest::prelude::*;

    #[test]
    fn test_parse_and_display() {
        let id: ResourceId = "payments/nightly-scaler".parse().unwrap();
        assert_eq!(id.namespace(), "payments");
        assert_eq!(id.name(), "nightly-scaler");
        assert_eq!(id.to_string(), "payments/nightly-scaler");
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(
            ResourceId::parse(""),
            Err(IdError::Empty { field: "resource" })
        );
        assert!(matches!(
            TargetRef::parse("no-separator"),
            Err(IdError::MissingSeparator(_))
        ));
        assert!(matches!(
            TargetRef::parse("/api-hpa"),
            Err(IdError::Empty { field: "namespace" })
        ));
        assert!(matches!(
            TargetRef::parse("payments/API"),
            Err(IdError::InvalidCharacter { field: "name", .. })
        ));
    }

    #[test]
    fn test_serde_as_string() {
        let target = TargetRef::new("payments", "api-hpa").unwrap();
        let json = serde_json::to_string(&target).unwrap();
        assert_eq!(json, "\"payments/api-hpa\"");

        let back: TargetRef = serde_json::from_str(&json).unwrap();
        assert_eq!(back, target);

        assert!(serde_json::from_str::<TargetRef>("\"bad\"").is_err());
    }

    #[test]
    fn test_ordering_groups_by_namespace() {
        let mut ids = vec![
            ResourceId::new("b", "a").unwrap(),
            ResourceId::new("a", "z").unwrap(),
            ResourceId::new("a", "b").unwrap(),
        ];
        ids.sort();
        let rendered: Vec<String> = ids.iter().map(ToString::to_string).collect();
        assert_eq!(rendered, vec!["a/b", "a/z", "b/a"]);
    }

    proptest! {
        #[test]
        fn prop_roundtrip(ns in "[a-z0-9]([a-z0-9-]{0,20}[a-z0-9])?", name in "[a-z0-9]([a-z0-9.-]{0,40}[a-z0-9])?") {
            let id = ResourceId::new(ns.clone(), name.clone()).unwrap();
            let parsed = ResourceId::parse(&id.to_string()).unwrap();
            prop_assert_eq!(parsed.namespace(), ns.as_str());
            prop_assert_eq!(parsed.name(), name.as_str());
        }
    }
}
