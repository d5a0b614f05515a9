use serde::Serialize;
use serde_json::Value;

/// Patch submitted to an autoscaler object.
///
/// Scale-up uses a one-shot merge-patch. Reconcile and revert use ordered JSON-patches,
/// which allow conditional add/remove of the status annotation without clobbering
/// annotations owned by other controllers.
#[derive(Clone, Debug, PartialEq)]
pub enum AutoscalerPatch {
    Merge(Value),
    Json(Vec<PatchOperation>),
}

/// A single RFC 6902 operation. Serializes to the wire format, e.g.
/// `{"op": "replace", "path": "/spec/minReplicas", "value": 4}`.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum PatchOperation {
    Add { path: String, value: Value },
    Replace { path: String, value: Value },
    Remove { path: String },
}

/// Escape a single JSON Pointer path segment per RFC 6901 (`~` -> `~0`, `/` -> `~1`).
pub fn escape_pointer_segment(segment: &str) -> String {
    segment.replace('~', "~0").replace('/', "~1")
}

/// JSON Pointer path of a metadata annotation.
pub fn annotation_path(annotation: &str) -> String {
    format!("/metadata/annotations/{}", escape_pointer_segment(annotation))
}

#[cfg(test)]
mod tests {
    use super::*;

    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case("klutch.it/status", "/metadata/annotations/klutch.it~1status")]
    #[case("plain", "/metadata/annotations/plain")]
    #[case("weird~key/x", "/metadata/annotations/weird~0key~1x")]
    fn test_annotation_path(#[case] annotation: &str, #[case] expected: &str) {
        assert_eq!(annotation_path(annotation), expected);
    }

    #[test]
    fn test_patch_operation_wire_format() {
        let ops = vec![
            PatchOperation::Replace {
                path: "/spec/minReplicas".to_owned(),
                value: json!(4),
            },
            PatchOperation::Remove {
                path: annotation_path("klutch.it/status"),
            },
        ];

        assert_eq!(
            serde_json::to_value(&ops).expect("Failed to serialize patch"),
            json!([
                {"op": "replace", "path": "/spec/minReplicas", "value": 4},
                {"op": "remove", "path": "/metadata/annotations/klutch.it~1status"},
            ])
        );
    }
}
