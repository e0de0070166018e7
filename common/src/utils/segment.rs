//! Naming helpers for segmentations, segments and clusters.
//!
//! Segmentation names arrive from clients in free form ("Seg", "QUDO
//! Behavioural") and are stored normalized. Segments are persisted
//! namespaced under their segmentation (`<segmentation>_<segment>`); the
//! cluster name is the last underscore-delimited component.

/// Marker carried by every normalized segmentation name.
pub const SEGMENTATION_PREFIX: &str = "qudo";

/// Normalize a client-supplied segmentation name.
///
/// Adds the `qudo_` prefix when missing, then lowercases and replaces
/// spaces with underscores. Idempotent: normalizing an already-normalized
/// name returns it unchanged.
pub fn normalize_segmentation(raw: &str) -> String {
    let prefixed = if raw.contains(SEGMENTATION_PREFIX) {
        raw.to_string()
    } else {
        format!("{SEGMENTATION_PREFIX}_{raw}")
    };
    prefixed.to_lowercase().replace(' ', "_")
}

/// Namespace a segment under its segmentation.
///
/// Already-namespaced segments pass through unchanged, so the operation is
/// idempotent.
pub fn namespace_segment(segmentation: &str, segment: &str) -> String {
    let prefix = format!("{segmentation}_");
    if segment.starts_with(&prefix) {
        segment.to_string()
    } else {
        format!("{segmentation}_{segment}")
    }
}

/// Strip the segmentation namespace from a segment name, yielding the raw
/// segment used in storage paths.
pub fn strip_segmentation<'a>(segmentation: &str, segment: &'a str) -> &'a str {
    let prefix = format!("{segmentation}_");
    segment.strip_prefix(prefix.as_str()).unwrap_or(segment)
}

/// The cluster name of a namespaced segment.
pub fn cluster_name(segment: &str) -> &str {
    segment.rsplit('_').next().unwrap_or(segment)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_bare_segmentation() {
        assert_eq!(normalize_segmentation("Seg"), "qudo_seg");
        assert_eq!(normalize_segmentation("Shopping Behaviour"), "qudo_shopping_behaviour");
    }

    #[test]
    fn normalization_is_idempotent() {
        let once = normalize_segmentation("Seg");
        assert_eq!(normalize_segmentation(&once), once);

        let spaced = normalize_segmentation("QUDO Behavioural");
        assert_eq!(normalize_segmentation(&spaced), spaced);
    }

    #[test]
    fn namespaces_segment_once() {
        let segmentation = "qudo_seg";
        let namespaced = namespace_segment(segmentation, "convenience_seekers");
        assert_eq!(namespaced, "qudo_seg_convenience_seekers");
        assert_eq!(namespace_segment(segmentation, &namespaced), namespaced);
    }

    #[test]
    fn strips_namespace() {
        assert_eq!(
            strip_segmentation("qudo_seg", "qudo_seg_convenience_seekers"),
            "convenience_seekers"
        );
        // A segment stored without the namespace comes back untouched.
        assert_eq!(strip_segmentation("qudo_seg", "cluster1"), "cluster1");
    }

    #[test]
    fn cluster_is_last_component() {
        assert_eq!(cluster_name("qudo_seg_cluster1"), "cluster1");
        assert_eq!(cluster_name("cluster1"), "cluster1");
    }
}
