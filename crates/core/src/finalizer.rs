//! Idempotent edits of an entity's finalizer list.
//!
//! All functions mutate in memory only and report whether anything changed;
//! callers persist only on `true` so repeated passes do not produce redundant
//! writes (and the version conflicts that come with them).

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

pub fn has_finalizer(meta: &ObjectMeta, marker: &str) -> bool {
    meta.finalizers.as_ref().map(|f| f.iter().any(|m| m == marker)).unwrap_or(false)
}

/// Append every missing marker. Order of existing markers is preserved.
pub fn add_finalizers(meta: &mut ObjectMeta, markers: &[&str]) -> bool {
    let list = meta.finalizers.get_or_insert_with(Vec::new);
    let before = list.len();
    for marker in markers {
        if !list.iter().any(|m| m == marker) {
            list.push((*marker).to_string());
        }
    }
    list.len() != before
}

pub fn remove_finalizers(meta: &mut ObjectMeta, markers: &[&str]) -> bool {
    let Some(list) = meta.finalizers.as_mut() else { return false };
    let before = list.len();
    list.retain(|m| !markers.contains(&m.as_str()));
    list.len() != before
}

pub fn remove_all_finalizers(meta: &mut ObjectMeta) -> bool {
    match meta.finalizers.as_mut() {
        Some(list) if !list.is_empty() => {
            list.clear();
            true
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(finalizers: &[&str]) -> ObjectMeta {
        ObjectMeta { finalizers: Some(finalizers.iter().map(|s| s.to_string()).collect()), ..Default::default() }
    }

    #[test]
    fn add_is_monotonic() {
        let mut m = ObjectMeta::default();
        assert!(add_finalizers(&mut m, &["a", "b"]));
        assert!(!add_finalizers(&mut m, &["a", "b"]));
        assert!(add_finalizers(&mut m, &["b", "c"]));
        assert_eq!(m.finalizers.unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn add_duplicate_marker_in_one_call_is_stored_once() {
        let mut m = ObjectMeta::default();
        assert!(add_finalizers(&mut m, &["a", "a"]));
        assert_eq!(m.finalizers.unwrap(), vec!["a"]);
    }

    #[test]
    fn remove_reports_only_real_changes() {
        let mut m = meta(&["a", "b", "c"]);
        assert!(remove_finalizers(&mut m, &["b"]));
        assert!(!remove_finalizers(&mut m, &["b"]));
        assert!(!remove_finalizers(&mut ObjectMeta::default(), &["x"]));
        assert_eq!(m.finalizers.as_deref(), Some(&["a".to_string(), "c".to_string()][..]));
        assert!(has_finalizer(&m, "a"));
        assert!(!has_finalizer(&m, "b"));
    }

    #[test]
    fn remove_all_is_noop_on_empty() {
        let mut m = meta(&["a"]);
        assert!(remove_all_finalizers(&mut m));
        assert!(!remove_all_finalizers(&mut m));
        assert!(!remove_all_finalizers(&mut ObjectMeta::default()));
    }
}
