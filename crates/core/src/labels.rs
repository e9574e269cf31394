use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

/// Merge `key=value` into the existing labels, overriding a previous value.
pub fn merge_label(meta: &mut ObjectMeta, key: &str, value: &str) {
    meta.labels.get_or_insert_with(BTreeMap::new).insert(key.to_string(), value.to_string());
}

/// Strip `key`; returns whether the label was present.
pub fn remove_label(meta: &mut ObjectMeta, key: &str) -> bool {
    meta.labels.as_mut().map(|l| l.remove(key).is_some()).unwrap_or(false)
}

pub fn label_value<'a>(meta: &'a ObjectMeta, key: &str) -> Option<&'a str> {
    meta.labels.as_ref().and_then(|l| l.get(key)).map(|s| s.as_str())
}
