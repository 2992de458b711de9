//! Cache-key normalization.
//!
//! All callers must produce canonical keys so that equivalent requests
//! collide in both cache tiers: datacenter names are case-folded and item-id
//! lists are sorted, so `Crystal/3,1,2` and `crystal/1,2,3` share one entry.

/// Fixed origin used to synthesize edge-tier keys in URL form.
const EDGE_ORIGIN: &str = "https://edge.internal";

/// Normalize a list of item ids: drop non-positive values, sort ascending.
pub fn normalize_item_ids(ids: &[u64]) -> Vec<u64> {
    let mut out: Vec<u64> = ids.iter().copied().filter(|id| *id > 0).collect();
    out.sort_unstable();
    out
}

/// Join item ids into the canonical comma-separated form.
pub fn join_ids(ids: &[u64]) -> String {
    ids.iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// Canonical key for an aggregated price lookup, e.g. `aggregated:crystal:1,2,3`.
pub fn aggregated_key(prefix: &str, datacenter: &str, ids: &[u64]) -> String {
    format!(
        "{}:{}:{}",
        prefix,
        datacenter.to_ascii_lowercase(),
        join_ids(&normalize_item_ids(ids))
    )
}

/// Canonical key for a cached static list, e.g. `data-centers:all`.
pub fn list_key(prefix: &str) -> String {
    format!("{prefix}:all")
}

/// Key namespace for background revalidation fetches.
///
/// Kept distinct from the in-band namespace so revalidations and live misses
/// for the same resource never starve each other in the coalescer.
pub fn revalidation_key(key: &str) -> String {
    format!("revalidate:{key}")
}

/// Synthesize the URL-form key used by the edge tier.
pub fn edge_url(key: &str) -> String {
    let encoded: String = url::form_urlencoded::byte_serialize(key.as_bytes()).collect();
    format!("{EDGE_ORIGIN}/__cache/{encoded}")
}
