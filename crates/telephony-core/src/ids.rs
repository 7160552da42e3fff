//! Identifier codec
//!
//! Provider object paths (`/ril_0/voicecall01`) are not safe to hand to the
//! JavaScript side as-is, so every id crossing the wire is the path with each
//! `/` replaced by `|`. The mapping is only reversible for paths that contain
//! no literal `|`, which holds for every oFono object path.

const PATH_SEPARATOR: &str = "/";
const OPAQUE_SEPARATOR: &str = "|";

/// Marker that links a call path to its owning modem path.
const VOICECALL_SEGMENT: &str = "voicecall";

/// Convert a provider object path into an opaque id.
pub fn to_opaque(path: &str) -> String {
    path.replace(PATH_SEPARATOR, OPAQUE_SEPARATOR)
}

/// Convert an opaque id back into the provider object path.
pub fn to_provider(id: &str) -> String {
    id.replace(OPAQUE_SEPARATOR, PATH_SEPARATOR)
}

/// Derive the owning service id from a call id.
///
/// Calls are named `<servicePath>/voicecall<N>` by the provider, so the
/// service id is everything before the last separator. Returns `None` when the
/// id does not follow that convention (synthetic conference ids, for one).
pub fn service_id_of_call(call_id: &str) -> Option<&str> {
    let (service_id, leaf) = call_id.rsplit_once(OPAQUE_SEPARATOR)?;
    if service_id.is_empty() || !leaf.starts_with(VOICECALL_SEGMENT) {
        return None;
    }
    Some(service_id)
}
