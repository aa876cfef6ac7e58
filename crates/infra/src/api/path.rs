//! Logical path templating for metric and log tags
//!
//! Concrete resource ids would give every widget its own time series, so
//! id-like segments are collapsed to `:id` before a path is used as a tag.

use uuid::Uuid;

const ID_PLACEHOLDER: &str = ":id";

/// Hex segments at least this long are treated as ids
const MIN_HEX_ID_LEN: usize = 16;

/// Collapse id-like segments of `path` to `:id` and drop any query string
///
/// ```
/// use keyline_infra::api::logical_path;
///
/// assert_eq!(logical_path("/widgets/42"), "/widgets/:id");
/// assert_eq!(logical_path("/widgets/42/parts?limit=5"), "/widgets/:id/parts");
/// ```
pub fn logical_path(path: &str) -> String {
    let path = path.split(['?', '#']).next().unwrap_or_default();
    let templated: Vec<&str> = path
        .trim_start_matches('/')
        .split('/')
        .map(|segment| if is_id_segment(segment) { ID_PLACEHOLDER } else { segment })
        .collect();

    format!("/{}", templated.join("/"))
}

fn is_id_segment(segment: &str) -> bool {
    if segment.is_empty() {
        return false;
    }

    segment.bytes().all(|b| b.is_ascii_digit())
        || Uuid::try_parse(segment).is_ok()
        || (segment.len() >= MIN_HEX_ID_LEN && segment.bytes().all(|b| b.is_ascii_hexdigit()))
}
