//! Identifier and JSON-path construction.
//!
//! Collection names are caller-controlled, so they never reach SQL text
//! directly: table names are derived by hex-encoding the name, which keeps
//! them inside `[0-9a-f_dg]` and makes distinct names map to distinct tables.

use crate::error::{StoreError, StoreResult};

/// Names of the two tables backing one collection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CollectionTables {
    pub data: String,
    pub graft: String,
}

impl CollectionTables {
    pub fn for_collection(collection: &str) -> Self {
        let encoded = hex::encode(collection.as_bytes());
        Self {
            data: format!("d_{encoded}"),
            graft: format!("g_{encoded}"),
        }
    }
}

/// Split a slash- or dot-separated document path into its segments.
///
/// Empty segments are dropped. Segments containing `"` or `\` are rejected
/// because SQLite's path syntax has no escape for them.
pub fn path_segments(path: &str) -> StoreResult<Vec<&str>> {
    path.split(['/', '.'])
        .filter(|s| !s.is_empty())
        .map(|segment| {
            if segment.contains(['"', '\\']) {
                return Err(StoreError::InvalidInput(format!(
                    "path segment contains a forbidden character: {segment:?}"
                )));
            }
            Ok(segment)
        })
        .collect()
}

/// Convert a document path into an SQLite JSON path for list conditions.
///
/// Numeric segments address array elements, everything else is a quoted
/// object key. An object key made only of digits is therefore unreachable
/// from a condition; point reads resolve paths against the decoded document
/// instead and do not have this limit.
///
/// ```
/// use grafton_store::naming::json_path;
///
/// assert_eq!(json_path("a/b/0").unwrap(), r#"$."a"."b"[0]"#);
/// assert_eq!(json_path("").unwrap(), "$");
/// ```
pub fn json_path(path: &str) -> StoreResult<String> {
    let mut out = String::from("$");
    for segment in path_segments(path)? {
        if segment.bytes().all(|b| b.is_ascii_digit()) && segment.len() <= 9 {
            out.push('[');
            out.push_str(segment);
            out.push(']');
        } else {
            out.push_str(".\"");
            out.push_str(segment);
            out.push('"');
        }
    }
    Ok(out)
}
