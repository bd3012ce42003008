//! Path and resource naming helpers shared by the store, the lookup and the codecs.
//!
//! Store keys take the form `resource:path` where `path` is dotted (`user.address.city`) and may carry iteration
//! indices (`items[2].key`). The resource may carry a qualifier suffix (`node.header`).

/// Separator between path segments.
pub const PATH_DELIMITER: char = '.';
/// Separator between a resource and its path.
pub const RESOURCE_DELIMITER: char = ':';
/// Marker referencing the whole root object, or the current breakpoint when used as a resource prefix.
pub const SELF_REF: &str = ".";

pub const INPUT_RESOURCE: &str = "input";
pub const OUTPUT_RESOURCE: &str = "output";
pub const STACK_RESOURCE: &str = "stack";
pub const PARAMS_RESOURCE: &str = "params";
pub const REQUEST_RESOURCE: &str = "request";
pub const HEADER_RESOURCE: &str = "header";
pub const RESPONSE_RESOURCE: &str = "response";
pub const ERROR_RESOURCE: &str = "error";

/// Join path segments with the path delimiter, skipping empty segments.
///
/// A segment ending in the resource delimiter (`input:`) is joined without a trailing dot so
/// `join_path(["input:", "message"])` yields `input:message`.
pub fn join_path<I, S>(segments: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut joined = String::new();
    for segment in segments {
        let segment = segment.as_ref().trim_matches(PATH_DELIMITER);
        if segment.is_empty() {
            continue;
        }
        if !joined.is_empty() && !joined.ends_with(RESOURCE_DELIMITER) {
            joined.push(PATH_DELIMITER);
        }
        joined.push_str(segment);
    }
    joined
}

/// Split a dotted path into its segments.
pub fn split_path(path: &str) -> Vec<&str> {
    path.split(PATH_DELIMITER).filter(|segment| !segment.is_empty()).collect()
}

/// Absolute store key for the given resource and path.
pub fn resource_path(resource: &str, path: &str) -> String {
    format!("{resource}{RESOURCE_DELIMITER}{}", path.trim_matches(PATH_DELIMITER))
}

/// Append an iteration index to the given path.
pub fn index_path(path: &str, index: usize) -> String {
    format!("{path}[{index}]")
}

/// Split an absolute key into its resource and path parts. Keys without a resource return an empty resource.
pub fn split_resource(key: &str) -> (&str, &str) {
    key.split_once(RESOURCE_DELIMITER).unwrap_or(("", key))
}

/// Strip the resource part of an absolute key.
pub fn trim_resource(key: &str) -> &str {
    split_resource(key).1
}

/// Header keys are matched case-insensitively and stored lower-cased.
pub fn header_key(name: &str) -> String {
    name.to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_path_skips_empty_segments_and_resource_dots() {
        assert_eq!(join_path(["input:", "message"]), "input:message");
        assert_eq!(join_path(["user", "", "address.", "city"]), "user.address.city");
        assert_eq!(join_path(["input:", ""]), "input:");
        assert_eq!(join_path(Vec::<String>::new()), "");
    }

    #[test]
    fn resource_helpers_split_and_render_keys() {
        assert_eq!(resource_path("first", "user.id"), "first:user.id");
        assert_eq!(split_resource("first.header:x-id"), ("first.header", "x-id"));
        assert_eq!(trim_resource("input:items[0].id"), "items[0].id");
        assert_eq!(index_path("input:items", 3), "input:items[3]");
        assert_eq!(split_path("a..b.c"), vec!["a", "b", "c"]);
    }
}
