/// Splits a raw tag string on any run of whitespace. An empty string yields no tags.
pub fn split_tags(raw: &str) -> Vec<String> {
    raw.split_whitespace().map(str::to_string).collect()
}

/// Joins tags with a single space, the form `posts/add` expects.
pub fn join_tags<S: AsRef<str>>(tags: &[S]) -> String {
    tags.iter()
        .map(AsRef::as_ref)
        .filter(|tag| !tag.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
