// src/core/scanner/params.rs

use url::Url;

/// Parameter names tried when the target URL carries none of its own.
pub const DEFAULT_PARAMETERS: &[&str] = &["id", "q", "search", "query", "page", "name"];

/// A place in a URL where a probe can substitute its payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum InjectionPoint {
    /// A query-string parameter. `position` indexes the pair in the query,
    /// so repeated names are distinct points. Proposed names have none.
    Query { name: String, position: Option<usize>, original: String },
    /// A path segment, by index into `path_segments()`.
    Path { index: usize, original: String },
}

impl InjectionPoint {
    pub fn original(&self) -> &str {
        match self {
            InjectionPoint::Query { original, .. } | InjectionPoint::Path { original, .. } => original,
        }
    }

    /// Short description used in evidence, e.g. `query parameter 'id'`.
    pub fn label(&self) -> String {
        match self {
            InjectionPoint::Query { name, .. } => format!("query parameter '{name}'"),
            InjectionPoint::Path { index, .. } => format!("path segment #{index}"),
        }
    }

    /// Returns `base` with this point's value replaced by `value`.
    /// Every other parameter and segment is kept as is.
    pub fn apply(&self, base: &Url, value: &str) -> Url {
        let mut url = base.clone();
        match self {
            InjectionPoint::Query { name, position, .. } => {
                let mut pairs: Vec<(String, String)> = base
                    .query_pairs()
                    .map(|(k, v)| (k.into_owned(), v.into_owned()))
                    .collect();
                let slot = match position {
                    Some(position) => pairs.get_mut(*position).filter(|(k, _)| k == name),
                    None => pairs.iter_mut().find(|(k, _)| k == name),
                };
                match slot {
                    Some(pair) => pair.1 = value.to_string(),
                    None => pairs.push((name.clone(), value.to_string())),
                }
                url.query_pairs_mut().clear().extend_pairs(pairs);
            }
            InjectionPoint::Path { index, .. } => {
                let mut segments: Vec<String> = base
                    .path_segments()
                    .map(|s| s.map(str::to_string).collect())
                    .unwrap_or_default();
                if let Some(segment) = segments.get_mut(*index) {
                    *segment = value.to_string();
                }
                if let Ok(mut path) = url.path_segments_mut() {
                    path.clear().extend(segments.iter());
                }
            }
        }
        url
    }
}

/// Lists the injection points of `url`.
///
/// Query parameters come first. With `include_path`, purely numeric path
/// segments (`/users/42`) are added too. When nothing is found the default
/// parameter names are proposed, so a bare URL can still be exercised.
pub fn injection_points(url: &Url, include_path: bool) -> Vec<InjectionPoint> {
    let mut points: Vec<InjectionPoint> = url
        .query_pairs()
        .enumerate()
        .map(|(position, (name, value))| InjectionPoint::Query {
            name: name.into_owned(),
            position: Some(position),
            original: value.into_owned(),
        })
        .collect();

    if include_path {
        if let Some(segments) = url.path_segments() {
            for (index, segment) in segments.enumerate() {
                if !segment.is_empty() && segment.chars().all(|c| c.is_ascii_digit()) {
                    points.push(InjectionPoint::Path { index, original: segment.to_string() });
                }
            }
        }
    }

    if points.is_empty() {
        points = DEFAULT_PARAMETERS
            .iter()
            .map(|name| InjectionPoint::Query {
                name: name.to_string(),
                position: None,
                original: "1".to_string(),
            })
            .collect();
    }
    points
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_points_preserve_other_params() {
        let url = Url::parse("http://shop.test/item?id=7&sort=asc").unwrap();
        let points = injection_points(&url, false);
        assert_eq!(points.len(), 2);

        let injected = points[0].apply(&url, "7'");
        let pairs: Vec<(String, String)> = injected
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert_eq!(pairs, vec![("id".into(), "7'".into()), ("sort".into(), "asc".into())]);
    }

    #[test]
    fn test_repeated_names_are_separate_slots() {
        let url = Url::parse("http://shop.test/list?tag=a&tag=b").unwrap();
        let points = injection_points(&url, false);
        assert_eq!(points.len(), 2);

        let values = |u: Url| -> Vec<String> { u.query_pairs().map(|(_, v)| v.into_owned()).collect() };
        assert_eq!(values(points[0].apply(&url, "x")), vec!["x", "b"]);
        assert_eq!(values(points[1].apply(&url, "x")), vec!["a", "x"]);
        assert_eq!(points[1].original(), "b");
    }

    #[test]
    fn test_path_points() {
        let url = Url::parse("http://shop.test/users/42/orders").unwrap();
        let points = injection_points(&url, true);
        assert_eq!(points, vec![InjectionPoint::Path { index: 1, original: "42".into() }]);
        assert_eq!(points[0].apply(&url, "43").path(), "/users/43/orders");
    }

    #[test]
    fn test_defaults_when_nothing_found() {
        let url = Url::parse("http://shop.test/").unwrap();
        let points = injection_points(&url, true);
        assert_eq!(points.len(), DEFAULT_PARAMETERS.len());
        let injected = points[1].apply(&url, "<b>");
        assert_eq!(injected.query_pairs().next().unwrap().1, "<b>");
        assert_eq!(points[1].label(), "query parameter 'q'");
    }
}
