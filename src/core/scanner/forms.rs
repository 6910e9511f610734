// src/core/scanner/forms.rs

use once_cell::sync::Lazy;
use scraper::{Html, Selector};
use tracing::debug;
use url::Url;

static FORM: Lazy<Selector> = Lazy::new(|| Selector::parse("form").unwrap());
static FIELD: Lazy<Selector> =
    Lazy::new(|| Selector::parse("input[name], textarea[name], select[name]").unwrap());

/// A form found in a page, reduced to what the probes need.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredForm {
    /// Absolute action URL (the page itself when `action` is absent).
    pub action: Url,
    /// Lower-cased method, `get` by default.
    pub method: String,
    /// Names of text-like fields that can carry a payload.
    pub fields: Vec<String>,
    /// Name and `accept` attribute of each file input.
    pub file_inputs: Vec<(String, Option<String>)>,
}

impl DiscoveredForm {
    pub fn is_get(&self) -> bool {
        self.method == "get"
    }

    pub fn accepts_files(&self) -> bool {
        !self.file_inputs.is_empty()
    }
}

/// Extracts forms from an HTML document served at `page`.
///
/// Parsing is synchronous and returns owned data, so callers never hold the
/// parsed document across an await point.
pub fn discover_forms(html: &str, page: &Url) -> Vec<DiscoveredForm> {
    let document = Html::parse_document(html);
    let mut forms = Vec::new();

    for form in document.select(&FORM) {
        let element = form.value();
        let action = match element.attr("action").map(str::trim).filter(|a| !a.is_empty()) {
            Some(action) => match page.join(action) {
                Ok(url) => url,
                Err(e) => {
                    debug!(action, error = %e, "Skipping form with unparseable action.");
                    continue;
                }
            },
            None => page.clone(),
        };
        if !matches!(action.scheme(), "http" | "https") {
            continue;
        }
        let method = element.attr("method").unwrap_or("get").trim().to_ascii_lowercase();

        let mut fields = Vec::new();
        let mut file_inputs = Vec::new();
        for field in form.select(&FIELD) {
            let Some(name) = field.value().attr("name") else { continue };
            let input_type = field.value().attr("type").unwrap_or("text").to_ascii_lowercase();
            match input_type.as_str() {
                "file" => file_inputs.push((name.to_string(), field.value().attr("accept").map(str::to_string))),
                "submit" | "button" | "image" | "reset" | "checkbox" | "radio" => {}
                _ => fields.push(name.to_string()),
            }
        }

        forms.push(DiscoveredForm { action, method, fields, file_inputs });
    }

    debug!(count = forms.len(), page = %page, "Discovered forms.");
    forms
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
        <html><body>
          <form action="/search"><input name="q"><input type="submit" name="go"></form>
          <form method="POST" action="upload.php" enctype="multipart/form-data">
            <input type="file" name="avatar" accept="image/png">
            <input type="hidden" name="token" value="abc">
          </form>
          <form action="javascript:void(0)"><input name="x"></form>
        </body></html>
    "#;

    #[test]
    fn test_discovers_forms_and_file_inputs() {
        let page = Url::parse("http://site.test/account/").unwrap();
        let forms = discover_forms(PAGE, &page);
        assert_eq!(forms.len(), 2);

        assert!(forms[0].is_get());
        assert_eq!(forms[0].action.as_str(), "http://site.test/search");
        assert_eq!(forms[0].fields, vec!["q".to_string()]);

        assert_eq!(forms[1].method, "post");
        assert_eq!(forms[1].action.as_str(), "http://site.test/account/upload.php");
        assert!(forms[1].accepts_files());
        assert_eq!(forms[1].file_inputs[0], ("avatar".to_string(), Some("image/png".to_string())));
        assert_eq!(forms[1].fields, vec!["token".to_string()]);
    }

    #[test]
    fn test_no_forms() {
        let page = Url::parse("http://site.test/").unwrap();
        assert!(discover_forms("<p>plain</p>", &page).is_empty());
    }
}
