use serde::Serialize;
use std::collections::BTreeMap;

/// Host-side mount point a client plugin renders into.
///
/// Models the parts of a DOM node a widget may touch: its inner HTML and its
/// attributes. Empty means both are empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MountTarget {
    id: String,
    html: String,
    attributes: BTreeMap<String, String>,
}

impl MountTarget {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into(), ..Default::default() }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn inner_html(&self) -> &str {
        &self.html
    }

    pub fn set_inner_html(&mut self, html: impl Into<String>) {
        self.html = html.into();
    }

    pub fn append_html(&mut self, html: &str) {
        self.html.push_str(html);
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    pub fn set_attribute(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.attributes.insert(name.into(), value.into());
    }

    pub fn remove_attribute(&mut self, name: &str) {
        self.attributes.remove(name);
    }

    pub fn clear(&mut self) {
        self.html.clear();
        self.attributes.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.html.is_empty() && self.attributes.is_empty()
    }
}

/// Minimal escaping for text placed inside element content or attributes
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clear_removes_content_and_attributes() {
        let mut target = MountTarget::new("sidebar");
        target.set_inner_html("<b>hi</b>");
        target.set_attribute("data-plugin", "acme/x");
        assert!(!target.is_empty());

        target.clear();
        assert!(target.is_empty());
        assert_eq!(target.id(), "sidebar");
    }

    #[test]
    fn escapes_markup() {
        assert_eq!(escape_html("<a href=\"x\">&'"), "&lt;a href=&quot;x&quot;&gt;&amp;&#39;");
    }
}
