//! HTML sanitising for editor output and outgoing email bodies.

use std::{borrow::Cow, collections::HashSet};

use ammonia::Builder as AmmoniaBuilder;

/// Configured sanitizers for post bodies and email HTML.
pub struct ContentSanitizer {
    post: AmmoniaBuilder<'static>,
    email: AmmoniaBuilder<'static>,
}

impl Default for ContentSanitizer {
    fn default() -> Self {
        Self::new()
    }
}

impl ContentSanitizer {
    pub fn new() -> Self {
        Self {
            post: build_post_sanitizer(),
            email: build_email_sanitizer(),
        }
    }

    /// Clean rich-text editor output before it is stored on a post.
    pub fn post_body(&self, html: &str) -> String {
        self.post.clean(html).to_string()
    }

    /// Clean an issue body, keeping inline `style` attributes.
    pub fn email_body(&self, html: &str) -> String {
        self.email.clean(html).to_string()
    }
}

fn build_post_sanitizer() -> AmmoniaBuilder<'static> {
    let mut builder = AmmoniaBuilder::default();

    let tags: HashSet<&'static str> = HashSet::from([
        "a",
        "abbr",
        "blockquote",
        "br",
        "code",
        "del",
        "div",
        "em",
        "figcaption",
        "figure",
        "h1",
        "h2",
        "h3",
        "h4",
        "h5",
        "h6",
        "hr",
        "i",
        "img",
        "ins",
        "kbd",
        "li",
        "mark",
        "ol",
        "p",
        "pre",
        "s",
        "span",
        "strong",
        "sub",
        "sup",
        "table",
        "tbody",
        "td",
        "th",
        "thead",
        "tr",
        "u",
        "ul",
    ]);
    builder.tags(tags);

    let generic: HashSet<&'static str> = HashSet::from(["class", "id", "title", "lang", "dir"]);
    builder.generic_attributes(generic);

    builder.add_tag_attributes("a", &["target"]);
    builder.add_tag_attributes("img", &["alt", "width", "height", "loading"]);
    builder.add_tag_attributes("code", &["data-language"]);
    builder.add_tag_attributes("pre", &["data-language"]);
    builder.add_tag_attributes("th", &["align", "colspan", "rowspan", "scope"]);
    builder.add_tag_attributes("td", &["align", "colspan", "rowspan"]);

    builder
}

fn build_email_sanitizer() -> AmmoniaBuilder<'static> {
    let mut builder = build_post_sanitizer();

    builder.add_tags(&["center", "font"]);
    builder.add_generic_attributes(&["style", "align", "width", "bgcolor"]);
    builder.add_tag_attributes("table", &["cellpadding", "cellspacing", "border", "role"]);
    builder.add_tag_attributes("font", &["color", "face", "size"]);

    builder.attribute_filter(|_element, attribute, value| {
        if attribute.eq_ignore_ascii_case("style") {
            sanitize_style_attribute(value).map(Cow::Owned)
        } else {
            Some(Cow::Borrowed(value))
        }
    });

    builder
}

/// Drop declarations that can load remote content or run script.
fn sanitize_style_attribute(value: &str) -> Option<String> {
    let kept: Vec<String> = value
        .split(';')
        .filter_map(|declaration| {
            let declaration = declaration.trim();
            let (property, rule) = declaration.split_once(':')?;
            let rule_lower = rule.to_ascii_lowercase();
            if rule_lower.contains("url(")
                || rule_lower.contains("expression(")
                || rule_lower.contains("javascript:")
                || rule_lower.contains("@import")
            {
                return None;
            }
            Some(format!("{}: {}", property.trim(), rule.trim()))
        })
        .collect();

    if kept.is_empty() {
        None
    } else {
        Some(kept.join("; "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn post_body_drops_scripts_and_handlers() {
        let sanitizer = ContentSanitizer::new();
        let cleaned = sanitizer
            .post_body(r#"<p onclick="x()">Hi<script>alert(1)</script></p><a href="javascript:x">l</a>"#);

        assert!(!cleaned.contains("script"));
        assert!(!cleaned.contains("onclick"));
        assert!(!cleaned.contains("javascript:"));
        assert!(cleaned.contains("<p>Hi</p>"));
    }

    #[test]
    fn post_body_drops_inline_styles() {
        let sanitizer = ContentSanitizer::new();
        let cleaned = sanitizer.post_body(r#"<p style="color: red">x</p>"#);
        assert_eq!(cleaned, "<p>x</p>");
    }

    #[test]
    fn email_body_keeps_safe_styles_only() {
        let sanitizer = ContentSanitizer::new();
        let cleaned = sanitizer.email_body(
            r#"<p style="color: red; background: url(http://tracker.test/x.png)">x</p>"#,
        );
        assert!(cleaned.contains("color: red"));
        assert!(!cleaned.contains("url("));
    }
}
