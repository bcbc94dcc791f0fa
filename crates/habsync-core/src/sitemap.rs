//! Sitemap descriptors from the server's sitemap list

use serde::Deserialize;
use tracing::warn;

use crate::xml::XmlElement;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sitemap {
    pub name: String,
    pub label: String,
    pub link: Option<String>,
    pub icon: Option<String>,
    pub homepage_link: String,
}

#[derive(Debug, Deserialize)]
struct SitemapPayload {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    link: Option<String>,
    #[serde(default)]
    icon: Option<String>,
    #[serde(default)]
    homepage: Option<HomepagePayload>,
}

#[derive(Debug, Deserialize)]
struct HomepagePayload {
    #[serde(default)]
    link: Option<String>,
}

impl SitemapPayload {
    fn into_sitemap(self) -> Option<Sitemap> {
        let name = self.name?;
        let homepage_link = self.homepage.and_then(|h| h.link)?;
        Some(Sitemap {
            label: self.label.unwrap_or_else(|| name.clone()),
            name,
            link: self.link,
            icon: self.icon,
            homepage_link,
        })
    }
}

impl Sitemap {
    fn from_xml(element: &XmlElement) -> Option<Sitemap> {
        let name = element.child_text("name")?.to_string();
        let homepage_link = element
            .child("homepage")
            .and_then(|h| h.child_text("link"))?
            .to_string();
        Some(Sitemap {
            label: element
                .child_text("label")
                .map(str::to_string)
                .unwrap_or_else(|| name.clone()),
            name,
            link: element.child_text("link").map(str::to_string),
            icon: element.child_text("icon").map(str::to_string),
            homepage_link,
        })
    }
}

/// Parse the JSON sitemap array. Entries without a name or homepage are
/// skipped; an unparseable body yields an empty list.
pub fn parse_sitemaps_json(body: &str) -> Vec<Sitemap> {
    match serde_json::from_str::<Vec<serde_json::Value>>(body) {
        Ok(entries) => entries
            .into_iter()
            .filter_map(|e| SitemapPayload::deserialize(e).ok())
            .filter_map(SitemapPayload::into_sitemap)
            .collect(),
        Err(e) => {
            warn!("Failed parsing sitemap JSON: {}", e);
            Vec::new()
        }
    }
}

/// Parse the legacy `<sitemaps>` document.
pub fn parse_sitemaps_xml(body: &str) -> Vec<Sitemap> {
    match XmlElement::parse(body) {
        Ok(root) => root
            .children_named("sitemap")
            .filter_map(Sitemap::from_xml)
            .collect(),
        Err(e) => {
            warn!("Failed parsing sitemap XML: {}", e);
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sitemaps_json() {
        let body = r#"[
            {"name":"demo","label":"Demo House","link":"http://demo/rest/sitemaps/demo",
             "homepage":{"link":"http://demo/rest/sitemaps/demo/demo","leaf":false}},
            {"name":"nolabel","homepage":{"link":"http://demo/rest/sitemaps/nolabel/nolabel"}},
            {"name":"broken"},
            {"label":"no name","homepage":{"link":"x"}}
        ]"#;
        let sitemaps = parse_sitemaps_json(body);
        assert_eq!(sitemaps.len(), 2);
        assert_eq!(sitemaps[0].label, "Demo House");
        assert_eq!(sitemaps[0].homepage_link, "http://demo/rest/sitemaps/demo/demo");
        assert_eq!(sitemaps[1].label, "nolabel");
    }

    #[test]
    fn test_parse_sitemaps_json_invalid() {
        assert!(parse_sitemaps_json("{not json").is_empty());
    }

    #[test]
    fn test_parse_sitemaps_xml() {
        let body = r#"<?xml version="1.0"?>
            <sitemaps>
              <sitemap>
                <name>demo</name><label>Demo</label>
                <link>http://demo/rest/sitemaps/demo</link>
                <homepage><link>http://demo/rest/sitemaps/demo/demo</link></homepage>
              </sitemap>
              <sitemap><name>nohome</name></sitemap>
            </sitemaps>"#;
        let sitemaps = parse_sitemaps_xml(body);
        assert_eq!(sitemaps.len(), 1);
        assert_eq!(sitemaps[0].name, "demo");
        assert_eq!(sitemaps[0].homepage_link, "http://demo/rest/sitemaps/demo/demo");
    }
}
