//! Sub-page references attached to widgets

use serde::Deserialize;

use crate::xml::XmlElement;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkedPage {
    pub id: Option<String>,
    pub title: Option<String>,
    pub icon: Option<String>,
    pub link: String,
}

impl LinkedPage {
    /// Build a linked page; a page without a link is not navigable and
    /// yields `None`.
    pub fn build(
        id: Option<String>,
        title: Option<String>,
        icon: Option<String>,
        link: Option<String>,
    ) -> Option<LinkedPage> {
        let link = link?;
        // Older servers append the state in brackets: "Floor [2 lights on]"
        let title = title.map(|t| match t.find('[') {
            Some(pos) if pos > 0 => t[..pos].to_string(),
            _ => t,
        });
        Some(LinkedPage {
            id,
            title,
            icon,
            link,
        })
    }

    pub(crate) fn from_xml(element: &XmlElement) -> Option<LinkedPage> {
        let text = |name: &str| element.child_text(name).map(str::to_string);
        LinkedPage::build(text("id"), text("title"), text("icon"), text("link"))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LinkedPagePayload {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub link: Option<String>,
}

impl LinkedPagePayload {
    pub fn into_linked_page(self) -> Option<LinkedPage> {
        LinkedPage::build(self.id, self.title, self.icon, self.link)
    }
}
