//! Declarative binding table: `(page, section, field) → selector + render`.
//!
//! Every page lists the sections it shows and, for each, which field goes to
//! which element and how (text, HTML, `src`, `href`). Repeated content
//! (cards, team members, stats) is a [`ListBinding`], patched either
//! positionally against existing nodes or by clearing a container and
//! rebuilding it from a template. Tables are plain data and can be loaded
//! from JSON; [`BindingTable::site_default`] is the table the public site
//! ships with.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// How a value is written to its element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Render {
    /// `textContent`.
    Text,
    /// `innerHTML`.
    Html,
    /// `src` attribute.
    Src,
    /// `href` attribute.
    Href,
}

/// One scalar field bound to one selector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldBinding {
    /// Dotted path into the section object (`cta.link`).
    pub field: String,
    /// CSS selector of the target; relative to the item inside lists.
    pub selector: String,
    /// How to write the value.
    pub render: Render,
}

/// How a list is applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum ListMode {
    /// Item `i` of the array patches the `i`-th node matching `item_selector`.
    Positional {
        /// Selector of the repeated item nodes.
        item_selector: String,
        /// Per-item field bindings, selectors scoped to the item.
        fields: Vec<FieldBinding>,
    },
    /// The container is cleared and one rendered template appended per item.
    Rebuild {
        /// Selector of the container element.
        container: String,
        /// HTML with `{field}` placeholders; values are HTML-escaped.
        template: String,
    },
}

/// An array field bound to repeated DOM content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListBinding {
    /// Dotted path of the array.
    pub field: String,
    /// How items are applied.
    #[serde(flatten)]
    pub mode: ListMode,
}

/// Bindings for one section on one page.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SectionBinding {
    /// Section name.
    pub section: String,
    /// Scalar fields.
    #[serde(default)]
    pub fields: Vec<FieldBinding>,
    /// Repeated fields.
    #[serde(default)]
    pub lists: Vec<ListBinding>,
}

/// All section bindings of one page.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PageBindings {
    /// Page name (`index`, `about`, ...).
    pub page: String,
    /// Sections shown on the page.
    pub sections: Vec<SectionBinding>,
}

/// The whole site's binding table.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BindingTable {
    /// Pages.
    pub pages: Vec<PageBindings>,
}

impl BindingTable {
    /// Bindings for a page.
    #[must_use]
    pub fn page(&self, page: &str) -> Option<&PageBindings> {
        self.pages.iter().find(|p| p.page == page)
    }

    /// Page names in table order.
    pub fn page_names(&self) -> impl Iterator<Item = &str> {
        self.pages.iter().map(|p| p.page.as_str())
    }

    /// The public site's table.
    #[must_use]
    pub fn site_default() -> Self {
        let hero = SectionBinding::new("hero")
            .text("title", "#hero-title")
            .text("subtitle", "#hero-subtitle")
            .bind("backgroundImage", "#hero-image", Render::Src)
            .text("cta.text", "#hero-cta")
            .bind("cta.link", "#hero-cta", Render::Href);

        let about = SectionBinding::new("about")
            .text("title", "#about-title")
            .bind("description", "#about-description", Render::Html)
            .bind("image", "#about-image", Render::Src)
            .text("mission", "#about-mission")
            .text("vision", "#about-vision");

        let programs = SectionBinding::new("programs")
            .text("title", "#programs-title")
            .text("intro", "#programs-intro")
            .list(ListBinding {
                field: "items".to_owned(),
                mode: ListMode::Rebuild {
                    container: "#programs-list".to_owned(),
                    template: concat!(
                        r#"<article class="program-card">"#,
                        r#"<img src="{image}" alt="{title}">"#,
                        "<h3>{title}</h3><p>{description}</p>",
                        "</article>"
                    )
                    .to_owned(),
                },
            });

        let impact = SectionBinding::new("impact")
            .text("title", "#impact-title")
            .list(ListBinding {
                field: "stats".to_owned(),
                mode: ListMode::Positional {
                    item_selector: ".impact-stat".to_owned(),
                    fields: vec![
                        FieldBinding::new("value", ".stat-value", Render::Text),
                        FieldBinding::new("label", ".stat-label", Render::Text),
                    ],
                },
            });

        let team = SectionBinding::new("team")
            .text("title", "#team-title")
            .list(ListBinding {
                field: "members".to_owned(),
                mode: ListMode::Positional {
                    item_selector: ".team-member".to_owned(),
                    fields: vec![
                        FieldBinding::new("name", ".member-name", Render::Text),
                        FieldBinding::new("role", ".member-role", Render::Text),
                        FieldBinding::new("bio", ".member-bio", Render::Text),
                        FieldBinding::new("photo", ".member-photo", Render::Src),
                    ],
                },
            });

        let contact = SectionBinding::new("contact")
            .text("title", "#contact-title")
            .text("email", "#contact-email")
            .bind("email", "#contact-email-link", Render::Href)
            .text("phone", "#contact-phone")
            .text("address", "#contact-address");

        let footer = SectionBinding::new("footer")
            .text("copyright", "#footer-copyright")
            .bind("facebook", "#footer-facebook", Render::Href)
            .bind("instagram", "#footer-instagram", Render::Href);

        Self {
            pages: vec![
                PageBindings {
                    page: "index".to_owned(),
                    sections: vec![
                        hero,
                        about.clone(),
                        programs.clone(),
                        impact,
                        contact.clone(),
                        footer.clone(),
                    ],
                },
                PageBindings {
                    page: "about".to_owned(),
                    sections: vec![about, team, footer.clone()],
                },
                PageBindings {
                    page: "programs".to_owned(),
                    sections: vec![programs, footer.clone()],
                },
                PageBindings {
                    page: "contact".to_owned(),
                    sections: vec![contact, footer],
                },
            ],
        }
    }
}

impl FieldBinding {
    /// Shorthand constructor.
    #[must_use]
    pub fn new(field: &str, selector: &str, render: Render) -> Self {
        Self {
            field: field.to_owned(),
            selector: selector.to_owned(),
            render,
        }
    }
}

impl SectionBinding {
    /// An empty binding for `section`.
    #[must_use]
    pub fn new(section: &str) -> Self {
        Self {
            section: section.to_owned(),
            ..Self::default()
        }
    }

    /// Bind a field as text.
    #[must_use]
    pub fn text(self, field: &str, selector: &str) -> Self {
        self.bind(field, selector, Render::Text)
    }

    /// Bind a field with an explicit render mode.
    #[must_use]
    pub fn bind(mut self, field: &str, selector: &str, render: Render) -> Self {
        self.fields.push(FieldBinding::new(field, selector, render));
        self
    }

    /// Add a list binding.
    #[must_use]
    pub fn list(mut self, list: ListBinding) -> Self {
        self.lists.push(list);
        self
    }
}

/// JavaScript truthiness: `null`, `false`, `0`, and `""` are falsy.
#[must_use]
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Follow a dotted path into a JSON value.
#[must_use]
pub fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(value, |v, key| v.get(key))
}
