//! Applies section data to a [`Dom`] through a page's bindings.
//!
//! Only truthy values are written; absent or falsy fields leave the element
//! untouched. A binding whose selector matches nothing is logged and
//! skipped, never an error.

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::binding::{
    BindingTable, FieldBinding, ListBinding, ListMode, PageBindings, Render, SectionBinding,
    is_truthy, lookup,
};
use crate::document::ContentDocument;
use crate::dom::{Dom, NodeId};

/// Counts from one patch run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchReport {
    /// Element writes performed.
    pub applied: usize,
    /// Bindings whose target element was missing.
    pub missing: usize,
    /// Bindings skipped because the value was absent or falsy.
    pub empty: usize,
}

impl PatchReport {
    fn merge(&mut self, other: Self) {
        self.applied = self.applied.saturating_add(other.applied);
        self.missing = self.missing.saturating_add(other.missing);
        self.empty = self.empty.saturating_add(other.empty);
    }
}

/// Patches one page.
#[derive(Debug, Clone)]
pub struct Patcher {
    page: PageBindings,
}

impl Patcher {
    /// Patcher for `page` in `table`; `None` if the page has no bindings.
    #[must_use]
    pub fn for_page(table: &BindingTable, page: &str) -> Option<Self> {
        table.page(page).cloned().map(|page| Self { page })
    }

    /// Page name.
    #[must_use]
    pub fn page(&self) -> &str {
        &self.page.page
    }

    /// Every selector this page's bindings can touch, for seeding a DOM.
    #[must_use]
    pub fn selectors(&self) -> Vec<String> {
        let mut out = Vec::new();
        for section in &self.page.sections {
            for f in &section.fields {
                out.push(f.selector.clone());
            }
            for list in &section.lists {
                match &list.mode {
                    ListMode::Positional { item_selector, .. } => out.push(item_selector.clone()),
                    ListMode::Rebuild { container, .. } => out.push(container.clone()),
                }
            }
        }
        out.sort();
        out.dedup();
        out
    }

    /// Patch every section present in `document`.
    pub fn patch_document(&self, dom: &mut dyn Dom, document: &ContentDocument) -> PatchReport {
        let mut report = PatchReport::default();
        for (section, data) in document.iter() {
            report.merge(self.patch_section(dom, section, data));
        }
        report
    }

    /// Patch one section. Sections this page does not show are ignored.
    pub fn patch_section(&self, dom: &mut dyn Dom, section: &str, data: &Value) -> PatchReport {
        let mut report = PatchReport::default();
        for binding in self.page.sections.iter().filter(|b| b.section == section) {
            report.merge(patch_binding(dom, binding, data));
        }
        if report.applied > 0 {
            debug!(page = %self.page.page, section, applied = report.applied, "section patched");
        }
        report
    }
}

fn patch_binding(dom: &mut dyn Dom, binding: &SectionBinding, data: &Value) -> PatchReport {
    let mut report = PatchReport::default();

    for field in &binding.fields {
        let targets = dom.select_all(&field.selector);
        report.merge(apply_field(dom, &targets, field, data, &binding.section));
    }

    for list in &binding.lists {
        report.merge(apply_list(dom, list, data, &binding.section));
    }

    report
}

fn apply_field(
    dom: &mut dyn Dom,
    targets: &[NodeId],
    field: &FieldBinding,
    data: &Value,
    section: &str,
) -> PatchReport {
    let mut report = PatchReport::default();
    let Some(value) = lookup(data, &field.field).filter(|v| is_truthy(v)) else {
        report.empty = 1;
        return report;
    };
    let Some(text) = scalar_text(value) else {
        warn!(section, field = %field.field, "binding expects a scalar value, skipping");
        report.empty = 1;
        return report;
    };
    if targets.is_empty() {
        warn!(section, field = %field.field, selector = %field.selector, "patch target not found");
        report.missing = 1;
        return report;
    }

    for &node in targets {
        match field.render {
            Render::Text => dom.set_text(node, &text),
            Render::Html => dom.set_html(node, &text),
            Render::Src => dom.set_attribute(node, "src", &text),
            Render::Href => dom.set_attribute(node, "href", &text),
        }
        report.applied = report.applied.saturating_add(1);
    }
    report
}

fn apply_list(dom: &mut dyn Dom, list: &ListBinding, data: &Value, section: &str) -> PatchReport {
    let mut report = PatchReport::default();
    let Some(items) = lookup(data, &list.field).and_then(Value::as_array) else {
        report.empty = 1;
        return report;
    };

    match &list.mode {
        ListMode::Positional {
            item_selector,
            fields,
        } => {
            let nodes = dom.select_all(item_selector);
            for (index, item) in items.iter().enumerate() {
                let Some(&node) = nodes.get(index) else {
                    warn!(
                        section,
                        field = %list.field,
                        index,
                        selector = %item_selector,
                        "no element for list item"
                    );
                    report.missing = report.missing.saturating_add(1);
                    continue;
                };
                for field in fields {
                    let targets = dom.select_within(node, &field.selector);
                    report.merge(apply_field(dom, &targets, field, item, section));
                }
            }
        }
        ListMode::Rebuild {
            container,
            template,
        } => {
            let Some(node) = dom.select_first(container) else {
                warn!(section, field = %list.field, selector = %container, "list container not found");
                report.missing = 1;
                return report;
            };
            dom.clear_children(node);
            for item in items {
                dom.append_html(node, &render_template(template, item));
                report.applied = report.applied.saturating_add(1);
            }
        }
    }
    report
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

/// Substitute `{field}` placeholders with HTML-escaped item values.
///
/// Unknown or non-scalar fields render as empty strings. A `{` that does not
/// start a well-formed placeholder is copied through.
#[must_use]
pub fn render_template(template: &str, item: &Value) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        match after.find('}') {
            Some(end)
                if after[..end]
                    .bytes()
                    .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'.')
                    && end > 0 =>
            {
                let name = &after[..end];
                let value = lookup(item, name).and_then(scalar_text).unwrap_or_default();
                out.push_str(&escape_html(&value));
                rest = &after[end + 1..];
            }
            _ => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

fn escape_html(text: &str) -> String {
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
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::dom::MemoryDom;
    use serde_json::json;

    fn index() -> Patcher {
        Patcher::for_page(&BindingTable::site_default(), "index").unwrap()
    }

    #[test]
    fn writes_text_and_attributes() {
        let mut dom = MemoryDom::new();
        let title = dom.add(&["#hero-title"]);
        let cta = dom.add(&["#hero-cta"]);
        let image = dom.add(&["#hero-image"]);

        let report = index().patch_section(
            &mut dom,
            "hero",
            &json!({
                "title": "Tea for all",
                "backgroundImage": "/uploads/images/x.png",
                "cta": {"text": "Donate", "link": "/donate"}
            }),
        );

        assert_eq!(dom.text(title), Some("Tea for all"));
        assert_eq!(dom.text(cta), Some("Donate"));
        assert_eq!(dom.attribute(cta, "href"), Some("/donate"));
        assert_eq!(dom.attribute(image, "src"), Some("/uploads/images/x.png"));
        assert_eq!(report.applied, 4);
    }

    #[test]
    fn falsy_values_leave_elements_untouched() {
        let mut dom = MemoryDom::new();
        let title = dom.add(&["#hero-title"]);
        dom.set_text(title, "Original");

        let report = index().patch_section(&mut dom, "hero", &json!({"title": ""}));
        assert_eq!(dom.text(title), Some("Original"));
        assert_eq!(report.applied, 0);
        assert!(report.empty > 0);
    }

    #[test]
    fn missing_targets_are_skipped() {
        let mut dom = MemoryDom::new();
        let report = index().patch_section(&mut dom, "hero", &json!({"title": "X"}));
        assert_eq!(report.missing, 1);
        assert_eq!(report.applied, 0);
    }

    #[test]
    fn positional_lists_patch_by_index() {
        let mut dom = MemoryDom::new();
        let first = dom.add(&[".impact-stat"]);
        let first_value = dom.add_child(first, &[".stat-value"]);
        let second = dom.add(&[".impact-stat"]);
        let second_label = dom.add_child(second, &[".stat-label"]);

        let report = index().patch_section(
            &mut dom,
            "impact",
            &json!({"stats": [
                {"value": 1200, "label": "Farmers"},
                {"value": 30, "label": "Villages"},
                {"value": 5, "label": "Countries"}
            ]}),
        );

        assert_eq!(dom.text(first_value), Some("1200"));
        assert_eq!(dom.text(second_label), Some("Villages"));
        // One missing label in item 0, one missing value in item 1, no node for item 2.
        assert_eq!(report.missing, 3);
    }

    #[test]
    fn rebuild_lists_clear_and_render_escaped() {
        let mut dom = MemoryDom::new();
        let list = dom.add(&["#programs-list"]);
        dom.append_html(list, "<article>stale</article>");

        index().patch_section(
            &mut dom,
            "programs",
            &json!({"items": [
                {"title": "Schools & <Wells>", "description": "d", "image": "/a.png"}
            ]}),
        );

        let html = dom.html(list).unwrap();
        assert!(!html.contains("stale"));
        assert!(html.contains("<h3>Schools &amp; &lt;Wells&gt;</h3>"));
        assert!(html.contains(r#"src="/a.png""#));
    }

    #[test]
    fn document_patch_ignores_sections_not_on_page() {
        let mut dom = MemoryDom::new();
        let member = dom.add(&[".team-member"]);
        let name = dom.add_child(member, &[".member-name"]);
        let doc = ContentDocument::from_value(json!({"team": {"members": [{"name": "A"}]}})).unwrap();

        let report = index().patch_document(&mut dom, &doc);
        assert_eq!(report, PatchReport::default());
        assert_eq!(dom.text(name), Some(""));
    }

    #[test]
    fn template_rendering_edge_cases() {
        let item = json!({"a": "x", "n": {"b": 2}});
        assert_eq!(render_template("{a}-{n.b}-{zz}", &item), "x-2-");
        assert_eq!(render_template("{ not a placeholder }", &item), "{ not a placeholder }");
        assert_eq!(render_template("{}{a", &item), "{}{a");
    }

    #[test]
    fn selectors_lists_every_target() {
        let selectors = index().selectors();
        assert!(selectors.contains(&"#hero-title".to_owned()));
        assert!(selectors.contains(&"#programs-list".to_owned()));
        assert!(selectors.contains(&".impact-stat".to_owned()));
    }
}
