use roxmltree::{Document, Node};

use crate::package::XlsxError;

/// Plain text of every `<si>` in `xl/sharedStrings.xml`, in index order.
///
/// Rich-text runs are flattened; phonetic hints (`<rPh>`) are dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SharedStrings {
    items: Vec<String>,
}

impl SharedStrings {
    pub fn parse(xml: &str) -> Result<Self, XlsxError> {
        let doc = Document::parse(xml)?;
        let items = doc
            .root_element()
            .children()
            .filter(|n| n.is_element() && n.tag_name().name() == "si")
            .map(|si| string_item_text(si))
            .collect();
        Ok(Self { items })
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.items.get(index).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Text of a string item (`<si>` or `<is>`): either one `<t>` or a run list of `<r><t>`.
pub(crate) fn string_item_text(node: Node<'_, '_>) -> String {
    let mut out = String::new();
    for child in node.children().filter(Node::is_element) {
        match child.tag_name().name() {
            "t" => out.push_str(child.text().unwrap_or_default()),
            "r" => {
                for t in child
                    .children()
                    .filter(|n| n.is_element() && n.tag_name().name() == "t")
                {
                    out.push_str(t.text().unwrap_or_default());
                }
            }
            _ => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flattens_runs_and_skips_phonetics() {
        let xml = r#"<sst xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" count="3" uniqueCount="3">
            <si><t>Name</t></si>
            <si><r><rPr><b/></rPr><t>Bold</t></r><r><t xml:space="preserve"> tail</t></r></si>
            <si><t>東京</t><rPh sb="0" eb="2"><t>トウキョウ</t></rPh></si>
            <si/>
        </sst>"#;
        let strings = SharedStrings::parse(xml).unwrap();
        assert_eq!(strings.len(), 4);
        assert_eq!(strings.get(0), Some("Name"));
        assert_eq!(strings.get(1), Some("Bold tail"));
        assert_eq!(strings.get(2), Some("東京"));
        assert_eq!(strings.get(3), Some(""));
        assert_eq!(strings.get(4), None);
    }
}
