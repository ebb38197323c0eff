use std::collections::HashMap;

use roxmltree::Document;

use crate::package::{XlsxError, XlsxPackage};

pub(crate) const REL_NS: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships";

/// One `<Relationship>` of a `.rels` part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relationship {
    pub id: String,
    pub type_: String,
    pub target: String,
    /// `TargetMode="External"` targets are URIs, not package parts.
    pub external: bool,
}

/// The relationships declared by one source part, keyed by `Id`.
#[derive(Debug, Clone, Default)]
pub struct Relationships {
    source: String,
    by_id: HashMap<String, Relationship>,
}

impl Relationships {
    /// Load the `.rels` part belonging to `source`. A missing `.rels` part yields an empty set.
    pub fn for_part(package: &XlsxPackage, source: &str) -> Result<Self, XlsxError> {
        let rels_name = rels_for_part(source);
        let Some(xml) = package.part_str(&rels_name)? else {
            return Ok(Self {
                source: source.to_string(),
                by_id: HashMap::new(),
            });
        };
        Self::parse(source, xml)
    }

    pub fn parse(source: &str, xml: &str) -> Result<Self, XlsxError> {
        let doc = Document::parse(xml)?;
        let by_id = doc
            .descendants()
            .filter(|n| n.is_element() && n.tag_name().name() == "Relationship")
            .filter_map(|node| {
                let id = node.attribute("Id")?;
                Some(Relationship {
                    id: id.to_string(),
                    type_: node.attribute("Type").unwrap_or_default().to_string(),
                    target: node.attribute("Target").unwrap_or_default().to_string(),
                    external: node
                        .attribute("TargetMode")
                        .is_some_and(|mode| mode.eq_ignore_ascii_case("External")),
                })
            })
            .map(|rel| (rel.id.clone(), rel))
            .collect();
        Ok(Self {
            source: source.to_string(),
            by_id,
        })
    }

    pub fn get(&self, id: &str) -> Option<&Relationship> {
        self.by_id.get(id)
    }

    /// Package path of the part `id` points at. External targets resolve to `None`.
    pub fn target_part(&self, id: &str) -> Option<String> {
        let rel = self.get(id)?;
        if rel.external {
            return None;
        }
        Some(resolve_target(&self.source, &rel.target))
    }

    /// First relationship whose type ends with `/suffix`, e.g. `sheetMetadata`.
    pub fn find_by_type(&self, suffix: &str) -> Option<&Relationship> {
        let mut matches: Vec<&Relationship> = self
            .by_id
            .values()
            .filter(|rel| rel.type_.rsplit('/').next() == Some(suffix))
            .collect();
        matches.sort_by(|a, b| a.id.cmp(&b.id));
        matches.into_iter().next()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

pub fn rels_for_part(part: &str) -> String {
    let part = part.trim_start_matches('/');
    match part.rsplit_once('/') {
        Some((dir, file)) => format!("{dir}/_rels/{file}.rels"),
        None => format!("_rels/{part}.rels"),
    }
}

/// Resolve a relationship target against the directory of the part that declared it.
pub fn resolve_target(source_part: &str, target: &str) -> String {
    // Part names never carry a URI fragment.
    let target = target.split('#').next().unwrap_or_default();
    if target.is_empty() {
        return normalize(source_part);
    }
    if let Some(absolute) = target.strip_prefix('/') {
        return normalize(absolute);
    }
    let dir = source_part.rsplit_once('/').map_or("", |(dir, _)| dir);
    normalize(&format!("{dir}/{target}"))
}

fn normalize(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split(['/', '\\']) {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    segments.join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rels_part_names() {
        assert_eq!(rels_for_part("xl/workbook.xml"), "xl/_rels/workbook.xml.rels");
        assert_eq!(rels_for_part("/xl/worksheets/sheet1.xml"), "xl/worksheets/_rels/sheet1.xml.rels");
        assert_eq!(rels_for_part("workbook.xml"), "_rels/workbook.xml.rels");
    }

    #[test]
    fn targets_resolve_relative_to_the_source() {
        assert_eq!(
            resolve_target("xl/drawings/drawing1.xml", "../media/image1.png"),
            "xl/media/image1.png"
        );
        assert_eq!(
            resolve_target("xl/workbook.xml", "worksheets/sheet1.xml#frag"),
            "xl/worksheets/sheet1.xml"
        );
        assert_eq!(resolve_target("xl/workbook.xml", "/xl/./styles.xml"), "xl/styles.xml");
        assert_eq!(resolve_target("xl/workbook.xml", "#only"), "xl/workbook.xml");
    }

    #[test]
    fn parses_ids_types_and_external_targets() {
        let xml = r#"<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">
            <Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/image" Target="../media/image1.png"/>
            <Relationship Id="rId2" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/hyperlink" Target="https://example.com" TargetMode="External"/>
        </Relationships>"#;
        let rels = Relationships::parse("xl/drawings/drawing1.xml", xml).unwrap();
        assert_eq!(rels.len(), 2);
        assert_eq!(rels.target_part("rId1").as_deref(), Some("xl/media/image1.png"));
        assert_eq!(rels.target_part("rId2"), None);
        assert_eq!(rels.find_by_type("image").map(|r| r.id.as_str()), Some("rId1"));
        assert!(rels.get("rId9").is_none());
    }
}
