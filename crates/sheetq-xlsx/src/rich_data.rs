//! In-cell pictures ("Place in Cell") stored through Excel's rich value mechanism.
//!
//! A worksheet cell carries `vm="N"`, which selects a `<bk>` of `<valueMetadata>` in
//! `xl/metadata.xml`. That block points (through `futureMetadata name="XLRICHVALUE"` or an
//! `extLst` binding) at a rich value index, which in turn selects an `r:id` in
//! `xl/richData/richValueRel.xml`. The relationship target is the picture part.
//!
//! Every step is best-effort: missing parts or malformed indices leave the cell as a picture
//! without a payload rather than failing the workbook.

use std::collections::HashMap;

use roxmltree::{Document, Node};
use sheetq_model::PictureRef;

use crate::package::{XlsxError, XlsxPackage};
use crate::relationships::{Relationships, REL_NS};

const METADATA_PART: &str = "xl/metadata.xml";
const RICH_VALUE_REL_PART: &str = "xl/richData/richValueRel.xml";
const XLRICHVALUE: &str = "XLRICHVALUE";

/// Value-metadata block index (0-based) to the picture it binds, if the payload resolved.
#[derive(Debug, Clone, Default)]
pub struct CellPictureTable {
    blocks: HashMap<u32, Option<PictureRef>>,
}

impl CellPictureTable {
    pub fn load(package: &XlsxPackage) -> Result<Self, XlsxError> {
        let Some(metadata_xml) = package.part_str(METADATA_PART)? else {
            return Ok(Self::default());
        };
        let doc = Document::parse(metadata_xml)?;
        let rich_values = value_metadata_to_rich_value(&doc);
        if rich_values.is_empty() {
            return Ok(Self::default());
        }

        let rel_ids = match package.part_str(RICH_VALUE_REL_PART)? {
            Some(xml) => rich_value_rel_ids(&Document::parse(xml)?),
            None => Vec::new(),
        };
        let rels = Relationships::for_part(package, RICH_VALUE_REL_PART)?;

        let blocks = rich_values
            .into_iter()
            .map(|(block, rich_value)| {
                let picture = rel_ids
                    .get(rich_value as usize)
                    .and_then(|id| rels.target_part(id))
                    .and_then(|target| {
                        let bytes = package.shared_part(&target)?;
                        Some(PictureRef::named(bytes.clone(), target))
                    });
                if picture.is_none() {
                    log::debug!("rich value {rich_value} (block {block}) has no picture payload");
                }
                (block, picture)
            })
            .collect();
        Ok(Self { blocks })
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Whether value-metadata block `block` binds a rich value picture.
    pub fn binds_picture(&self, block: u32) -> bool {
        self.blocks.contains_key(&block)
    }

    pub fn picture(&self, block: u32) -> Option<&PictureRef> {
        self.blocks.get(&block)?.as_ref()
    }
}

/// Map a cell's `vm` attribute to a 0-based block index.
///
/// Excel writes `vm` 1-based; some producers write it 0-based, which shows up as a `vm="0"`
/// somewhere in the sheet.
pub fn vm_block(vm: u32, sheet_uses_zero_based: bool) -> Option<u32> {
    if sheet_uses_zero_based {
        Some(vm)
    } else {
        vm.checked_sub(1)
    }
}

fn elements<'a, 'input: 'a>(
    node: Node<'a, 'input>,
    name: &'a str,
) -> impl Iterator<Item = Node<'a, 'input>> + 'a {
    node.children()
        .filter(move |n| n.is_element() && n.tag_name().name() == name)
}

fn find<'a, 'input>(doc: &'a Document<'input>, name: &str) -> Option<Node<'a, 'input>> {
    doc.descendants()
        .find(|n| n.is_element() && n.tag_name().name() == name)
}

/// `<bk>` children of a list element; some producers wrap them one level deeper.
fn blocks_of<'a, 'input>(list: Node<'a, 'input>) -> Vec<Node<'a, 'input>> {
    let direct: Vec<_> = elements(list, "bk").collect();
    if !direct.is_empty() {
        return direct;
    }
    list.descendants()
        .filter(|n| n.is_element() && n.tag_name().name() == "bk")
        .collect()
}

fn first_rvb(node: Node<'_, '_>) -> Option<u32> {
    node.descendants()
        .filter(|n| n.is_element() && n.tag_name().name() == "rvb")
        .find_map(|rvb| rvb.attribute("i")?.parse().ok())
}

fn value_metadata_to_rich_value(doc: &Document<'_>) -> HashMap<u32, u32> {
    let mut out = HashMap::new();
    let Some(value_metadata) = find(doc, "valueMetadata") else {
        return out;
    };

    let type_names: Vec<&str> = find(doc, "metadataTypes")
        .map(|types| {
            elements(types, "metadataType")
                .filter_map(|t| t.attribute("name"))
                .collect()
        })
        .unwrap_or_default();
    let future: Option<Vec<Option<u32>>> = doc
        .descendants()
        .filter(|n| n.is_element() && n.tag_name().name() == "futureMetadata")
        .find(|n| {
            n.attribute("name")
                .is_some_and(|name| name.eq_ignore_ascii_case(XLRICHVALUE))
        })
        .map(|fm| blocks_of(fm).into_iter().map(first_rvb).collect());

    match future {
        Some(future) if !type_names.is_empty() => {
            // `t` is 1-based in files Excel writes; accept 0-based as well.
            let is_rich_type = |t: usize| {
                [t.checked_sub(1), Some(t)]
                    .into_iter()
                    .flatten()
                    .filter_map(|idx| type_names.get(idx))
                    .any(|name| name.eq_ignore_ascii_case(XLRICHVALUE))
            };
            for (block, bk) in blocks_of(value_metadata).into_iter().enumerate() {
                let rich_value = elements(bk, "rc").find_map(|rc| {
                    let t: usize = rc.attribute("t")?.parse().ok()?;
                    if !is_rich_type(t) {
                        return None;
                    }
                    let v: usize = rc.attribute("v")?.parse().ok()?;
                    future.get(v).copied().flatten()
                });
                if let Some(rich_value) = rich_value {
                    out.insert(block as u32, rich_value);
                }
            }
        }
        _ => {
            let bindings: Vec<u32> = doc
                .descendants()
                .filter(|n| n.is_element() && n.tag_name().name() == "extLst")
                .flat_map(|ext| {
                    ext.descendants()
                        .filter(|n| n.is_element() && n.tag_name().name() == "rvb")
                        .filter_map(|rvb| rvb.attribute("i")?.parse().ok())
                        .collect::<Vec<u32>>()
                })
                .collect();
            for (block, bk) in blocks_of(value_metadata).into_iter().enumerate() {
                let rich_value = elements(bk, "rc")
                    .find_map(|rc| rc.attribute("v")?.parse::<usize>().ok())
                    .and_then(|v| bindings.get(v).copied());
                if let Some(rich_value) = rich_value {
                    out.insert(block as u32, rich_value);
                }
            }
        }
    }
    out
}

fn rich_value_rel_ids(doc: &Document<'_>) -> Vec<String> {
    doc.descendants()
        .filter(|n| n.is_element())
        .filter_map(|n| n.attribute((REL_NS, "id")).or_else(|| n.attribute("r:id")))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const FUTURE_METADATA: &str = r#"<metadata xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:xlrd="http://schemas.microsoft.com/office/spreadsheetml/2017/richdata">
  <metadataTypes count="1"><metadataType name="XLRICHVALUE" minSupportedVersion="120000"/></metadataTypes>
  <futureMetadata name="XLRICHVALUE" count="2">
    <bk><extLst><ext uri="{3e2802c4-a4d2-4d8b-9148-e3be6c30e623}"><xlrd:rvb i="0"/></ext></extLst></bk>
    <bk><extLst><ext uri="{3e2802c4-a4d2-4d8b-9148-e3be6c30e623}"><xlrd:rvb i="1"/></ext></extLst></bk>
  </futureMetadata>
  <valueMetadata count="2"><bk><rc t="1" v="0"/></bk><bk><rc t="1" v="1"/></bk></valueMetadata>
</metadata>"#;

    #[test]
    fn future_metadata_blocks_map_to_rich_values() {
        let doc = Document::parse(FUTURE_METADATA).unwrap();
        let map = value_metadata_to_rich_value(&doc);
        assert_eq!(map.get(&0), Some(&0));
        assert_eq!(map.get(&1), Some(&1));
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn extlst_bindings_are_a_fallback() {
        let xml = r#"<metadata xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main">
  <valueMetadata count="1"><bk><rc t="1" v="0"/></bk></valueMetadata>
  <extLst><ext><rvb i="3"/></ext></extLst>
</metadata>"#;
        let doc = Document::parse(xml).unwrap();
        assert_eq!(value_metadata_to_rich_value(&doc).get(&0), Some(&3));
    }

    #[test]
    fn vm_is_one_based_unless_the_sheet_says_otherwise() {
        assert_eq!(vm_block(1, false), Some(0));
        assert_eq!(vm_block(0, false), None);
        assert_eq!(vm_block(0, true), Some(0));
    }

    #[test]
    fn rel_ids_are_read_in_order() {
        let xml = r#"<richValueRels xmlns="http://schemas.microsoft.com/office/spreadsheetml/2022/richvaluerel" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><rel r:id="rId2"/><rel r:id="rId1"/></richValueRels>"#;
        let doc = Document::parse(xml).unwrap();
        assert_eq!(rich_value_rel_ids(&doc), vec!["rId2", "rId1"]);
    }
}
