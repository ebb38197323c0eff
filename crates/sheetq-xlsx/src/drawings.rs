use roxmltree::{Document, Node};
use sheetq_model::{AnchoredPicture, PictureRef};

use crate::package::{XlsxError, XlsxPackage};
use crate::relationships::{Relationships, REL_NS};

/// Pictures anchored on one drawing part (`xl/drawings/drawingN.xml`), in document order.
///
/// Only `oneCellAnchor` and `twoCellAnchor` carry a cell position; `absoluteAnchor` pictures
/// are skipped. A picture whose blip target is missing from the package is dropped with a
/// warning.
pub fn parse_drawing(package: &XlsxPackage, drawing_part: &str) -> Result<Vec<AnchoredPicture>, XlsxError> {
    let Some(xml) = package.part_str(drawing_part)? else {
        log::warn!("drawing part {drawing_part} is missing");
        return Ok(Vec::new());
    };
    let rels = Relationships::for_part(package, drawing_part)?;
    let doc = Document::parse(xml)?;

    let mut pictures = Vec::new();
    for anchor in doc.root_element().children().filter(Node::is_element) {
        if !matches!(anchor.tag_name().name(), "oneCellAnchor" | "twoCellAnchor") {
            continue;
        }
        let Some((row, col)) = anchor_from(anchor) else {
            log::debug!("{drawing_part}: anchor without a usable <from>");
            continue;
        };
        let Some(embed) = anchor
            .children()
            .find(|n| n.is_element() && n.tag_name().name() == "pic")
            .and_then(blip_embed)
        else {
            continue;
        };
        let Some(target) = rels.target_part(embed) else {
            log::warn!("{drawing_part}: no relationship {embed}");
            continue;
        };
        let Some(bytes) = package.shared_part(&target) else {
            log::warn!("{drawing_part}: picture part {target} is missing");
            continue;
        };
        pictures.push(AnchoredPicture {
            row,
            col,
            picture: PictureRef::named(bytes.clone(), target),
        });
    }
    Ok(pictures)
}

/// 0-based `(row, col)` of an anchor's `<xdr:from>`.
fn anchor_from(anchor: Node<'_, '_>) -> Option<(u32, u32)> {
    let from = anchor
        .children()
        .find(|n| n.is_element() && n.tag_name().name() == "from")?;
    let field = |name: &str| -> Option<u32> {
        from.children()
            .find(|n| n.is_element() && n.tag_name().name() == name)?
            .text()?
            .trim()
            .parse()
            .ok()
    };
    Some((field("row")?, field("col")?))
}

fn blip_embed<'a>(pic: Node<'a, '_>) -> Option<&'a str> {
    let blip = pic
        .descendants()
        .find(|n| n.is_element() && n.tag_name().name() == "blip")?;
    blip.attribute((REL_NS, "embed"))
        .or_else(|| blip.attribute("r:embed"))
}
