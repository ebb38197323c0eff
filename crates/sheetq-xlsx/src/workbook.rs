use std::path::Path;
use std::sync::Arc;

use roxmltree::Document;
use sheetq_model::{SheetError, WorkbookSource, Worksheet};

use crate::package::{XlsxError, XlsxLimits, XlsxPackage};
use crate::relationships::{Relationships, REL_NS};
use crate::rich_data::CellPictureTable;
use crate::shared_strings::SharedStrings;
use crate::worksheet::XlsxWorksheet;

const DEFAULT_WORKBOOK_PART: &str = "xl/workbook.xml";

#[derive(Debug, Clone, PartialEq, Eq)]
struct SheetEntry {
    name: String,
    part: String,
}

/// A read-only XLSX workbook held in memory. Worksheets are parsed when requested.
#[derive(Debug)]
pub struct XlsxWorkbook {
    package: XlsxPackage,
    sheets: Vec<SheetEntry>,
    shared_strings: SharedStrings,
    cell_pictures: Arc<CellPictureTable>,
}

impl XlsxWorkbook {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, XlsxError> {
        Self::open_limited(path, XlsxLimits::default())
    }

    pub fn open_limited(path: impl AsRef<Path>, limits: XlsxLimits) -> Result<Self, XlsxError> {
        let bytes = std::fs::read(path.as_ref())?;
        Self::from_bytes_limited(&bytes, limits)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, XlsxError> {
        Self::from_bytes_limited(bytes, XlsxLimits::default())
    }

    pub fn from_bytes_limited(bytes: &[u8], limits: XlsxLimits) -> Result<Self, XlsxError> {
        Self::from_package(XlsxPackage::from_bytes_limited(bytes, limits)?)
    }

    pub fn from_package(package: XlsxPackage) -> Result<Self, XlsxError> {
        let workbook_part = workbook_part(&package)?;
        let sheets = sheet_entries(&package, &workbook_part)?;

        let shared_strings = match package.part_str("xl/sharedStrings.xml")? {
            Some(xml) => SharedStrings::parse(xml)?,
            None => SharedStrings::default(),
        };
        let cell_pictures = Arc::new(CellPictureTable::load(&package)?);

        log::debug!(
            "opened workbook: {} sheets, {} shared strings, in-cell pictures: {}",
            sheets.len(),
            shared_strings.len(),
            !cell_pictures.is_empty()
        );
        Ok(Self {
            package,
            sheets,
            shared_strings,
            cell_pictures,
        })
    }

    pub fn sheet_names(&self) -> Vec<String> {
        self.sheets.iter().map(|s| s.name.clone()).collect()
    }

    /// Parse the named worksheet. Names match exactly first, then ASCII case-insensitively.
    pub fn worksheet(&self, name: &str) -> Result<XlsxWorksheet, XlsxError> {
        let entry = self
            .sheets
            .iter()
            .find(|s| s.name == name)
            .or_else(|| self.sheets.iter().find(|s| s.name.eq_ignore_ascii_case(name)))
            .ok_or_else(|| XlsxError::SheetNotFound(name.to_string()))?;
        XlsxWorksheet::parse(
            &self.package,
            &entry.name,
            &entry.part,
            &self.shared_strings,
            Arc::clone(&self.cell_pictures),
        )
    }

    pub fn package(&self) -> &XlsxPackage {
        &self.package
    }
}

impl WorkbookSource for XlsxWorkbook {
    fn sheet_names(&self) -> Vec<String> {
        XlsxWorkbook::sheet_names(self)
    }

    fn worksheet(&self, name: &str) -> Result<Arc<dyn Worksheet>, SheetError> {
        match XlsxWorkbook::worksheet(self, name) {
            Ok(ws) => Ok(Arc::new(ws)),
            Err(XlsxError::SheetNotFound(name)) => Err(SheetError::SheetNotFound(name)),
            Err(err) => Err(SheetError::Backend(err.to_string())),
        }
    }
}

/// The office document part named by the package root relationships.
fn workbook_part(package: &XlsxPackage) -> Result<String, XlsxError> {
    let root = Relationships::for_part(package, "")?;
    if let Some(part) = root
        .find_by_type("officeDocument")
        .and_then(|rel| root.target_part(&rel.id))
        .filter(|part| package.part(part).is_some())
    {
        return Ok(part);
    }
    if package.part(DEFAULT_WORKBOOK_PART).is_some() {
        return Ok(DEFAULT_WORKBOOK_PART.to_string());
    }
    Err(XlsxError::MissingPart(DEFAULT_WORKBOOK_PART.to_string()))
}

fn sheet_entries(package: &XlsxPackage, workbook_part: &str) -> Result<Vec<SheetEntry>, XlsxError> {
    let xml = package.required_part_str(workbook_part)?;
    let doc = Document::parse(xml)?;
    let rels = Relationships::for_part(package, workbook_part)?;

    let mut sheets = Vec::new();
    for (index, node) in doc
        .descendants()
        .filter(|n| n.is_element() && n.tag_name().name() == "sheet")
        .enumerate()
    {
        let name = node.attribute("name").unwrap_or_default();
        if name.trim().is_empty() {
            log::debug!("skipping sheet #{index} with a blank name");
            continue;
        }
        let rel_id = node
            .attribute((REL_NS, "id"))
            .or_else(|| node.attribute("r:id"))
            .ok_or_else(|| XlsxError::Invalid(format!("sheet {name:?} has no r:id")))?;
        if rels
            .get(rel_id)
            .is_some_and(|rel| !rel.type_.ends_with("/worksheet"))
        {
            log::debug!("skipping non-worksheet sheet {name:?}");
            continue;
        }
        let part = rels.target_part(rel_id).ok_or_else(|| {
            XlsxError::Invalid(format!("sheet {name:?}: relationship {rel_id} not found"))
        })?;
        sheets.push(SheetEntry {
            name: name.to_string(),
            part,
        });
    }
    Ok(sheets)
}
