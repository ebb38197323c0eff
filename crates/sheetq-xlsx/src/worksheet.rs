use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use roxmltree::{Document, Node};
use sheetq_model::{
    parse_a1_area, AnchoredPicture, CellRef, PictureRef, ScalarValue, SheetCell, SheetDimension,
    SheetError, Worksheet, MAX_COLS, MAX_ROWS,
};

use crate::drawings::parse_drawing;
use crate::package::{XlsxError, XlsxPackage};
use crate::relationships::{Relationships, REL_NS};
use crate::rich_data::{vm_block, CellPictureTable};
use crate::shared_strings::{string_item_text, SharedStrings};

/// One worksheet part, parsed eagerly into memory.
#[derive(Debug, Clone)]
pub struct XlsxWorksheet {
    name: String,
    part: String,
    cells: HashMap<(u32, u32), SheetCell>,
    /// Cells carrying a `vm` attribute, mapped to their 0-based value-metadata block.
    value_metadata: HashMap<(u32, u32), u32>,
    hidden_rows: HashSet<u32>,
    dimension: Option<SheetDimension>,
    pictures: Vec<AnchoredPicture>,
    cell_pictures: Arc<CellPictureTable>,
}

impl XlsxWorksheet {
    pub(crate) fn parse(
        package: &XlsxPackage,
        name: &str,
        part: &str,
        shared_strings: &SharedStrings,
        cell_pictures: Arc<CellPictureTable>,
    ) -> Result<Self, XlsxError> {
        let xml = package.required_part_str(part)?;
        let doc = Document::parse(xml)?;
        let root = doc.root_element();

        let mut cells = HashMap::new();
        let mut raw_vm: Vec<((u32, u32), u32)> = Vec::new();
        let mut hidden_rows = HashSet::new();

        if let Some(sheet_data) = child(root, "sheetData") {
            let mut row_num = 0u32;
            for row in children(sheet_data, "row") {
                row_num = match row.attribute("r").and_then(|r| r.trim().parse().ok()) {
                    Some(r) => r,
                    None => row_num + 1,
                };
                if row_num == 0 || row_num > MAX_ROWS {
                    return Err(XlsxError::Invalid(format!("{part}: row {row_num} out of range")));
                }
                if row.attribute("hidden").is_some_and(is_true) {
                    hidden_rows.insert(row_num);
                }

                let mut col = 0u32;
                for c in children(row, "c") {
                    col = match c.attribute("r") {
                        Some(a1) => CellRef::from_a1(a1)
                            .map_err(|err| XlsxError::Invalid(format!("{part}: cell {a1:?}: {err}")))?
                            .col,
                        None => col + 1,
                    };
                    if col == 0 || col > MAX_COLS {
                        return Err(XlsxError::Invalid(format!("{part}: column {col} out of range")));
                    }

                    if let Some(vm) = c.attribute("vm").and_then(|vm| vm.trim().parse().ok()) {
                        raw_vm.push(((row_num, col), vm));
                    }
                    let value = cell_value(c, shared_strings);
                    if !value.is_empty() {
                        cells.insert((row_num, col), SheetCell::new(value));
                    }
                }
            }
        }

        let zero_based = raw_vm.iter().any(|(_, vm)| *vm == 0);
        let value_metadata: HashMap<(u32, u32), u32> = raw_vm
            .into_iter()
            .filter_map(|(at, vm)| Some((at, vm_block(vm, zero_based)?)))
            .filter(|(_, block)| cell_pictures.binds_picture(*block))
            .collect();

        let computed = bounding_box(cells.keys().chain(value_metadata.keys()));
        let declared = child(root, "dimension")
            .and_then(|d| d.attribute("ref"))
            .and_then(|area| parse_a1_area(area).ok())
            .map(|(start, end)| SheetDimension::new(start, end));
        let dimension = match (declared, computed) {
            (Some(declared), Some(computed)) if plausible_dimension(&declared, &computed) => {
                Some(declared)
            }
            (Some(declared), Some(computed)) => {
                log::debug!(
                    "{part}: <dimension> {}:{} does not fit the populated cells; using {}:{}",
                    declared.start.to_a1(),
                    declared.end.to_a1(),
                    computed.start.to_a1(),
                    computed.end.to_a1()
                );
                Some(computed)
            }
            (_, computed) => computed,
        };

        let pictures = match child(root, "drawing")
            .and_then(|d| d.attribute((REL_NS, "id")).or_else(|| d.attribute("r:id")))
        {
            Some(rel_id) => {
                let rels = Relationships::for_part(package, part)?;
                match rels.target_part(rel_id) {
                    Some(drawing) => parse_drawing(package, &drawing)?,
                    None => {
                        log::warn!("{part}: drawing relationship {rel_id} not found");
                        Vec::new()
                    }
                }
            }
            None => Vec::new(),
        };

        log::debug!(
            "parsed {part} ({name}): {} cells, {} in-cell pictures, {} drawing pictures",
            cells.len(),
            value_metadata.len(),
            pictures.len()
        );

        Ok(Self {
            name: name.to_string(),
            part: part.to_string(),
            cells,
            value_metadata,
            hidden_rows,
            dimension,
            pictures,
            cell_pictures,
        })
    }

    /// Package path of the worksheet part (e.g. `xl/worksheets/sheet1.xml`).
    pub fn part(&self) -> &str {
        &self.part
    }
}

impl Worksheet for XlsxWorksheet {
    fn name(&self) -> &str {
        &self.name
    }

    fn dimension(&self) -> Option<SheetDimension> {
        self.dimension
    }

    fn cell(&self, row: u32, col: u32) -> Result<SheetCell, SheetError> {
        if row == 0 || col == 0 || row > MAX_ROWS || col > MAX_COLS {
            return Err(SheetError::CellOutOfRange { row, col });
        }
        Ok(self.cells.get(&(row, col)).cloned().unwrap_or_default())
    }

    fn is_row_hidden(&self, row: u32) -> bool {
        self.hidden_rows.contains(&row)
    }

    fn has_cell_picture(&self, row: u32, col: u32) -> bool {
        self.value_metadata.contains_key(&(row, col))
    }

    fn cell_picture(&self, row: u32, col: u32) -> Option<PictureRef> {
        let block = self.value_metadata.get(&(row, col))?;
        self.cell_pictures.picture(*block).cloned()
    }

    fn pictures(&self) -> Box<dyn Iterator<Item = AnchoredPicture> + '_> {
        Box::new(self.pictures.iter().cloned())
    }
}

fn child<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Option<Node<'a, 'input>> {
    node.children()
        .find(|n| n.is_element() && n.tag_name().name() == name)
}

fn children<'a, 'input: 'a>(
    node: Node<'a, 'input>,
    name: &'static str,
) -> impl Iterator<Item = Node<'a, 'input>> {
    node.children()
        .filter(move |n| n.is_element() && n.tag_name().name() == name)
}

fn is_true(value: &str) -> bool {
    matches!(value.trim(), "1" | "true")
}

fn cell_value(c: Node<'_, '_>, shared_strings: &SharedStrings) -> ScalarValue {
    let cell_type = c.attribute("t").unwrap_or("n");
    if cell_type == "inlineStr" {
        return child(c, "is")
            .map(|is| ScalarValue::Text(string_item_text(is)))
            .unwrap_or_default();
    }

    let Some(raw) = child(c, "v").and_then(|v| v.text()) else {
        return ScalarValue::Empty;
    };
    match cell_type {
        "s" => match raw.trim().parse::<usize>().ok().and_then(|i| shared_strings.get(i)) {
            Some(text) => ScalarValue::Text(text.to_string()),
            None => {
                log::warn!("shared string index {raw:?} out of range");
                ScalarValue::Empty
            }
        },
        "b" => ScalarValue::Bool(is_true(raw)),
        "e" => ScalarValue::Error(raw.trim().to_string()),
        "str" | "d" => ScalarValue::Text(raw.to_string()),
        _ => match raw.trim().parse::<f64>() {
            Ok(n) => ScalarValue::Number(n),
            Err(_) => ScalarValue::Text(raw.to_string()),
        },
    }
}

/// Rows and columns a declared `<dimension>` may run past the populated cells, e.g. for
/// formatted blanks.
const DIMENSION_ROW_SLACK: u32 = 1024;
const DIMENSION_COL_SLACK: u32 = 64;

/// A declared dimension is kept only if it covers the populated cells and is not far larger
/// than them. Writers that declare `A1:XFD1048576` would otherwise make every cell of the
/// sheet a picture lookup.
fn plausible_dimension(declared: &SheetDimension, computed: &SheetDimension) -> bool {
    declared.contains(computed.start.row, computed.start.col)
        && declared.contains(computed.end.row, computed.end.col)
        && declared.rows() <= computed.rows().saturating_add(DIMENSION_ROW_SLACK)
        && declared.columns() <= computed.columns().saturating_add(DIMENSION_COL_SLACK)
}

fn bounding_box<'a>(cells: impl Iterator<Item = &'a (u32, u32)>) -> Option<SheetDimension> {
    let mut bounds: Option<(u32, u32, u32, u32)> = None;
    for &(row, col) in cells {
        bounds = Some(match bounds {
            None => (row, col, row, col),
            Some((r0, c0, r1, c1)) => (r0.min(row), c0.min(col), r1.max(row), c1.max(col)),
        });
    }
    bounds.map(|(r0, c0, r1, c1)| SheetDimension::new(CellRef::new(r0, c0), CellRef::new(r1, c1)))
}
