use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use image::{ImageFormat, Rgba, RgbaImage};
use pretty_assertions::assert_eq;
use zip::write::SimpleFileOptions;

const MAIN_NS: &str = "http://schemas.openxmlformats.org/spreadsheetml/2006/main";
const R_NS: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";

fn rel(id: &str, ty: &str, target: &str) -> String {
    format!(
        r#"<Relationship Id="{id}" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/{ty}" Target="{target}"/>"#
    )
}

fn rels(body: String) -> Vec<u8> {
    format!(
        r#"<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">{body}</Relationships>"#
    )
    .into_bytes()
}

/// `People`: Name/Age/Photo with a 4x3 picture anchored on C2 and a hidden row 4.
fn write_fixture(dir: &Path) -> PathBuf {
    let mut png = Cursor::new(Vec::new());
    RgbaImage::from_pixel(4, 3, Rgba([0, 0, 255, 255]))
        .write_to(&mut png, ImageFormat::Png)
        .unwrap();

    let sheet = format!(
        r#"<worksheet xmlns="{MAIN_NS}" xmlns:r="{R_NS}"><sheetData>
<row r="1"><c r="A1" t="inlineStr"><is><t>Name</t></is></c><c r="B1" t="inlineStr"><is><t>Age</t></is></c><c r="C1" t="inlineStr"><is><t>Photo</t></is></c></row>
<row r="2"><c r="A2" t="inlineStr"><is><t>Alice</t></is></c><c r="B2"><v>30</v></c><c r="C2" t="inlineStr"><is><t>smile</t></is></c></row>
<row r="3"><c r="A3" t="inlineStr"><is><t>Bob</t></is></c><c r="B3"><v>25</v></c></row>
<row r="4" hidden="1"><c r="A4" t="inlineStr"><is><t>Carol</t></is></c></row>
</sheetData><drawing r:id="rId1"/></worksheet>"#
    );
    let drawing = r#"<xdr:wsDr xmlns:xdr="http://schemas.openxmlformats.org/drawingml/2006/spreadsheetDrawing" xmlns:a="http://schemas.openxmlformats.org/drawingml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><xdr:oneCellAnchor><xdr:from><xdr:col>2</xdr:col><xdr:colOff>0</xdr:colOff><xdr:row>1</xdr:row><xdr:rowOff>0</xdr:rowOff></xdr:from><xdr:ext cx="1" cy="1"/><xdr:pic><xdr:blipFill><a:blip r:embed="rId1"/></xdr:blipFill></xdr:pic><xdr:clientData/></xdr:oneCellAnchor></xdr:wsDr>"#;

    let parts: Vec<(&str, Vec<u8>)> = vec![
        (
            "xl/workbook.xml",
            format!(
                r#"<workbook xmlns="{MAIN_NS}" xmlns:r="{R_NS}"><sheets><sheet name="People" sheetId="1" r:id="rId1"/><sheet name="Empty" sheetId="2" r:id="rId2"/></sheets></workbook>"#
            )
            .into_bytes(),
        ),
        (
            "xl/_rels/workbook.xml.rels",
            rels(rel("rId1", "worksheet", "worksheets/sheet1.xml") + &rel("rId2", "worksheet", "worksheets/sheet2.xml")),
        ),
        ("xl/worksheets/sheet1.xml", sheet.into_bytes()),
        (
            "xl/worksheets/sheet2.xml",
            format!(r#"<worksheet xmlns="{MAIN_NS}"><sheetData/></worksheet>"#).into_bytes(),
        ),
        (
            "xl/worksheets/_rels/sheet1.xml.rels",
            rels(rel("rId1", "drawing", "../drawings/drawing1.xml")),
        ),
        ("xl/drawings/drawing1.xml", drawing.as_bytes().to_vec()),
        (
            "xl/drawings/_rels/drawing1.xml.rels",
            rels(rel("rId1", "image", "../media/image1.png")),
        ),
        ("xl/media/image1.png", png.into_inner()),
    ];

    let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, bytes) in parts {
        zip.start_file(name, SimpleFileOptions::default()).unwrap();
        zip.write_all(&bytes).unwrap();
    }
    let path = dir.join("people.xlsx");
    std::fs::write(&path, zip.finish().unwrap().into_inner()).unwrap();
    path
}

fn sheetq(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_sheetq"))
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .expect("run sheetq")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn lists_sheets() {
    let dir = tempfile::tempdir().unwrap();
    let book = write_fixture(dir.path());
    let output = sheetq(&["sheets", book.to_str().unwrap()]);
    assert!(output.status.success());
    assert_eq!(stdout(&output), "People\nEmpty\n");
}

#[test]
fn query_prints_matching_rows_and_status() {
    let dir = tempfile::tempdir().unwrap();
    let book = write_fixture(dir.path());
    let output = sheetq(&["query", book.to_str().unwrap(), "--query", "alice"]);
    assert!(
        output.status.success(),
        "stderr:\n{}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert_eq!(
        stdout(&output),
        "#\tName\tAge\tPhoto\n1\tAlice\t30\t[image 4x3] smile\n"
    );
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Loading worksheet 'People'..."), "{stderr}");
    assert!(stderr.contains("Search complete - 1 records"), "{stderr}");
    let last = stderr.lines().last().unwrap_or_default();
    assert!(last.starts_with("Load complete") && last.ends_with(", 1 records"), "{stderr}");
}

#[test]
fn no_images_and_json_output() {
    let dir = tempfile::tempdir().unwrap();
    let book = write_fixture(dir.path());
    let output = sheetq(&[
        "query",
        book.to_str().unwrap(),
        "--no-images",
        "--format",
        "json",
    ]);
    assert!(output.status.success());
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["sheet"], "People");
    assert_eq!(report["total"], 2);
    assert_eq!(report["rows"][0]["cells"], serde_json::json!(["Alice", "30", "smile"]));
    assert_eq!(report["rows"][1]["row"], 2);
}

#[test]
fn empty_sheet_fails_with_a_message() {
    let dir = tempfile::tempdir().unwrap();
    let book = write_fixture(dir.path());
    let output = sheetq(&["query", book.to_str().unwrap(), "--sheet", "Empty"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("no used range"), "{stderr}");
}

#[test]
fn missing_file_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("missing.xlsx");
    let output = sheetq(&["sheets", missing.to_str().unwrap()]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("open workbook"));
}

#[test]
fn closed_stdout_is_not_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let book = write_fixture(dir.path());
    let mut child = Command::new(env!("CARGO_BIN_EXE_sheetq"))
        .args(["query", book.to_str().unwrap()])
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn sheetq");
    drop(child.stdout.take());
    let output = child.wait_with_output().expect("wait for sheetq");
    assert!(
        output.status.success(),
        "stderr:\n{}",
        String::from_utf8_lossy(&output.stderr)
    );
}
