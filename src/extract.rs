//! Extracción de texto de los ficheros subidos según su extensión.
//!
//! - `pdf`: `pdf-extract`
//! - `docx`: `docx-rs` (párrafos del cuerpo)
//! - `pptx`: `zip` + `quick-xml` (elementos `<a:t>` de cada diapositiva)
//! - `xlsx` / `xls`: `calamine` (una línea por fila)
//! - `html` / `htm`: `scraper`, sin etiquetas ni scripts
//! - resto: texto UTF-8 tal cual.
//!
//! Los párrafos se separan con una línea en blanco para que el troceado en
//! frases los respete.

use std::io::{Cursor, Read};
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use calamine::Reader;

use crate::document_store::extension_of;

/// Lee el texto de un fichero según su extensión.
pub async fn extract_text(path: &Path) -> Result<String> {
    let extension = extension_of(&path.to_string_lossy()).unwrap_or_default();

    if extension == "pdf" {
        let path = path.to_path_buf();
        return tokio::task::spawn_blocking(move || pdf_extract::extract_text(&path))
            .await
            .map_err(|e| anyhow!("La extracción del PDF se interrumpió: {e}"))?
            .map_err(|e| anyhow!("No se pudo extraer texto del PDF: {e}"));
    }

    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Error leyendo {}", path.display()))?;

    match extension.as_str() {
        "docx" | "pptx" | "xlsx" | "xls" => {
            let format = extension.clone();
            tokio::task::spawn_blocking(move || match format.as_str() {
                "docx" => docx_text(&bytes),
                "pptx" => pptx_text(&bytes),
                _ => spreadsheet_text(bytes),
            })
            .await
            .map_err(|e| anyhow!("La extracción se interrumpió: {e}"))?
        }
        "html" | "htm" => Ok(html_text(&String::from_utf8_lossy(&bytes))),
        _ => String::from_utf8(bytes)
            .map_err(|_| anyhow!("El fichero no es texto UTF-8: {}", path.display())),
    }
}

fn docx_text(data: &[u8]) -> Result<String> {
    let doc = docx_rs::read_docx(data).map_err(|e| anyhow!("DOCX inválido: {e}"))?;

    let mut paragraphs = Vec::new();
    for child in doc.document.children {
        if let docx_rs::DocumentChild::Paragraph(p) = child {
            let mut text = String::new();
            for child in p.children {
                if let docx_rs::ParagraphChild::Run(run) = child {
                    for child in run.children {
                        if let docx_rs::RunChild::Text(t) = child {
                            text.push_str(&t.text);
                        }
                    }
                }
            }
            if !text.trim().is_empty() {
                paragraphs.push(text);
            }
        }
    }
    Ok(paragraphs.join("\n\n"))
}

fn pptx_text(data: &[u8]) -> Result<String> {
    let mut archive =
        zip::ZipArchive::new(Cursor::new(data)).map_err(|e| anyhow!("PPTX inválido: {e}"))?;

    // ppt/slides/slide1.xml, slide2.xml, ... en orden numérico
    let mut slides: Vec<(u32, String)> = archive
        .file_names()
        .filter(|name| name.starts_with("ppt/slides/slide") && name.ends_with(".xml"))
        .map(|name| {
            let number = name
                .trim_start_matches("ppt/slides/slide")
                .trim_end_matches(".xml")
                .parse::<u32>()
                .unwrap_or(0);
            (number, name.to_string())
        })
        .collect();
    slides.sort();

    let mut parts = Vec::new();
    for (_, name) in slides {
        let mut xml = String::new();
        archive
            .by_name(&name)
            .map_err(|e| anyhow!("No se pudo abrir {name}: {e}"))?
            .read_to_string(&mut xml)?;
        let text = slide_xml_text(&xml);
        if !text.is_empty() {
            parts.push(text);
        }
    }
    Ok(parts.join("\n\n"))
}

/// Texto de los elementos `<a:t>`; cada párrafo `<a:p>` queda en su propia línea.
fn slide_xml_text(xml: &str) -> String {
    use quick_xml::events::Event;

    let mut reader = quick_xml::Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut paragraphs = Vec::new();
    let mut current = String::new();
    let mut in_text = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::Text(e)) if in_text => {
                if let Ok(text) = e.unescape() {
                    if !current.is_empty() {
                        current.push(' ');
                    }
                    current.push_str(text.trim());
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" if !current.is_empty() => paragraphs.push(std::mem::take(&mut current)),
                _ => {}
            },
            Ok(Event::Eof) | Err(_) => break,
            _ => {}
        }
    }
    if !current.is_empty() {
        paragraphs.push(current);
    }
    paragraphs.join("\n\n")
}

fn spreadsheet_text(data: Vec<u8>) -> Result<String> {
    let mut workbook = calamine::open_workbook_auto_from_rs(Cursor::new(data))
        .map_err(|e| anyhow!("Hoja de cálculo inválida: {e}"))?;

    let mut blocks = Vec::new();
    for sheet in workbook.sheet_names().to_vec() {
        let Ok(range) = workbook.worksheet_range(&sheet) else {
            continue;
        };
        blocks.push(format!("Hoja: {sheet}"));
        for row in range.rows() {
            let cells: Vec<String> = row
                .iter()
                .map(|cell| match cell {
                    calamine::Data::Empty => String::new(),
                    calamine::Data::String(s) => s.clone(),
                    calamine::Data::Float(f) => f.to_string(),
                    calamine::Data::Int(i) => i.to_string(),
                    calamine::Data::Bool(b) => b.to_string(),
                    calamine::Data::DateTime(dt) => dt.to_string(),
                    calamine::Data::DateTimeIso(s) | calamine::Data::DurationIso(s) => s.clone(),
                    _ => String::new(),
                })
                .collect();
            if cells.iter().any(|c| !c.is_empty()) {
                blocks.push(cells.join(" | "));
            }
        }
    }
    Ok(blocks.join("\n\n"))
}

/// Texto visible del HTML: se descartan etiquetas, scripts y estilos.
fn html_text(html: &str) -> String {
    let document = scraper::Html::parse_document(html);

    let mut text = String::new();
    for node in document.root_element().descendants() {
        let scraper::Node::Text(fragment) = node.value() else {
            continue;
        };
        let hidden = node
            .parent()
            .and_then(|p| p.value().as_element())
            .map_or(false, |e| matches!(e.name(), "script" | "style" | "noscript"));
        let trimmed = fragment.trim();
        if hidden || trimmed.is_empty() {
            continue;
        }
        if !text.is_empty() {
            text.push(' ');
        }
        text.push_str(trimmed);
    }
    text
}
