//! Parser de contenido del libro (Markdown / MDX).
//!
//! Extrae el frontmatter `---`, resuelve título y módulo, y devuelve el cuerpo
//! limpio. Todo es función pura de la ruta y el contenido.

use std::collections::BTreeMap;
use std::path::{Component, Path};

use crate::models::{Document, DocumentMetadata};

const FRONTMATTER_DELIMITER: &str = "---";

/// Claves que ya tienen campo propio en los metadatos del documento o del chunk.
const RESERVED_KEYS: [&str; 5] = ["title", "filename", "filepath", "chunk_index", "total_chunks"];

/// Separa el bloque de frontmatter del cuerpo.
///
/// Devuelve `(metadatos, texto_sin_frontmatter)`. Si no hay bloque, el mapa
/// está vacío y el texto se devuelve tal cual.
pub fn parse_frontmatter(raw: &str) -> (BTreeMap<String, String>, &str) {
    let mut lines = raw.split_inclusive('\n');

    let Some(first) = lines.next() else {
        return (BTreeMap::new(), raw);
    };
    if !is_delimiter(first) {
        return (BTreeMap::new(), raw);
    }

    let mut offset = first.len();
    let block_start = offset;
    for line in lines {
        if is_delimiter(line) {
            let block = &raw[block_start..offset];
            let body = &raw[offset + line.len()..];
            return (parse_pairs(block), body);
        }
        offset += line.len();
    }

    // Bloque sin cierre: no es frontmatter.
    (BTreeMap::new(), raw)
}

fn is_delimiter(line: &str) -> bool {
    line.trim_end() == FRONTMATTER_DELIMITER
}

fn parse_pairs(block: &str) -> BTreeMap<String, String> {
    block
        .lines()
        .filter_map(|line| {
            let (key, value) = line.split_once(':')?;
            let key = key.trim();
            if key.is_empty() {
                return None;
            }
            let value = value.trim().trim_matches(|c| c == '"' || c == '\'');
            Some((key.to_string(), value.to_string()))
        })
        .collect()
}

/// Título: `title` del frontmatter, primer `# encabezado` del cuerpo o,
/// en último lugar, el nombre del fichero "humanizado".
pub fn resolve_title(frontmatter: &BTreeMap<String, String>, body: &str, file_stem: &str) -> String {
    if let Some(title) = frontmatter.get("title").filter(|t| !t.is_empty()) {
        return title.clone();
    }

    body.lines()
        .find_map(h1_text)
        .map(str::to_string)
        .unwrap_or_else(|| title_case(&file_stem.replace(['-', '_'], " ")))
}

fn h1_text(line: &str) -> Option<&str> {
    let rest = line.strip_prefix('#')?;
    if !rest.starts_with(char::is_whitespace) {
        return None;
    }
    let text = rest.trim();
    (!text.is_empty()).then_some(text)
}

/// Módulo del libro al que pertenece un fichero, a partir de su ruta relativa.
pub fn resolve_module(relative_path: &Path) -> String {
    let segments: Vec<String> = relative_path
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();

    if let Some(segment) = segments.iter().find(|s| s.starts_with("module")) {
        return title_case(&segment.replace('-', " "));
    }

    let joined = segments.join("/");
    if segments.iter().any(|s| s == "appendices") {
        "Appendices".to_string()
    } else if segments.iter().any(|s| s == "capstone") {
        "Capstone Project".to_string()
    } else if joined.contains("glossary") {
        "Glossary".to_string()
    } else if joined.contains("references") {
        "References".to_string()
    } else {
        "General".to_string()
    }
}

fn title_case(text: &str) -> String {
    text.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

/// Construye un `Document` a partir de su contenido bruto.
///
/// `title` y `module` del frontmatter tienen prioridad sobre los derivados;
/// `filename` y `filepath` salen siempre de la ruta. Las claves reservadas no
/// se conservan en `extra`.
pub fn parse_document(root: &Path, path: &Path, raw: &str) -> Document {
    let (mut frontmatter, body) = parse_frontmatter(raw);
    let relative = path.strip_prefix(root).unwrap_or(path);

    let filename = path
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let filepath = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");

    let title = resolve_title(&frontmatter, body, &stem);
    let module = frontmatter
        .remove("module")
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| resolve_module(relative));
    for key in RESERVED_KEYS {
        frontmatter.remove(key);
    }

    Document {
        path: path.to_path_buf(),
        text: body.to_string(),
        metadata: DocumentMetadata {
            filename,
            filepath,
            title,
            module,
            extra: frontmatter,
        },
    }
}
