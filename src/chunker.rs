//! División del texto en chunks solapados para embeddings y contexto.
//!
//! Estrategia recursiva: se intenta cortar por encabezados, luego párrafos,
//! líneas, palabras y, en último caso, por ventanas de caracteres. Los trozos
//! resultantes ("átomos") se empaquetan de izquierda a derecha en chunks de
//! como máximo `chunk_size` caracteres, repitiendo al inicio de cada chunk
//! los átomos finales del anterior hasta `overlap` caracteres.
//!
//! Cada chunk es un substring exacto del texto de entrada y conserva su rango
//! de bytes, de modo que el texto original se puede reconstruir.

use std::collections::VecDeque;
use std::ops::Range;

use crate::models::{Chunk, ChunkMetadata, Document};

/// Separadores en orden de preferencia. Tras ellos sólo queda el corte por caracteres.
const SEPARATORS: &[&str] = &["\n## ", "\n### ", "\n#### ", "\n\n", "\n", " "];

/// Trozo de texto con su posición (en bytes) dentro del texto original.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    pub text: String,
    pub range: Range<usize>,
}

#[derive(Debug, Clone, Copy)]
struct Atom {
    start: usize,
    end: usize,
    chars: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    chunk_size: usize,
    overlap: usize,
}

impl Chunker {
    /// `chunk_size` y `overlap` se miden en caracteres. Se espera `overlap < chunk_size`
    /// (lo valida la configuración); aquí sólo se acota por seguridad.
    pub fn new(chunk_size: usize, overlap: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            chunk_size,
            overlap: overlap.min(chunk_size - 1),
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// Divide `text` en chunks ordenados.
    pub fn split(&self, text: &str) -> Vec<TextChunk> {
        if text.is_empty() {
            return Vec::new();
        }

        let mut atoms = Vec::new();
        self.atomize(text, 0..text.len(), SEPARATORS, &mut atoms);

        self.merge(&atoms)
            .into_iter()
            .map(|range| TextChunk {
                text: text[range.clone()].to_string(),
                range,
            })
            .collect()
    }

    /// Chunks de un documento con `chunk_index` / `total_chunks` rellenos.
    pub fn chunk_document(&self, document: &Document) -> Vec<Chunk> {
        let pieces = self.split(&document.text);
        let total_chunks = pieces.len();

        pieces
            .into_iter()
            .enumerate()
            .map(|(chunk_index, piece)| Chunk {
                text: piece.text,
                metadata: ChunkMetadata {
                    document: document.metadata.clone(),
                    chunk_index,
                    total_chunks,
                },
            })
            .collect()
    }

    fn atomize(&self, text: &str, range: Range<usize>, separators: &[&str], out: &mut Vec<Atom>) {
        let chars = text[range.clone()].chars().count();
        if chars <= self.chunk_size {
            out.push(Atom {
                start: range.start,
                end: range.end,
                chars,
            });
            return;
        }

        let slice = &text[range.clone()];
        let Some(level) = separators
            .iter()
            .position(|sep| slice.match_indices(sep).any(|(pos, _)| pos > 0))
        else {
            self.split_by_chars(text, range, out);
            return;
        };

        // Cortamos justo antes de cada separador, que queda con el texto que introduce.
        let separator = separators[level];
        let mut cuts: Vec<usize> = slice
            .match_indices(separator)
            .map(|(pos, _)| range.start + pos)
            .filter(|&pos| pos > range.start)
            .collect();
        cuts.push(range.end);

        let mut start = range.start;
        for cut in cuts {
            self.atomize(text, start..cut, &separators[level + 1..], out);
            start = cut;
        }
    }

    fn split_by_chars(&self, text: &str, range: Range<usize>, out: &mut Vec<Atom>) {
        let mut start = range.start;
        let mut chars = 0;
        for (pos, _) in text[range.clone()].char_indices() {
            let pos = range.start + pos;
            if chars == self.chunk_size {
                out.push(Atom { start, end: pos, chars });
                start = pos;
                chars = 0;
            }
            chars += 1;
        }
        if start < range.end {
            out.push(Atom {
                start,
                end: range.end,
                chars,
            });
        }
    }

    fn merge(&self, atoms: &[Atom]) -> Vec<Range<usize>> {
        let mut chunks = Vec::new();
        let mut window: VecDeque<Atom> = VecDeque::new();
        let mut total = 0;

        for &atom in atoms {
            if total + atom.chars > self.chunk_size {
                if let (Some(first), Some(last)) = (window.front(), window.back()) {
                    chunks.push(first.start..last.end);
                }
                // Conservamos la cola del chunk emitido como solape.
                while total > self.overlap || (total > 0 && total + atom.chars > self.chunk_size) {
                    let Some(dropped) = window.pop_front() else { break };
                    total -= dropped.chars;
                }
            }
            window.push_back(atom);
            total += atom.chars;
        }

        if let (Some(first), Some(last)) = (window.front(), window.back()) {
            chunks.push(first.start..last.end);
        }
        chunks
    }
}
