//! TeX source analysis: delimited-environment extraction and asset
//! reference rewriting.

use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use regex::Regex;

/// One extractable category and the delimiter spellings that open and
/// close it. When `must_contain` is set, a matched span is kept only if
/// it contains that marker (e.g. minipages without `\includegraphics`
/// are not figures).
pub struct TexCategory {
    pub name: &'static str,
    pub must_contain: Option<&'static str>,
    pub delimiters: &'static [(&'static str, &'static str)],
}

/// Delimited environments recognized per category.
pub const TEX_CATEGORIES: &[TexCategory] = &[
    TexCategory {
        name: "equation",
        must_contain: None,
        delimiters: &[
            ("\\begin{equation}", "\\end{equation}"),
            ("\\begin{equation*}", "\\end{equation*}"),
            ("\\begin{align}", "\\end{align}"),
            ("\\begin{align*}", "\\end{align*}"),
            ("\\begin{multline}", "\\end{multline}"),
            ("\\begin{multline*}", "\\end{multline*}"),
            ("\\begin{gather}", "\\end{gather}"),
            ("\\begin{gather*}", "\\end{gather*}"),
            ("\\begin{flalign}", "\\end{flalign}"),
            ("\\begin{flalign*}", "\\end{flalign*}"),
            ("\\begin{alignat}", "\\end{alignat}"),
            ("\\begin{alignat*}", "\\end{alignat*}"),
            ("\\begin{aligneq}", "\\end{aligneq}"),
            ("\\begin{aligneq*}", "\\end{aligneq*}"),
            ("\\begin{subequations}", "\\end{subequations}"),
            ("\\begin{subequations*}", "\\end{subequations*}"),
            ("\\begin{subeqnarray}", "\\end{subeqnarray}"),
            ("\\begin{subeqnarray*}", "\\end{subeqnarray*}"),
            ("\\begin{math}", "\\end{math}"),
            ("\\begin{displaymath}", "\\end{displaymath}"),
        ],
    },
    TexCategory {
        name: "figure",
        must_contain: Some("\\includegraphics"),
        delimiters: &[
            ("\\begin{figure}", "\\end{figure}"),
            ("\\begin{figure*}", "\\end{figure*}"),
            ("\\begin{wrapfigure}", "\\end{wrapfigure}"),
            ("\\begin{wrapfigure*}", "\\end{wrapfigure*}"),
            ("\\begin{sidewaysfigure}", "\\end{sidewaysfigure}"),
            ("\\begin{sidewaysfigure*}", "\\end{sidewaysfigure*}"),
            ("\\begin{minipage}", "\\end{minipage}"),
            ("\\begin{minipage*}", "\\end{minipage*}"),
            ("\\begin{tabular}", "\\end{tabular}"),
            ("\\begin{tabular*}", "\\end{tabular*}"),
            ("\\begin{tabularx}", "\\end{tabularx}"),
        ],
    },
    TexCategory {
        name: "table",
        must_contain: None,
        delimiters: &[
            ("\\begin{table}", "\\end{table}"),
            ("\\begin{table*}", "\\end{table*}"),
            ("\\begin{tabbing}", "\\end{tabbing}"),
        ],
    },
    TexCategory {
        name: "algorithm",
        must_contain: None,
        delimiters: &[
            ("\\begin{algorithm}", "\\end{algorithm}"),
            ("\\begin{algorithmic}", "\\end{algorithmic}"),
            ("\\begin{algorithmic*}", "\\end{algorithmic*}"),
        ],
    },
    TexCategory {
        name: "plot",
        must_contain: None,
        delimiters: &[
            ("\\begin{tikzpicture}", "\\end{tikzpicture}"),
            ("\\begin{tikzcd}", "\\end{tikzcd}"),
            ("\\begin{tikzcd*}", "\\end{tikzcd*}"),
        ],
    },
];

/// Standalone document preamble wrapped around extracted spans.
pub const TEX_BEGIN: &str = r"
\documentclass{article}
\usepackage{amsmath,amssymb,amsfonts}
\usepackage{graphicx}
\usepackage{xcolor}
\usepackage{algorithm}
\usepackage{algpseudocode}
\usepackage{stfloats}
\usepackage{epstopdf}
\usepackage{pgfplots}
\begin{document}
";

pub const TEX_END: &str = r"\end{document}";

/// Look up a category by name.
pub fn category_by_name(name: &str) -> Option<&'static TexCategory> {
    TEX_CATEGORIES.iter().find(|c| c.name == name)
}

/// Extract the delimited spans of `category` from TeX source.
///
/// The matcher walks lines tracking one open/close pair at a time,
/// skipping `%`-commented lines; a span runs from the line containing
/// the opening delimiter through the line containing the closing one.
/// Spans failing the category's `must_contain` marker are dropped, and
/// textually identical spans are collapsed (first occurrence wins).
pub fn delimited_spans(source: &str, category: &TexCategory) -> Vec<String> {
    let mut spans: Vec<String> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();

    for (start, end) in category.delimiters {
        let mut in_span = false;
        let mut content = String::new();

        for line in source.lines() {
            let stripped = line.trim_start();
            if stripped.starts_with('%') {
                continue;
            }

            if !in_span {
                if stripped.contains(start) {
                    in_span = true;
                    content.push_str(line);
                    content.push('\n');
                }
                continue;
            }

            content.push_str(line);
            content.push('\n');

            if stripped.contains(end) {
                let keep = category
                    .must_contain
                    .map_or(true, |marker| content.contains(marker));
                if keep && seen.insert(content.clone()) {
                    spans.push(std::mem::take(&mut content));
                } else {
                    content.clear();
                }
                in_span = false;
            }
        }
    }

    spans
}

/// Names referenced by `\includegraphics` commands in the source.
pub fn asset_references(tex_code: &str) -> Vec<String> {
    let pattern = Regex::new(r"\\includegraphics(?:\[[^\]]*\])?\{([^}]+)\}")
        .expect("asset reference pattern is valid");
    pattern
        .captures_iter(tex_code)
        .map(|c| c[1].to_string())
        .collect()
}

/// Rewrites asset references to globally unique flattened names and
/// copies the referenced files into a shared working directory.
#[derive(Debug, Default)]
pub struct AssetRenamer {
    counter: AtomicUsize,
}

impl AssetRenamer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Infer the on-disk name for a reference without an extension by
    /// looking for a file starting with the referenced stem.
    fn with_extension(reference: &str, src_path: &Path) -> String {
        if reference.rsplit('/').next().is_some_and(|n| n.contains('.')) {
            return reference.to_string();
        }
        let (dir, stem) = match reference.rsplit_once('/') {
            Some((dir, stem)) => (src_path.join(dir), stem.to_string()),
            None => (src_path.to_path_buf(), reference.to_string()),
        };
        if let Ok(entries) = std::fs::read_dir(&dir) {
            for entry in entries.flatten() {
                let name = entry.file_name().to_string_lossy().into_owned();
                if name.starts_with(&stem) {
                    if let Some(ext) = Path::new(&name).extension() {
                        return format!("{reference}.{}", ext.to_string_lossy());
                    }
                }
            }
        }
        reference.to_string()
    }

    /// Rewrite every asset reference in `tex_code` to a unique flattened
    /// name and copy the corresponding file from `src_path` into
    /// `work_dir`. A missing asset on disk is tolerated: the reference
    /// is still rewritten but no file is copied.
    pub fn rename_and_copy(&self, tex_code: &str, src_path: &Path, work_dir: &Path) -> String {
        let mut rewritten = tex_code.to_string();

        for reference in asset_references(tex_code) {
            let on_disk = Self::with_extension(&reference, src_path);
            let number = self.counter.fetch_add(1, Ordering::SeqCst);
            let new_name = format!("{number}_{}", on_disk.replace('/', "_"));

            rewritten = rewritten.replace(&reference, &new_name);

            let from = src_path.join(&on_disk);
            let to = work_dir.join(&new_name);
            if std::fs::copy(&from, &to).is_err() {
                tracing::debug!(asset = %on_disk, "referenced asset not found, skipping copy");
            }
        }

        rewritten
    }
}
