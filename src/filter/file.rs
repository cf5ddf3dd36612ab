//! Structural/content-policy filter over downloaded repositories.

use std::path::Path;

use async_trait::async_trait;
use serde_json::json;

use crate::error::FilterError;
use crate::filter::{FileFilter, FilterInfo};
use crate::util::fs::{count_num_lines_in_files, filter_files_by_extension, list_files_in_dir};

/// Extensions counted as code content.
const CODE_EXTENSIONS: &[&str] = &["js", "html", "md", "py", "rb", "php", "java", "c", "cpp"];

/// Extensions counted as style content.
const STYLE_EXTENSIONS: &[&str] = &["css"];

/// Extensions counted as assets.
const ASSET_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "svg", "mp4", "webm", "mov", "avi", "flv", "wmv", "mkv",
];

/// Files excluded from the analysis entirely (exact, case-insensitive).
const EXCLUDE_SPECIAL_FILES: &[&str] = &[
    "license.md",
    "contributing.md",
    "gemfile",
    "gemfile.lock",
    "_config.yml",
];

/// Size and composition limits for an acceptable repository.
#[derive(Debug, Clone)]
pub struct RepoFilterConfig {
    /// Minimum lines of code across code files.
    pub min_num_lines: usize,
    /// Reject repositories whose only code file is a readme.
    pub has_more_than_readme: bool,
    /// Maximum number of code files.
    pub max_num_files_code: usize,
    /// Maximum number of asset files.
    pub max_num_assets: usize,
    /// Maximum lines of code.
    pub max_num_lines_code: usize,
    /// Maximum lines of style (css).
    pub max_num_lines_style: usize,
}

impl Default for RepoFilterConfig {
    fn default() -> Self {
        Self {
            min_num_lines: 10,
            has_more_than_readme: true,
            max_num_files_code: 5,
            max_num_assets: 5,
            max_num_lines_code: 1000,
            max_num_lines_style: 2000,
        }
    }
}

/// Analysis of one repository's file composition.
#[derive(Debug, Clone)]
pub struct RepoAnalysis {
    pub only_contains_readme: bool,
    pub num_files_total: usize,
    pub num_files_code: usize,
    pub num_files_style: usize,
    pub num_files_asset: usize,
    pub num_lines_code: usize,
    pub num_lines_style: usize,
}

impl RepoAnalysis {
    fn to_info(&self) -> FilterInfo {
        let value = json!({
            "only_contains_readme": self.only_contains_readme,
            "num_files": {
                "total": self.num_files_total,
                "code": self.num_files_code,
                "style": self.num_files_style,
                "asset": self.num_files_asset,
            },
            "num_lines": {
                "code": self.num_lines_code,
                "style": self.num_lines_style,
            },
        });
        match value {
            serde_json::Value::Object(map) => map,
            _ => FilterInfo::new(),
        }
    }
}

/// Filters repositories on file counts and line counts per content
/// bucket, plus the only-a-readme special case.
pub struct RepoFilter {
    config: RepoFilterConfig,
}

impl RepoFilter {
    pub fn new(config: RepoFilterConfig) -> Self {
        Self { config }
    }

    /// Classify and count the repository's files.
    pub fn analyze(&self, repo_path: &Path) -> RepoAnalysis {
        let files: Vec<String> = list_files_in_dir(repo_path)
            .into_iter()
            .filter(|f| !EXCLUDE_SPECIAL_FILES.contains(&f.to_lowercase().as_str()))
            .filter(|f| !f.starts_with('.'))
            .collect();

        let all_extensions: Vec<&str> = CODE_EXTENSIONS
            .iter()
            .chain(STYLE_EXTENSIONS)
            .chain(ASSET_EXTENSIONS)
            .copied()
            .collect();
        let buckets = filter_files_by_extension(&files, &all_extensions);

        let code_files: Vec<&str> = CODE_EXTENSIONS
            .iter()
            .flat_map(|ext| buckets[*ext].iter().copied())
            .collect();
        let style_files: Vec<&str> = STYLE_EXTENSIONS
            .iter()
            .flat_map(|ext| buckets[*ext].iter().copied())
            .collect();
        let asset_count: usize = ASSET_EXTENSIONS.iter().map(|ext| buckets[*ext].len()).sum();

        let only_contains_readme =
            code_files.len() == 1 && code_files[0].to_lowercase() == "readme.md";

        RepoAnalysis {
            only_contains_readme,
            num_files_total: files.len(),
            num_files_code: code_files.len(),
            num_files_style: style_files.len(),
            num_files_asset: asset_count,
            num_lines_code: count_num_lines_in_files(repo_path, &code_files),
            num_lines_style: count_num_lines_in_files(repo_path, &style_files),
        }
    }
}

#[async_trait]
impl FileFilter for RepoFilter {
    fn name(&self) -> &'static str {
        "RepoFilter"
    }

    async fn filter(&self, path: &Path) -> Result<(bool, FilterInfo), FilterError> {
        let analysis = self.analyze(path);

        let accepted = analysis.num_lines_code >= self.config.min_num_lines
            && (!analysis.only_contains_readme || !self.config.has_more_than_readme)
            && analysis.num_files_code <= self.config.max_num_files_code
            && analysis.num_files_asset <= self.config.max_num_assets
            && analysis.num_lines_code <= self.config.max_num_lines_code
            && analysis.num_lines_style <= self.config.max_num_lines_style;

        Ok((accepted, analysis.to_info()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, content).unwrap();
    }

    fn filter() -> RepoFilter {
        RepoFilter::new(RepoFilterConfig::default())
    }

    #[tokio::test]
    async fn accepts_small_site() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "index.html", &"<p>line</p>\n".repeat(20));
        write(dir.path(), "style.css", "body { color: red; }\n");

        let (accepted, info) = filter().filter(dir.path()).await.unwrap();
        assert!(accepted);
        assert_eq!(info["num_files"]["code"], 1);
        assert_eq!(info["num_lines"]["code"], 20);
    }

    #[tokio::test]
    async fn rejects_readme_only_repository() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "README.md", &"text\n".repeat(50));

        let (accepted, info) = filter().filter(dir.path()).await.unwrap();
        assert!(!accepted);
        assert_eq!(info["only_contains_readme"], true);
    }

    #[tokio::test]
    async fn rejects_too_few_lines() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "index.html", "<p>one</p>\n");

        let (accepted, _) = filter().filter(dir.path()).await.unwrap();
        assert!(!accepted);
    }

    #[tokio::test]
    async fn rejects_too_many_code_files() {
        let dir = TempDir::new().unwrap();
        for i in 0..7 {
            write(dir.path(), &format!("page{i}.html"), &"<p>x</p>\n".repeat(5));
        }

        let (accepted, info) = filter().filter(dir.path()).await.unwrap();
        assert!(!accepted);
        assert_eq!(info["num_files"]["code"], 7);
    }

    #[test]
    fn special_files_and_hidden_files_are_excluded() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "Gemfile", "source 'https://rubygems.org'\n");
        write(dir.path(), "_config.yml", "title: site\n");
        write(dir.path(), ".gitignore", "_site\n");
        write(dir.path(), "index.html", &"<p>x</p>\n".repeat(10));

        let analysis = filter().analyze(dir.path());
        assert_eq!(analysis.num_files_total, 1);
        assert_eq!(analysis.num_files_code, 1);
    }
}
