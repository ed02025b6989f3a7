//! Output file generation
//!
//! Stage outputs land as markdown with a small YAML-style header under
//! `<output>/transcripts/`, plus a rich-document variant under
//! `<output>/docs/[<subdir>/]` rendered by pandoc when it is on PATH and by
//! an in-process markdown-to-HTML fallback otherwise. Rich-document
//! failure is logged and never fails the stage; the text artifact alone
//! suffices.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tokio::process::Command;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

static UNSAFE_CHARS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\w\s-]").unwrap());
static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
static TIMESTAMP_PREFIX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{8}_\d{6}[_-]?|\d{4}-\d{2}-\d{2}-\d{2}-\d{2}-\d{2}[_-]?)").unwrap());

/// One file written for a job.
#[derive(Debug, Clone, Serialize)]
pub struct OutputFile {
    pub path: PathBuf,
    /// "markdown", "docx", or "html".
    pub kind: String,
    pub stage: String,
}

/// Header metadata written atop every artifact.
#[derive(Debug, Clone, Default)]
pub struct OutputMetadata {
    pub duration_secs: f64,
    pub profile: Option<String>,
}

/// Writes final artifacts and routes them to destination directories.
pub struct OutputWriter {
    transcripts_dir: PathBuf,
    docs_dir: PathBuf,
    pandoc: OnceCell<bool>,
}

impl OutputWriter {
    /// Create the writer and its output directories.
    ///
    /// # Errors
    ///
    /// Returns the underlying error if a directory cannot be created.
    pub fn new(output_dir: &Path) -> std::io::Result<Self> {
        let transcripts_dir = output_dir.join("transcripts");
        let docs_dir = output_dir.join("docs");
        std::fs::create_dir_all(&transcripts_dir)?;
        std::fs::create_dir_all(&docs_dir)?;
        Ok(Self {
            transcripts_dir,
            docs_dir,
            pandoc: OnceCell::new(),
        })
    }

    /// Destination for rich documents, optionally a per-profile subfolder.
    #[must_use]
    pub fn docs_dir_for(&self, subdir: Option<&str>) -> PathBuf {
        match subdir.filter(|s| !s.is_empty()) {
            Some(sub) => self.docs_dir.join(sub),
            None => self.docs_dir.clone(),
        }
    }

    /// Write one stage's markdown artifact and its rich-document variant.
    ///
    /// # Errors
    ///
    /// Returns the I/O error of the markdown write; rich-document failures
    /// only log.
    pub async fn write_stage_output(
        &self,
        content: &str,
        filename_base: &str,
        suffix: &str,
        stage_name: &str,
        metadata: &OutputMetadata,
        docs_dir: &Path,
    ) -> std::io::Result<Vec<OutputFile>> {
        let mut outputs = Vec::new();

        let md_name = derive_filename(filename_base, suffix, ".md");
        let md_path = self.transcripts_dir.join(&md_name);
        let body = stage_markdown(content, stage_name, metadata);
        std::fs::write(&md_path, body)?;
        debug!(path = %md_path.display(), stage = stage_name, "wrote stage markdown");
        outputs.push(OutputFile {
            path: md_path.clone(),
            kind: "markdown".into(),
            stage: stage_name.to_string(),
        });

        if let Some(rich) = self
            .render_rich_document(&md_path, docs_dir, filename_base, suffix, stage_name)
            .await
        {
            outputs.push(rich);
        }
        Ok(outputs)
    }

    /// Write the single formatted document of a default-pipeline job.
    ///
    /// # Errors
    ///
    /// Returns the I/O error of the markdown write.
    pub async fn write_note_output(
        &self,
        content: &str,
        note_type: &str,
        filename_base: &str,
        metadata: &OutputMetadata,
    ) -> std::io::Result<Vec<OutputFile>> {
        let title = derive_title(filename_base, note_type);
        let mut outputs = Vec::new();

        let md_name = derive_filename(&title, "", ".md");
        let md_path = self.transcripts_dir.join(&md_name);
        std::fs::write(&md_path, note_markdown(content, &title, metadata))?;
        outputs.push(OutputFile {
            path: md_path.clone(),
            kind: "markdown".into(),
            stage: "formatting".into(),
        });

        if let Some(rich) = self
            .render_rich_document(&md_path, &self.docs_dir, &title, "", "formatting")
            .await
        {
            outputs.push(rich);
        }
        Ok(outputs)
    }

    async fn render_rich_document(
        &self,
        md_path: &Path,
        docs_dir: &Path,
        filename_base: &str,
        suffix: &str,
        stage_name: &str,
    ) -> Option<OutputFile> {
        if let Err(e) = std::fs::create_dir_all(docs_dir) {
            warn!(dir = %docs_dir.display(), error = %e, "failed to create docs directory");
            return None;
        }

        if self.pandoc_available().await {
            let docx_path = docs_dir.join(derive_filename(filename_base, suffix, ".docx"));
            match convert_with_pandoc(md_path, &docx_path).await {
                Ok(()) => {
                    return Some(OutputFile {
                        path: docx_path,
                        kind: "docx".into(),
                        stage: stage_name.to_string(),
                    });
                }
                Err(e) => {
                    warn!(error = %e, "pandoc conversion failed, falling back to HTML");
                }
            }
        }

        // In-process fallback: markdown rendered to a standalone HTML file.
        let html_path = docs_dir.join(derive_filename(filename_base, suffix, ".html"));
        match std::fs::read_to_string(md_path).map(|md| render_html(&md)) {
            Ok(html) => match std::fs::write(&html_path, html) {
                Ok(()) => Some(OutputFile {
                    path: html_path,
                    kind: "html".into(),
                    stage: stage_name.to_string(),
                }),
                Err(e) => {
                    warn!(path = %html_path.display(), error = %e, "failed to write HTML document");
                    None
                }
            },
            Err(e) => {
                warn!(error = %e, "failed to read markdown for HTML rendering");
                None
            }
        }
    }

    async fn pandoc_available(&self) -> bool {
        *self
            .pandoc
            .get_or_init(|| async {
                let found = Command::new("pandoc")
                    .arg("--version")
                    .stdout(Stdio::null())
                    .stderr(Stdio::null())
                    .status()
                    .await
                    .map(|status| status.success())
                    .unwrap_or(false);
                if !found {
                    debug!("pandoc not found, rich documents render as HTML");
                }
                found
            })
            .await
    }
}

async fn convert_with_pandoc(md_path: &Path, docx_path: &Path) -> Result<(), String> {
    let output = Command::new("pandoc")
        .arg(md_path)
        .arg("-o")
        .arg(docx_path)
        .args(["-f", "markdown", "-t", "docx"])
        .output()
        .await
        .map_err(|e| format!("failed to spawn pandoc: {e}"))?;
    if output.status.success() {
        Ok(())
    } else {
        Err(String::from_utf8_lossy(&output.stderr).trim().to_string())
    }
}

fn render_html(markdown: &str) -> String {
    let parser = pulldown_cmark::Parser::new(markdown);
    let mut body = String::new();
    pulldown_cmark::html::push_html(&mut body, parser);
    format!(
        "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"></head><body>\n{body}</body></html>\n"
    )
}

/// Derive a filesystem-safe filename: special characters stripped,
/// whitespace collapsed to underscores, the suffix tagged on.
#[must_use]
pub(crate) fn derive_filename(base: &str, suffix: &str, extension: &str) -> String {
    let cleaned = UNSAFE_CHARS_RE.replace_all(base, "");
    let safe = WHITESPACE_RE.replace_all(cleaned.trim(), "_");
    let suffix = suffix.trim_start_matches('_');
    if suffix.is_empty() {
        format!("{safe}{extension}")
    } else {
        format!("{safe}_{suffix}{extension}")
    }
}

/// Derive a display title from a filename: timestamp prefixes stripped,
/// separators spaced, words capitalized, note type prefixed when absent.
pub(crate) fn derive_title(filename_base: &str, note_type: &str) -> String {
    let name = TIMESTAMP_PREFIX_RE.replace(filename_base, "");
    let name = name.replace(['_', '-'], " ");
    let name = WHITESPACE_RE.replace_all(name.trim(), " ");

    let title: String = name
        .split(' ')
        .filter(|w| !w.is_empty())
        .map(capitalize)
        .collect::<Vec<_>>()
        .join(" ");

    let type_cap = capitalize(note_type);
    if title.to_lowercase().contains(&note_type.to_lowercase()) {
        title
    } else {
        format!("{type_cap}: {title}")
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

fn stage_markdown(content: &str, stage_name: &str, metadata: &OutputMetadata) -> String {
    let now = Utc::now();
    let mut lines = vec![
        "---".to_string(),
        format!("stage: {stage_name}"),
        format!("date: {}", now.format("%Y-%m-%d")),
        format!("processed_at: {}", now.to_rfc3339()),
    ];
    if let Some(profile) = &metadata.profile {
        lines.push(format!("profile: {profile}"));
    }
    lines.push(format!("audio_duration: {}", metadata.duration_secs));
    lines.push("---".to_string());
    lines.push(String::new());
    lines.push(content.to_string());
    lines.join("\n")
}

fn note_markdown(content: &str, title: &str, metadata: &OutputMetadata) -> String {
    let now = Utc::now();
    let mut lines = vec![
        "---".to_string(),
        format!("title: \"{}\"", title.replace('"', "\\\"")),
        format!("date: {}", now.format("%Y-%m-%d")),
        format!("processed_at: {}", now.to_rfc3339()),
        format!("audio_duration: {}", metadata.duration_secs),
    ];
    lines.push("---".to_string());
    lines.push(String::new());
    lines.push(content.to_string());
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filenames_are_safe_and_suffixed() {
        assert_eq!(derive_filename("Team Sync!", "clean", ".md"), "Team_Sync_clean.md");
        assert_eq!(derive_filename("a  b\tc", "", ".md"), "a_b_c.md");
        // A leading underscore on the suffix is not doubled.
        assert_eq!(derive_filename("base", "_analysis", ".docx"), "base_analysis.docx");
    }

    #[test]
    fn titles_strip_timestamps_and_prefix_the_type() {
        assert_eq!(
            derive_title("2024-01-15-14-30-22_team_sync", "meeting"),
            "Meeting: Team Sync"
        );
        assert_eq!(
            derive_title("20240115_143022_weekly-standup", "meeting"),
            "Meeting: Weekly Standup"
        );
        // No duplicate prefix when the type already appears.
        assert_eq!(derive_title("meeting_notes", "meeting"), "Meeting Notes");
    }

    #[test]
    fn stage_markdown_has_header_block() {
        let md = stage_markdown(
            "the body",
            "clean",
            &OutputMetadata {
                duration_secs: 63.5,
                profile: Some("business_lecture".into()),
            },
        );
        assert!(md.starts_with("---\nstage: clean\n"));
        assert!(md.contains("profile: business_lecture"));
        assert!(md.contains("audio_duration: 63.5"));
        assert!(md.ends_with("the body"));
    }

    #[test]
    fn html_fallback_renders_markdown() {
        let html = render_html("# Title\n\n**bold** text");
        assert!(html.contains("<h1>Title</h1>"));
        assert!(html.contains("<strong>bold</strong>"));
    }

    #[tokio::test]
    async fn stage_output_writes_markdown_and_a_rich_variant() {
        let dir = tempfile::tempdir().unwrap();
        let writer = OutputWriter::new(dir.path()).unwrap();
        let docs = writer.docs_dir_for(Some("keira"));

        let outputs = writer
            .write_stage_output(
                "cleaned text",
                "lecture one",
                "clean",
                "clean",
                &OutputMetadata::default(),
                &docs,
            )
            .await
            .unwrap();

        assert!(!outputs.is_empty());
        let md = &outputs[0];
        assert_eq!(md.kind, "markdown");
        assert!(md.path.exists());
        assert!(md.path.ends_with("transcripts/lecture_one_clean.md"));

        // The rich variant (docx with pandoc, html otherwise) lands in the
        // per-user docs dir when one was produced.
        if let Some(rich) = outputs.get(1) {
            assert!(rich.path.exists());
            assert!(rich.path.starts_with(dir.path().join("docs/keira")));
        }
    }

    #[tokio::test]
    async fn note_output_uses_derived_title() {
        let dir = tempfile::tempdir().unwrap();
        let writer = OutputWriter::new(dir.path()).unwrap();

        let outputs = writer
            .write_note_output(
                "formatted notes",
                "meeting",
                "2024-01-15-14-30-22_team_sync",
                &OutputMetadata::default(),
            )
            .await
            .unwrap();

        let md = &outputs[0];
        assert!(md.path.ends_with("transcripts/Meeting_Team_Sync.md"));
        let content = std::fs::read_to_string(&md.path).unwrap();
        assert!(content.contains("title: \"Meeting: Team Sync\""));
    }
}
