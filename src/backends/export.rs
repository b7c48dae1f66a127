//! Human-readable export of the wiki pages.
//!
//! Complements the SQL dump: every non-draft page is written to a plain
//! Markdown or HTML file under `pages/<book>/<chapter>/`, so content stays
//! readable (and diffable in the snapshot history) without a database.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;

use derive_more::{Display, Error, From};
use regex::Regex;

use crate::backends::Backup;
use crate::bookstack::Bookstack;
use crate::util::retention::RetentionConfig;

const EXPORT_DEST: &str = "pages/";
const INDEX_FILE: &str = "_index.json";

// one JSON object per row keeps multi-line page content on a single
// output line of the batch-mode client
const PAGES_QUERY: &str = "SELECT JSON_OBJECT(\
    'id', p.id, 'name', p.name, 'slug', p.slug, \
    'book', b.name, 'chapter', c.name, \
    'markdown', p.markdown, 'html', p.html) \
    FROM pages p \
    LEFT JOIN chapters c ON p.chapter_id = c.id \
    LEFT JOIN books b ON COALESCE(c.book_id, p.book_id) = b.id \
    WHERE p.draft = 0 \
    ORDER BY b.name, c.name, p.name, p.id";

/// Database clients probed inside the container, in declaration order.
#[derive(Copy, Clone, Debug, Display)]
enum DbClient {
    #[display("mariadb")]
    MariaDb,
    #[display("mysql")]
    Mysql,
}

impl DbClient {
    fn binary(&self) -> &'static str {
        match self {
            DbClient::MariaDb => "mariadb",
            DbClient::Mysql => "mysql",
        }
    }
}

/// Errors on export of the wiki pages.
#[derive(Debug, Display, Error, From)]
pub enum PageExportError {
    /// Neither database client is installed in the database container.
    #[display("Neither the mariadb nor the mysql client is available in service '{_0}'")]
    NoClient(#[error(ignore)] String),

    /// The page query ran but exited unsuccessfully.
    #[display("Page query as '{user}' exited with {status}: {stderr}")]
    QueryFailed {
        user: String,
        status: ExitStatus,
        stderr: String,
    },

    #[from]
    Io(io::Error),
    #[from]
    Json(serde_json::Error),
}

/// Configuration of the [PageExport] backend.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct PageExportConfig {
    /// Export the wiki pages as part of the backup run.
    pub enabled: bool,

    /// Prefer the Markdown source over the rendered HTML when both exist.
    pub prefer_markdown: bool,
}

impl Default for PageExportConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            prefer_markdown: true,
        }
    }
}

/// One page row as returned by the JSON query.
#[derive(Debug, serde::Deserialize)]
struct PageRow {
    id: u64,
    name: Option<String>,
    slug: Option<String>,
    book: Option<String>,
    chapter: Option<String>,
    markdown: Option<String>,
    html: Option<String>,
}

/// Index entry written next to the exported files.
#[derive(Debug, serde::Serialize)]
struct IndexEntry {
    page_id: u64,
    book: Option<String>,
    chapter: Option<String>,
    name: Option<String>,
    slug: Option<String>,
    path: String,
    ext: &'static str,
}

fn parse_pages(stdout: &str) -> Result<Vec<PageRow>, serde_json::Error> {
    stdout
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(serde_json::from_str)
        .collect()
}

/// Filesystem-safe name, keeping readability.
fn safe_name(name: &str) -> String {
    let name = name.trim().replace('/', "-");
    let name = Regex::new(r"[^\w\-\s.]")
        .unwrap()
        .replace_all(&name, "")
        .into_owned();
    let name: String = Regex::new(r"\s+")
        .unwrap()
        .replace_all(name.trim(), "_")
        .chars()
        .take(120)
        .collect();

    if name.is_empty() {
        "untitled".to_string()
    } else {
        name
    }
}

/// Pick Markdown when available and preferred, the rendered HTML otherwise.
fn pick_content(row: &PageRow, prefer_markdown: bool) -> (&str, &'static str) {
    let markdown = row.markdown.as_deref().unwrap_or("").trim();
    if prefer_markdown && !markdown.is_empty() {
        return (markdown, "md");
    }

    (row.html.as_deref().unwrap_or("").trim(), "html")
}

/// The [PageExport] backend writes every non-draft wiki page to a file
/// under `pages/<book>/<chapter>/<id>_<name>.<md|html>` plus a JSON index.
pub struct PageExport {
    export_dest: PathBuf,
    config: PageExportConfig,
}

impl PageExport {
    pub fn with_config(backup_root: &Path, config: PageExportConfig) -> Self {
        let export_dest = backup_root.join(EXPORT_DEST);
        if export_dest.is_relative() {
            log::warn!(target: "backend::export", "export_dest is relative: {}", export_dest.display());
        }

        Self {
            export_dest,
            config,
        }
    }

    fn resolve_client(&self, bookstack: &Bookstack) -> Result<DbClient, PageExportError> {
        for client in [DbClient::MariaDb, DbClient::Mysql] {
            let probe = bookstack
                .compose()
                .exec(&[])
                .arg(client.binary())
                .arg("--version")
                .stdout(std::process::Stdio::null())
                .stderr(std::process::Stdio::null())
                .status();

            if probe.is_ok_and(|status| status.success()) {
                log::debug!(target: "backend::export", "Using database client: {client}");
                return Ok(client);
            }
        }

        Err(PageExportError::NoClient(
            bookstack.compose().service().to_string(),
        ))
    }

    fn query_pages(&self, bookstack: &Bookstack) -> Result<Vec<PageRow>, PageExportError> {
        let client = self.resolve_client(bookstack)?;
        let credentials = bookstack.credentials();

        let output = bookstack
            .compose()
            .exec(&[("MYSQL_PWD", &credentials.password)])
            .arg(client.binary())
            .arg("--batch")
            .arg("--raw")
            .arg("--skip-column-names")
            .arg(format!("--user={}", credentials.user))
            .arg("-e")
            .arg(PAGES_QUERY)
            .arg(&credentials.database)
            .output()?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            return Err(PageExportError::QueryFailed {
                user: credentials.user.clone(),
                status: output.status,
                stderr: stderr.trim().to_string(),
            });
        }
        if !stderr.trim().is_empty() {
            log::warn!(target: "backend::export", "{}", stderr.trim());
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(parse_pages(&stdout)?)
    }

    /// Write the page files and the index; returns the number of pages.
    ///
    /// Exports are deterministic per page, so a re-run replaces the
    /// previous files in place instead of accumulating timestamped copies.
    fn write_pages(&self, rows: &[PageRow], dry_run: bool) -> io::Result<usize> {
        let mut index = Vec::with_capacity(rows.len());

        for row in rows {
            let mut dir = self
                .export_dest
                .join(safe_name(row.book.as_deref().unwrap_or("No_Book")));
            if let Some(chapter) = row.chapter.as_deref().filter(|c| !c.trim().is_empty()) {
                dir = dir.join(safe_name(chapter));
            }

            let (content, ext) = pick_content(row, self.config.prefer_markdown);
            let file_name = format!(
                "{:06}_{}.{ext}",
                row.id,
                safe_name(row.name.as_deref().unwrap_or(""))
            );
            let path = dir.join(&file_name);

            if dry_run {
                log::trace!(target: "backend::export", "Would export: {}", path.display());
            } else {
                fs::create_dir_all(&dir)?;
                fs::write(&path, content)?;
            }

            index.push(IndexEntry {
                page_id: row.id,
                book: row.book.clone(),
                chapter: row.chapter.clone(),
                name: row.name.clone(),
                slug: row.slug.clone(),
                path: path.display().to_string(),
                ext,
            });
        }

        if !dry_run {
            let index_file = File::create(self.export_dest.join(INDEX_FILE))?;
            serde_json::to_writer_pretty(index_file, &index)?;
        }

        Ok(index.len())
    }
}

impl Backup for PageExport {
    type Error = PageExportError;

    fn backup(&self, bookstack: &Bookstack, dry_run: bool) -> Result<(), Self::Error> {
        log::info!(target: "backend::export", "Export the BookStack pages to readable files");

        let rows = self.query_pages(bookstack)?;

        if !dry_run {
            fs::create_dir_all(&self.export_dest)?;
        }
        let exported = self.write_pages(&rows, dry_run)?;
        log::info!(target: "backend::export", "Exported {exported} page(s)");

        Ok(())
    }

    /// Page exports replace the previous run's files in place;
    /// there is nothing to prune.
    fn retention(&self, _cfg: &RetentionConfig, _dry_run: bool) -> Result<(), Self::Error> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(
        id: u64,
        name: &str,
        book: Option<&str>,
        chapter: Option<&str>,
        markdown: &str,
        html: &str,
    ) -> PageRow {
        PageRow {
            id,
            name: Some(name.to_string()),
            slug: None,
            book: book.map(String::from),
            chapter: chapter.map(String::from),
            markdown: Some(markdown.to_string()),
            html: Some(html.to_string()),
        }
    }

    #[test]
    fn safe_name_strips_separators_and_punctuation() {
        assert_eq!(safe_name("Ops/Runbooks: Disk*?"), "Ops-Runbooks_Disk");
        assert_eq!(safe_name("   Hello  World  "), "Hello_World");
        assert_eq!(safe_name("??"), "untitled");
    }

    #[test]
    fn safe_name_caps_the_length() {
        let long = "x".repeat(300);

        assert_eq!(safe_name(&long).chars().count(), 120);
    }

    #[test]
    fn markdown_is_preferred_over_html() {
        let page = row(1, "p", None, None, "# md", "<h1>html</h1>");

        assert_eq!(pick_content(&page, true), ("# md", "md"));
        assert_eq!(pick_content(&page, false), ("<h1>html</h1>", "html"));
    }

    #[test]
    fn empty_markdown_falls_back_to_html() {
        let page = row(1, "p", None, None, "  ", "<h1>html</h1>");

        assert_eq!(pick_content(&page, true), ("<h1>html</h1>", "html"));
    }

    #[test]
    fn parses_one_json_row_per_line() {
        let stdout = concat!(
            r#"{"id": 7, "name": "Intro", "slug": "intro", "book": "Ops", "chapter": null, "markdown": "line one\nline two", "html": "<p>x</p>"}"#,
            "\n",
            r#"{"id": 8, "name": null, "slug": null, "book": null, "chapter": "Setup", "markdown": null, "html": null}"#,
            "\n",
        );

        let rows = parse_pages(stdout).unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].id, 7);
        assert_eq!(rows[0].markdown.as_deref(), Some("line one\nline two"));
        assert_eq!(rows[1].chapter.as_deref(), Some("Setup"));
        assert!(rows[1].name.is_none());
    }

    #[test]
    fn pages_land_under_book_and_chapter_directories() {
        let backups = tempfile::tempdir().unwrap();
        let backend = PageExport::with_config(backups.path(), PageExportConfig::default());

        let rows = [
            row(7, "Intro", Some("Ops"), None, "# Intro", ""),
            row(8, "Disks", Some("Ops"), Some("Hardware"), "", "<p>d</p>"),
            row(9, "Orphan", None, None, "# o", ""),
        ];
        let exported = backend.write_pages(&rows, false).unwrap();

        assert_eq!(exported, 3);
        let dest = backend.export_dest.as_path();
        assert!(dest.join("Ops/000007_Intro.md").is_file());
        assert!(dest.join("Ops/Hardware/000008_Disks.html").is_file());
        assert!(dest.join("No_Book/000009_Orphan.md").is_file());
        assert!(dest.join(INDEX_FILE).is_file());

        let index = fs::read_to_string(dest.join(INDEX_FILE)).unwrap();
        assert!(index.contains("000008_Disks.html"));
    }

    #[test]
    fn dry_run_writes_no_files() {
        let backups = tempfile::tempdir().unwrap();
        let backend = PageExport::with_config(backups.path(), PageExportConfig::default());

        let rows = [row(7, "Intro", Some("Ops"), None, "# Intro", "")];
        let exported = backend.write_pages(&rows, true).unwrap();

        assert_eq!(exported, 1);
        assert!(!backend.export_dest.exists());
    }
}
