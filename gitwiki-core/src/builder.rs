//! Static build: render every tracked document into a staging directory and
//! promote it over the published output in one rename.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};
use walkdir::WalkDir;

use crate::directory::build_directory;
use crate::documents::{DocumentStore, Page, StoreError};
use crate::layout::{LayoutCache, LayoutOptions, LayoutSnapshot};
use crate::page::{PageTemplates, SiteContext, TemplateError};
use crate::paths::{
    is_ignorable, is_layout_fragment, is_markdown, ASSETS_DIR, DIRECTORY_OUTPUT,
    FORBIDDEN_OUTPUT, NOT_FOUND_OUTPUT, SEARCH_INDEX_OUTPUT,
};
use crate::search::{build_search_index, SearchCatalog, SearchError};
use crate::vcs::CallContext;

const STAGING_PREFIX: &str = ".__build-";
const HOME_ALIAS: &str = "index.html";

#[derive(Error, Debug)]
pub enum BuildError {
    #[error("repository has no tracked files")]
    EmptyRepository,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error(transparent)]
    Search(#[from] SearchError),

    #[error("build task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
}

trait IoContext<T> {
    fn context(self, context: impl FnOnce() -> String) -> Result<T, BuildError>;
}

impl<T> IoContext<T> for io::Result<T> {
    fn context(self, context: impl FnOnce() -> String) -> Result<T, BuildError> {
        self.map_err(|source| BuildError::Io {
            context: context(),
            source,
        })
    }
}

/// Everything the build needs; shared with the live-rendering paths.
pub struct StaticBuilder {
    documents: Arc<DocumentStore>,
    layout: Arc<LayoutCache>,
    layout_options: LayoutOptions,
    search: Arc<SearchCatalog>,
    templates: Arc<dyn PageTemplates>,
    site: SiteContext,
    output_dir: PathBuf,
    theme_dir: Option<PathBuf>,
    build_lock: Mutex<()>,
}

impl StaticBuilder {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        documents: Arc<DocumentStore>,
        layout: Arc<LayoutCache>,
        layout_options: LayoutOptions,
        search: Arc<SearchCatalog>,
        templates: Arc<dyn PageTemplates>,
        site: SiteContext,
        output_dir: PathBuf,
        theme_dir: Option<PathBuf>,
    ) -> Self {
        Self {
            documents,
            layout,
            layout_options,
            search,
            templates,
            site,
            output_dir,
            theme_dir,
            build_lock: Mutex::new(()),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn site(&self) -> &SiteContext {
        &self.site
    }

    pub fn layout_snapshot(&self) -> Arc<LayoutSnapshot> {
        self.layout.snapshot()
    }

    pub async fn refresh_layout(&self) -> Result<(), StoreError> {
        self.layout
            .refresh(&self.documents, &self.layout_options)
            .await
    }

    /// Render every publishable Markdown document, ordered by route.
    pub async fn render_documents(
        &self,
        ctx: &CallContext,
        files: &[String],
    ) -> Result<Vec<Page>, StoreError> {
        let mut pages = Vec::new();
        for file in files {
            if !is_markdown(file) || is_layout_fragment(file) {
                continue;
            }
            pages.push(self.documents.render_document(ctx, file).await?);
        }
        pages.sort_by(|a, b| a.route.cmp(&b.route));
        Ok(pages)
    }

    /// Rebuild the published site. Either the whole new snapshot replaces
    /// the output directory or the previous snapshot stays in place.
    #[instrument(skip_all, fields(output = %self.output_dir.display()))]
    pub async fn build(&self, ctx: &CallContext) -> Result<(), BuildError> {
        let _guard = self.build_lock.lock().await;
        let started = std::time::Instant::now();

        self.refresh_layout().await?;

        let files = self.documents.list_tracked(ctx).await?;
        if files.is_empty() {
            return Err(BuildError::EmptyRepository);
        }
        let pages = self.render_documents(ctx, &files).await?;
        let (page_count, file_count) = (pages.len(), files.len());

        let writer = SnapshotWriter {
            templates: self.templates.clone(),
            site: self.site.clone(),
            layout: self.layout.snapshot(),
            repo_dir: self.documents.repo_dir(),
            output_dir: self.output_dir.clone(),
            theme_dir: self.theme_dir.clone(),
            home_doc: self.documents.home_doc().to_string(),
        };
        let index = tokio::task::spawn_blocking(move || writer.publish(&files, &pages)).await??;
        self.search.update(&index);

        info!(
            pages = page_count,
            files = file_count,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "static build complete"
        );
        Ok(())
    }
}

/// Filesystem half of a build, run on the blocking pool: stage every output
/// file next to the output directory, then promote the stage.
struct SnapshotWriter {
    templates: Arc<dyn PageTemplates>,
    site: SiteContext,
    layout: Arc<LayoutSnapshot>,
    repo_dir: PathBuf,
    output_dir: PathBuf,
    theme_dir: Option<PathBuf>,
    home_doc: String,
}

impl SnapshotWriter {
    /// Returns the search index payload that was published.
    fn publish(&self, files: &[String], pages: &[Page]) -> Result<String, BuildError> {
        let parent = match self.output_dir.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent).context(|| format!("create {}", parent.display()))?;
        let staging = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempdir_in(&parent)
            .context(|| "create staging directory".to_string())?;
        let stage = staging.path();

        self.copy_repository_assets(files, stage)?;
        self.write_pages(pages, stage)?;
        self.write_special_pages(pages, stage)?;

        let index = build_search_index(pages)?;
        fs::write(stage.join(SEARCH_INDEX_OUTPUT), &index)
            .context(|| "write search index".to_string())?;

        self.write_theme_assets(&stage.join(ASSETS_DIR))?;
        self.write_home_alias(pages, stage)?;

        promote(stage, &self.output_dir).context(|| {
            format!("activate new output {}", self.output_dir.display())
        })?;
        Ok(index)
    }

    fn copy_repository_assets(&self, files: &[String], stage: &Path) -> Result<(), BuildError> {
        for file in files {
            if is_markdown(file) || is_ignorable(file) || is_layout_fragment(file) {
                continue;
            }
            let src = join_rel(&self.repo_dir, file);
            let dst = join_rel(stage, file);
            copy_file(&src, &dst).context(|| format!("copy asset {}", file))?;
        }
        Ok(())
    }

    fn write_pages(&self, pages: &[Page], stage: &Path) -> Result<(), BuildError> {
        for page in pages {
            let data = self.site.document_page(page, &self.layout);
            let html = self.templates.render_page(&data)?;
            let target = join_rel(stage, &page.output_path);
            write_file(&target, html.as_bytes())
                .context(|| format!("write page {}", page.route))?;
            if let Some(modified) = page.last_modified {
                set_modified(&target, modified.into())
                    .context(|| format!("set mod time {}", page.route))?;
            }
            debug!(route = %page.route, "page written");
        }
        Ok(())
    }

    fn write_special_pages(&self, pages: &[Page], stage: &Path) -> Result<(), BuildError> {
        let layout = &self.layout;

        let entries = build_directory(pages, &self.site.base_url);
        let directory = self.templates.render_page(&self.site.directory_page(entries, layout))?;
        write_file(&stage.join(DIRECTORY_OUTPUT), directory.as_bytes())
            .context(|| "write directory page".to_string())?;

        let not_found = self.templates.render_page(&self.site.not_found_page("", layout))?;
        write_file(&stage.join(NOT_FOUND_OUTPUT), not_found.as_bytes())
            .context(|| "write 404 page".to_string())?;

        let forbidden = self.templates.render_page(&self.site.forbidden_page("", layout))?;
        write_file(&stage.join(FORBIDDEN_OUTPUT), forbidden.as_bytes())
            .context(|| "write 403 page".to_string())?;
        Ok(())
    }

    fn write_theme_assets(&self, dest: &Path) -> Result<(), BuildError> {
        match &self.theme_dir {
            Some(theme) if theme.is_dir() => {
                debug!(theme = %theme.display(), "copying theme override");
                copy_tree(theme, dest).context(|| format!("copy theme {}", theme.display()))
            }
            Some(theme) => {
                warn!(theme = %theme.display(), "theme directory missing, using embedded theme");
                Ok(self.templates.write_assets(dest)?)
            }
            None => Ok(self.templates.write_assets(dest)?),
        }
    }

    /// Expose the home document at the output root when it renders elsewhere.
    fn write_home_alias(&self, pages: &[Page], stage: &Path) -> Result<(), BuildError> {
        let Some(page) = pages
            .iter()
            .find(|p| p.source.eq_ignore_ascii_case(&self.home_doc))
        else {
            return Ok(());
        };
        if page.output_path == HOME_ALIAS {
            return Ok(());
        }
        let alias = stage.join(HOME_ALIAS);
        copy_file(&join_rel(stage, &page.output_path), &alias)
            .context(|| "create home alias".to_string())?;
        if let Some(modified) = page.last_modified {
            set_modified(&alias, modified.into()).context(|| "alias mod time".to_string())?;
        }
        Ok(())
    }
}

fn join_rel(base: &Path, rel: &str) -> PathBuf {
    let mut path = base.to_path_buf();
    path.extend(rel.split('/').filter(|s| !s.is_empty()));
    path
}

fn write_file(target: &Path, contents: &[u8]) -> io::Result<()> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(target, contents)
}

pub fn copy_file(src: &Path, dst: &Path) -> io::Result<()> {
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::copy(src, dst)?;
    Ok(())
}

/// Copy every file below `src` into `dst`, preserving structure.
pub fn copy_tree(src: &Path, dst: &Path) -> io::Result<()> {
    for entry in WalkDir::new(src) {
        let entry = entry.map_err(io::Error::other)?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry.path().strip_prefix(src).unwrap_or(entry.path());
        copy_file(entry.path(), &dst.join(relative))?;
    }
    Ok(())
}

fn set_modified(target: &Path, time: SystemTime) -> io::Result<()> {
    fs::File::options()
        .write(true)
        .open(target)?
        .set_modified(time)
}

/// Swap `staged` into place at `output`, keeping the previous tree as
/// `<output>.old` until the swap succeeds.
pub fn promote(staged: &Path, output: &Path) -> io::Result<()> {
    let mut backup_name = output
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    backup_name.push(".old");
    let backup = output.with_file_name(backup_name);

    match fs::remove_dir_all(&backup) {
        Err(err) if err.kind() != io::ErrorKind::NotFound => return Err(err),
        _ => {}
    }
    match fs::rename(output, &backup) {
        Err(err) if err.kind() != io::ErrorKind::NotFound => return Err(err),
        _ => {}
    }
    if let Err(err) = fs::rename(staged, output) {
        let _ = fs::rename(&backup, output);
        return Err(err);
    }
    if let Err(err) = fs::remove_dir_all(&backup) {
        if err.kind() != io::ErrorKind::NotFound {
            warn!(backup = %backup.display(), error = %err, "failed to remove previous output");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_promote_replaces_output() {
        let root = tempfile::tempdir().unwrap();
        let output = root.path().join("dist");
        fs::create_dir_all(&output).unwrap();
        fs::write(output.join("old.html"), "old").unwrap();

        let staged = root.path().join(".__build-1");
        fs::create_dir_all(&staged).unwrap();
        fs::write(staged.join("new.html"), "new").unwrap();

        promote(&staged, &output).unwrap();

        assert!(output.join("new.html").exists());
        assert!(!output.join("old.html").exists());
        assert!(!staged.exists());
        assert!(!root.path().join("dist.old").exists());
    }

    #[test]
    fn test_promote_without_previous_output() {
        let root = tempfile::tempdir().unwrap();
        let output = root.path().join("site");
        let staged = root.path().join(".__build-2");
        fs::create_dir_all(&staged).unwrap();
        fs::write(staged.join("index.html"), "hi").unwrap();

        promote(&staged, &output).unwrap();
        assert_eq!(fs::read_to_string(output.join("index.html")).unwrap(), "hi");
    }

    #[test]
    fn test_promote_failure_restores_previous_output() {
        let root = tempfile::tempdir().unwrap();
        let output = root.path().join("dist");
        fs::create_dir_all(&output).unwrap();
        fs::write(output.join("keep.html"), "keep").unwrap();

        let missing = root.path().join(".__build-missing");
        assert!(promote(&missing, &output).is_err());
        assert_eq!(fs::read_to_string(output.join("keep.html")).unwrap(), "keep");
    }

    #[test]
    fn test_copy_tree_preserves_layout() {
        let root = tempfile::tempdir().unwrap();
        let src = root.path().join("theme");
        fs::create_dir_all(src.join("css")).unwrap();
        fs::write(src.join("css/site.css"), "body{}").unwrap();
        fs::write(src.join("app.js"), "").unwrap();

        let dst = root.path().join("out/assets");
        copy_tree(&src, &dst).unwrap();
        assert!(dst.join("css/site.css").exists());
        assert!(dst.join("app.js").exists());
    }

    #[test]
    fn test_set_modified() {
        let root = tempfile::tempdir().unwrap();
        let file = root.path().join("page.html");
        fs::write(&file, "x").unwrap();
        let stamp = SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(1_600_000_000);
        set_modified(&file, stamp).unwrap();
        assert_eq!(fs::metadata(&file).unwrap().modified().unwrap(), stamp);
    }
}
